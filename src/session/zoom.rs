//! Zoom policy
//!
//! Clamping rules and the quick-jump lens decision table. Both are pure so
//! the policy can be checked without hardware.

use crate::capture::traits::{CameraPosition, CaptureDevice, DeviceKind};
use serde::{Deserialize, Serialize};

/// A zoom command as submitted by the UI
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomRequest {
    pub factor: f64,
    pub animated: bool,
    /// Ramp rate in powers of two per second
    pub rate: f32,
}

impl ZoomRequest {
    pub fn immediate(factor: f64) -> Self {
        Self {
            factor,
            animated: false,
            rate: 0.0,
        }
    }

    pub fn ramp(factor: f64, rate: f32) -> Self {
        Self {
            factor,
            animated: true,
            rate,
        }
    }
}

/// Quick-jump zoom buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoomPreset {
    Half,
    One,
    Two,
}

impl ZoomPreset {
    /// Map a button index (0 -> 0.5x, 1 -> 1x, 2 -> 2x); unknown indices mean 1x
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => ZoomPreset::Half,
            2 => ZoomPreset::Two,
            _ => ZoomPreset::One,
        }
    }

    pub fn index(self) -> usize {
        match self {
            ZoomPreset::Half => 0,
            ZoomPreset::One => 1,
            ZoomPreset::Two => 2,
        }
    }

    pub fn factor(self) -> f64 {
        match self {
            ZoomPreset::Half => 0.5,
            ZoomPreset::One => 1.0,
            ZoomPreset::Two => 2.0,
        }
    }
}

/// What a quick-jump should do on the current device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomPlan {
    /// The bound device reaches the target on its own
    ZoomInPlace(f64),
    /// Bind a different physical lens, then zoom to `zoom` on that lens
    SwitchLens { kind: DeviceKind, zoom: f64 },
}

/// Decide how to reach a preset on `device`.
///
/// Zoom factors on a physical ultra-wide lens are relative to that lens, so
/// its native 1.0 already is the 0.5x view and 1x/2x need the wide lens.
pub fn plan_quick_zoom(preset: ZoomPreset, device: &CaptureDevice) -> ZoomPlan {
    let on_ultra_wide = device.kind == DeviceKind::UltraWide;

    match preset {
        ZoomPreset::Half if device.zoom_covers(0.5) => ZoomPlan::ZoomInPlace(0.5),
        ZoomPreset::Half if on_ultra_wide => ZoomPlan::ZoomInPlace(device.min_zoom),
        ZoomPreset::Half if device.position == CameraPosition::Back => ZoomPlan::SwitchLens {
            kind: DeviceKind::UltraWide,
            zoom: 1.0,
        },
        // Front cameras have no wider lens; clamps to the device minimum
        ZoomPreset::Half => ZoomPlan::ZoomInPlace(0.5),
        ZoomPreset::One | ZoomPreset::Two if on_ultra_wide => ZoomPlan::SwitchLens {
            kind: DeviceKind::WideAngle,
            zoom: preset.factor(),
        },
        ZoomPreset::One | ZoomPreset::Two => ZoomPlan::ZoomInPlace(preset.factor()),
    }
}

/// Clamp into `[min_zoom, min(max_zoom, ceiling)]`
pub fn clamp_zoom(factor: f64, device: &CaptureDevice, ceiling: f64) -> f64 {
    let max = device.max_zoom.min(ceiling).max(device.min_zoom);
    if factor.is_nan() {
        return device.min_zoom;
    }
    factor.clamp(device.min_zoom, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::test_device;

    #[test]
    fn test_virtual_device_zooms_in_place() {
        let triple = test_device("t", CameraPosition::Back, DeviceKind::TripleCamera, 0.5, 15.0);
        assert_eq!(plan_quick_zoom(ZoomPreset::Half, &triple), ZoomPlan::ZoomInPlace(0.5));
        assert_eq!(plan_quick_zoom(ZoomPreset::One, &triple), ZoomPlan::ZoomInPlace(1.0));
        assert_eq!(plan_quick_zoom(ZoomPreset::Two, &triple), ZoomPlan::ZoomInPlace(2.0));
    }

    #[test]
    fn test_half_on_wide_switches_to_ultra_wide() {
        let wide = test_device("w", CameraPosition::Back, DeviceKind::WideAngle, 1.0, 10.0);
        assert_eq!(
            plan_quick_zoom(ZoomPreset::Half, &wide),
            ZoomPlan::SwitchLens { kind: DeviceKind::UltraWide, zoom: 1.0 }
        );
    }

    #[test]
    fn test_ultra_wide_switches_back_for_one_and_two() {
        let ultra = test_device("u", CameraPosition::Back, DeviceKind::UltraWide, 1.0, 5.0);
        assert_eq!(
            plan_quick_zoom(ZoomPreset::One, &ultra),
            ZoomPlan::SwitchLens { kind: DeviceKind::WideAngle, zoom: 1.0 }
        );
        assert_eq!(
            plan_quick_zoom(ZoomPreset::Two, &ultra),
            ZoomPlan::SwitchLens { kind: DeviceKind::WideAngle, zoom: 2.0 }
        );
        assert_eq!(plan_quick_zoom(ZoomPreset::Half, &ultra), ZoomPlan::ZoomInPlace(1.0));
    }

    #[test]
    fn test_front_half_clamps_in_place() {
        let front = test_device("f", CameraPosition::Front, DeviceKind::TrueDepth, 1.0, 4.0);
        assert_eq!(plan_quick_zoom(ZoomPreset::Half, &front), ZoomPlan::ZoomInPlace(0.5));
    }

    #[test]
    fn test_clamp_respects_ceiling() {
        let device = test_device("t", CameraPosition::Back, DeviceKind::TripleCamera, 0.5, 15.0);
        for factor in [0.0, 0.3, 0.5, 1.0, 5.9, 6.0, 7.5, 100.0, f64::NAN] {
            let z = clamp_zoom(factor, &device, 6.0);
            assert!((0.5..=6.0).contains(&z), "{factor} clamped to {z}");
        }
        assert_eq!(clamp_zoom(2.0, &device, 6.0), 2.0);
    }

    #[test]
    fn test_ceiling_below_min_collapses_to_min() {
        let device = test_device("d", CameraPosition::Back, DeviceKind::WideAngle, 1.0, 10.0);
        assert_eq!(clamp_zoom(3.0, &device, 0.5), 1.0);
    }

    #[test]
    fn test_preset_index_mapping() {
        assert_eq!(ZoomPreset::from_index(0), ZoomPreset::Half);
        assert_eq!(ZoomPreset::from_index(7), ZoomPreset::One);
        assert_eq!(ZoomPreset::Two.index(), 2);
    }
}

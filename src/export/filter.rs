//! Per-frame color filter
//!
//! A monochrome tint: each pixel's luminance is multiplied by a tint color
//! and blended with the original by `intensity`.

use crate::export::types::ExportError;
use serde::{Deserialize, Serialize};

/// Rec. 709 luminance weights
const LUMA: [f32; 3] = [0.2125, 0.7154, 0.0721];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorFilter {
    /// Tint color, RGB in 0.0 - 1.0
    pub color: [f32; 3],
    /// Blend between original (0.0) and fully tinted (1.0)
    pub intensity: f32,
}

impl Default for ColorFilter {
    fn default() -> Self {
        Self::rose()
    }
}

impl ColorFilter {
    /// Pink tint used by the filter toggle
    pub fn rose() -> Self {
        Self {
            color: [1.0, 0.6, 0.75],
            intensity: 0.6,
        }
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !self.color.iter().copied().all(in_unit) || !in_unit(self.intensity) {
            return Err(ExportError::InvalidConfig(format!(
                "filter components must be within 0..=1: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Filter RGBA pixels in place; alpha is untouched
    pub fn apply(&self, rgba: &mut [u8]) {
        for px in rgba.chunks_exact_mut(4) {
            let rgb = [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ];
            let luma = rgb[0] * LUMA[0] + rgb[1] * LUMA[1] + rgb[2] * LUMA[2];

            for c in 0..3 {
                let tinted = luma * self.color[c];
                let value = rgb[c] + (tinted - rgb[c]) * self.intensity;
                px[c] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_turns_rose() {
        let filter = ColorFilter {
            color: [1.0, 0.6, 0.75],
            intensity: 1.0,
        };
        let mut px = [255, 255, 255, 255];
        filter.apply(&mut px);
        assert_eq!(px, [255, 153, 191, 255]);
    }

    #[test]
    fn test_zero_intensity_is_identity() {
        let filter = ColorFilter {
            color: [1.0, 0.6, 0.75],
            intensity: 0.0,
        };
        let mut frame = vec![12, 200, 99, 128, 0, 0, 0, 0];
        let original = frame.clone();
        filter.apply(&mut frame);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_black_stays_black() {
        let mut px = [0, 0, 0, 7];
        ColorFilter::rose().apply(&mut px);
        assert_eq!(px, [0, 0, 0, 7]);
    }

    #[test]
    fn test_validate() {
        assert!(ColorFilter::rose().validate().is_ok());
        let bad = ColorFilter {
            color: [1.5, 0.0, 0.0],
            intensity: 0.5,
        };
        assert!(matches!(bad.validate(), Err(ExportError::InvalidConfig(_))));
    }
}

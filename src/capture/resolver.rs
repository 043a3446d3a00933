//! Capability resolver
//!
//! Picks the best capture device for a camera side. Virtual multi-lens
//! devices win on the back; the depth camera wins on the front.

use crate::capture::traits::{CameraPosition, CaptureDevice, DeviceKind};
use crate::utils::error::CameraError;

const BACK_PREFERENCE: &[DeviceKind] = &[
    DeviceKind::TripleCamera,
    DeviceKind::DualWideCamera,
    DeviceKind::DualCamera,
    DeviceKind::WideAngle,
];

const FRONT_PREFERENCE: &[DeviceKind] = &[DeviceKind::TrueDepth, DeviceKind::WideAngle];

fn preference(position: CameraPosition) -> &'static [DeviceKind] {
    match position {
        CameraPosition::Back => BACK_PREFERENCE,
        CameraPosition::Front => FRONT_PREFERENCE,
    }
}

/// Resolve the best device for `position` out of an enumeration.
///
/// Devices on the other side are never substituted.
pub fn resolve(
    position: CameraPosition,
    devices: &[CaptureDevice],
) -> Result<CaptureDevice, CameraError> {
    let on_side: Vec<&CaptureDevice> = devices.iter().filter(|d| d.position == position).collect();

    for kind in preference(position) {
        let best = on_side
            .iter()
            .filter(|d| d.kind == *kind)
            .max_by(|a, b| a.zoom_span().total_cmp(&b.zoom_span()));
        if let Some(device) = best {
            tracing::debug!("Resolved {} camera: {} ({:?})", position, device.name, device.kind);
            return Ok((*device).clone());
        }
    }

    tracing::warn!("No {} camera among {} enumerated devices", position, devices.len());
    Err(CameraError::NoDeviceAvailable(position))
}

/// Find a specific physical lens, used for quick-jump lens switches
pub fn find_lens(
    position: CameraPosition,
    kind: DeviceKind,
    devices: &[CaptureDevice],
) -> Option<CaptureDevice> {
    devices
        .iter()
        .find(|d| d.position == position && d.kind == kind)
        .cloned()
}

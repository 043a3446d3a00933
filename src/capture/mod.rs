//! Capture hardware
//!
//! The [`CaptureHardware`] seam, the device resolver, and the backends: a
//! scripted simulator and, behind the `native-camera` feature, webcams.

pub mod resolver;
pub mod simulated;
pub mod traits;

#[cfg(feature = "native-camera")]
pub mod native;

pub use resolver::resolve;
pub use simulated::SimulatedCamera;
pub use traits::{
    AudioDeviceInfo, CameraPosition, CaptureDevice, CaptureFormat, CaptureHardware, DeviceId,
    DeviceKind, DeviceOrientation, HardwareError, HardwareResult, PointOfInterest,
    StabilizationMode, VideoCodec, VideoOrientation,
};

#[cfg(feature = "native-camera")]
pub use native::NativeCamera;

//! Capture trait definitions
//!
//! Platform-agnostic description of capture devices and the hardware
//! session that the session controller drives.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Which side of the device a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    /// Facing the user
    Front,
    /// Facing away from the user
    Back,
}

impl CameraPosition {
    pub fn opposite(self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPosition::Front => write!(f, "front"),
            CameraPosition::Back => write!(f, "back"),
        }
    }
}

/// Kind of capture device
///
/// Virtual kinds multiplex several physical lenses across one continuous
/// zoom range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceKind {
    TripleCamera,
    DualWideCamera,
    DualCamera,
    WideAngle,
    UltraWide,
    Telephoto,
    TrueDepth,
}

impl DeviceKind {
    pub fn is_virtual(self) -> bool {
        matches!(
            self,
            DeviceKind::TripleCamera | DeviceKind::DualWideCamera | DeviceKind::DualCamera
        )
    }
}

/// Opaque, backend-assigned device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported frame rate range for a format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min: f64,
    pub max: f64,
}

impl FrameRateRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn covers(&self, fps: f64) -> bool {
        self.min <= fps && fps <= self.max
    }
}

/// One capture format a device can be switched into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFormat {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Frame rate ranges this format supports
    pub frame_rate_ranges: Vec<FrameRateRange>,

    /// Whether video HDR can be enabled while this format is active
    pub hdr_supported: bool,
}

impl CaptureFormat {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// First range covering `fps`, if any
    pub fn range_covering(&self, fps: f64) -> Option<&FrameRateRange> {
        self.frame_rate_ranges.iter().find(|r| r.covers(fps))
    }
}

/// Torch hardware present on a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorchCapability {
    /// Highest level the hardware allows right now (0.0 - 1.0)
    pub max_level: f32,
}

/// Snapshot of one capture device's capabilities
///
/// Re-queried on every device switch; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDevice {
    /// Backend device ID
    pub id: DeviceId,

    /// Human readable name
    pub name: String,

    pub position: CameraPosition,

    pub kind: DeviceKind,

    /// Minimum available zoom factor
    pub min_zoom: f64,

    /// Maximum available zoom factor
    pub max_zoom: f64,

    /// Torch capability, if the device has one
    pub torch: Option<TorchCapability>,

    /// Supported capture formats
    pub formats: Vec<CaptureFormat>,
}

impl CaptureDevice {
    pub fn has_torch(&self) -> bool {
        self.torch.is_some()
    }

    pub fn zoom_span(&self) -> f64 {
        self.max_zoom - self.min_zoom
    }

    /// Whether the native zoom range reaches `factor` without switching lenses
    pub fn zoom_covers(&self, factor: f64) -> bool {
        self.min_zoom <= factor && factor <= self.max_zoom
    }
}

/// Information about an audio input device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Orientation written into the recorded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeRight,
    LandscapeLeft,
}

impl VideoOrientation {
    /// Clockwise rotation in degrees a player applies to display the frames upright
    pub fn rotation_degrees(self) -> u32 {
        match self {
            VideoOrientation::Portrait => 90,
            VideoOrientation::PortraitUpsideDown => 270,
            VideoOrientation::LandscapeRight => 0,
            VideoOrientation::LandscapeLeft => 180,
        }
    }
}

/// Physical orientation reported by the device's motion sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
    Unknown,
}

impl DeviceOrientation {
    /// Map to a video orientation; flat and unknown orientations carry none.
    ///
    /// Landscape is swapped: device-left means camera-right.
    pub fn video_orientation(self) -> Option<VideoOrientation> {
        match self {
            DeviceOrientation::Portrait => Some(VideoOrientation::Portrait),
            DeviceOrientation::PortraitUpsideDown => Some(VideoOrientation::PortraitUpsideDown),
            DeviceOrientation::LandscapeLeft => Some(VideoOrientation::LandscapeRight),
            DeviceOrientation::LandscapeRight => Some(VideoOrientation::LandscapeLeft),
            DeviceOrientation::FaceUp | DeviceOrientation::FaceDown | DeviceOrientation::Unknown => {
                None
            }
        }
    }
}

/// Video stabilization mode for the recording connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilizationMode {
    Off,
    Standard,
    #[default]
    Cinematic,
    Auto,
}

/// Codec used by the recording output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Hevc,
    H264,
    /// Output's own default settings
    Default,
}

/// Normalized point of interest (0.0 - 1.0 on both axes)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub x: f64,
    pub y: f64,
}

/// Errors reported by the capture hardware
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Device could not be locked for configuration (busy)
    #[error("device locked: {0}")]
    Locked(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for HardwareError {
    fn from(e: std::io::Error) -> Self {
        HardwareError::Io(e.to_string())
    }
}

pub type HardwareResult<T> = Result<T, HardwareError>;

/// Invoked once when a recording has been finalized (or failed)
pub type RecordingCallback = Box<dyn FnOnce(HardwareResult<PathBuf>) + Send + 'static>;

/// The OS camera subsystem: device enumeration plus one capture session.
///
/// Only the session controller's queue thread calls into an implementation,
/// so methods take `&mut self` and may block.
pub trait CaptureHardware: Send + 'static {
    /// Enumerate video devices on one side
    fn enumerate_devices(&self, position: CameraPosition) -> Vec<CaptureDevice>;

    /// Default audio input, if any
    fn default_audio_device(&self) -> Option<AudioDeviceInfo>;

    fn begin_configuration(&mut self);
    fn commit_configuration(&mut self);

    fn bind_video_input(&mut self, device: &CaptureDevice) -> HardwareResult<()>;
    fn remove_video_input(&mut self);
    fn bind_audio_input(&mut self, device: &AudioDeviceInfo) -> HardwareResult<()>;
    fn remove_audio_input(&mut self);

    fn has_recording_output(&self) -> bool;
    fn add_recording_output(&mut self) -> HardwareResult<()>;

    fn start_running(&mut self);
    fn stop_running(&mut self);
    fn is_running(&self) -> bool;

    // Device-lock operations. Any of these can fail with `HardwareError::Locked`.

    fn set_active_format(
        &mut self,
        device: &DeviceId,
        format: &CaptureFormat,
        frame_rate: f64,
    ) -> HardwareResult<()>;
    fn zoom_factor(&self, device: &DeviceId) -> f64;
    fn set_zoom_factor(&mut self, device: &DeviceId, factor: f64) -> HardwareResult<()>;
    fn ramp_zoom(&mut self, device: &DeviceId, target: f64, rate: f32) -> HardwareResult<()>;
    fn is_ramping_zoom(&self, device: &DeviceId) -> bool;
    fn cancel_zoom_ramp(&mut self, device: &DeviceId) -> HardwareResult<()>;
    /// `None` turns the torch off
    fn set_torch(&mut self, device: &DeviceId, level: Option<f32>) -> HardwareResult<()>;
    fn set_hdr(&mut self, device: &DeviceId, enabled: bool) -> HardwareResult<()>;
    fn focus_and_expose(&mut self, device: &DeviceId, point: PointOfInterest) -> HardwareResult<()>;

    /// Block until a freshly bound device accepts configuration
    fn await_device_ready(&mut self, _device: &DeviceId, _timeout: Duration) -> HardwareResult<()> {
        Ok(())
    }

    // Recording output connection

    fn set_video_orientation(&mut self, orientation: VideoOrientation) -> HardwareResult<()>;
    fn set_video_mirrored(&mut self, mirrored: bool) -> HardwareResult<()>;
    fn set_stabilization_mode(&mut self, mode: StabilizationMode) -> HardwareResult<()>;
    fn available_codecs(&self) -> Vec<VideoCodec>;
    fn set_video_codec(&mut self, codec: VideoCodec) -> HardwareResult<()>;

    /// Start writing to `path`; `on_finish` fires once the file is finalized
    fn start_recording(&mut self, path: &Path, on_finish: RecordingCallback) -> HardwareResult<()>;
    fn stop_recording(&mut self) -> HardwareResult<()>;
    fn is_recording(&self) -> bool;
}

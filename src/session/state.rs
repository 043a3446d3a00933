//! Session state management
//!
//! Defines the session state machine and the state owned by the controller's
//! queue thread.

use crate::capture::traits::{
    AudioDeviceInfo, CameraPosition, CaptureDevice, CaptureFormat, DeviceKind, StabilizationMode,
    VideoCodec, VideoOrientation,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle phase of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// No inputs bound yet (or the last configure failed)
    #[default]
    Unconfigured,
    /// A reconfiguration is in flight
    Configuring,
    /// Configured but not delivering frames
    Idle,
    /// Delivering frames
    Running,
}

/// Target capture frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameRate {
    #[serde(rename = "30")]
    Fps30,
    #[default]
    #[serde(rename = "60")]
    Fps60,
}

impl FrameRate {
    pub fn fps(self) -> u32 {
        match self {
            FrameRate::Fps30 => 30,
            FrameRate::Fps60 => 60,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            FrameRate::Fps30 => FrameRate::Fps60,
            FrameRate::Fps60 => FrameRate::Fps30,
        }
    }

    /// Label shown next to the frame rate toggle
    pub fn label(self) -> String {
        format!("{} fps", self.fps())
    }
}

/// Torch intent versus what the hardware is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorchState {
    /// What the user asked for, kept across devices without a torch
    pub desired: bool,
    /// Whether the bound device's torch is lit
    pub active: bool,
}

/// Mutable session state, owned exclusively by the queue thread
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub device: Option<CaptureDevice>,
    pub audio_device: Option<AudioDeviceInfo>,
    pub frame_rate: FrameRate,
    pub active_format: Option<CaptureFormat>,
    pub zoom_factor: f64,
    pub torch: TorchState,
    pub stabilization: StabilizationMode,
    pub orientation: VideoOrientation,
    pub mirrored: bool,
    pub hdr_enabled: bool,
    pub codec: VideoCodec,
    pub has_output: bool,
    pub recording: Option<PathBuf>,
}

impl SessionState {
    pub fn new(stabilization: StabilizationMode) -> Self {
        Self {
            phase: SessionPhase::Unconfigured,
            device: None,
            audio_device: None,
            frame_rate: FrameRate::default(),
            active_format: None,
            zoom_factor: 1.0,
            torch: TorchState::default(),
            stabilization,
            orientation: VideoOrientation::Portrait,
            mirrored: false,
            hdr_enabled: false,
            codec: VideoCodec::Default,
            has_output: false,
            recording: None,
        }
    }

    pub fn position(&self) -> Option<CameraPosition> {
        self.device.as_ref().map(|d| d.position)
    }

    /// Mirror only when the camera faces the user
    pub fn should_mirror(&self) -> bool {
        self.position() == Some(CameraPosition::Front)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            device_id: self.device.as_ref().map(|d| d.id.0.clone()),
            device_kind: self.device.as_ref().map(|d| d.kind),
            position: self.position(),
            has_audio: self.audio_device.is_some(),
            frame_rate: self.frame_rate,
            zoom_factor: self.zoom_factor,
            torch: self.torch,
            stabilization: self.stabilization,
            orientation: self.orientation,
            mirrored: self.mirrored,
            hdr_enabled: self.hdr_enabled,
            codec: self.codec,
            is_recording: self.recording.is_some(),
        }
    }
}

/// Read-only copy of the session state published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub device_id: Option<String>,
    pub device_kind: Option<DeviceKind>,
    pub position: Option<CameraPosition>,
    pub has_audio: bool,
    pub frame_rate: FrameRate,
    pub zoom_factor: f64,
    pub torch: TorchState,
    pub stabilization: StabilizationMode,
    pub orientation: VideoOrientation,
    pub mirrored: bool,
    pub hdr_enabled: bool,
    pub codec: VideoCodec,
    pub is_recording: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionState::new(StabilizationMode::default()).snapshot()
    }
}

/// Events emitted by the session controller
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    DeviceChanged { device: String, position: CameraPosition },
    RecordingStarted(PathBuf),
    RecordingFinished(PathBuf),
    RecordingFailed(String),
    /// A transient hardware failure that was absorbed
    Warning(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_toggle_and_label() {
        assert_eq!(FrameRate::Fps60.toggled(), FrameRate::Fps30);
        assert_eq!(FrameRate::Fps30.toggled().label(), "60 fps");
    }

    #[test]
    fn test_fresh_state_is_unconfigured() {
        let state = SessionState::new(StabilizationMode::Cinematic);
        assert_eq!(state.phase, SessionPhase::Unconfigured);
        assert_eq!(state.position(), None);
        assert!(!state.should_mirror());
        assert_eq!(state.snapshot().zoom_factor, 1.0);
    }
}

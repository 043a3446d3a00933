//! Camera configuration
//!
//! Loaded from a JSON file; every field has a default so partial files work.

use crate::capture::traits::{CameraPosition, StabilizationMode};
use crate::export::filter::ColorFilter;
use crate::export::types::{ExportFormat, ExportQuality};
use crate::session::state::FrameRate;
use crate::utils::error::{CameraError, CameraResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    /// Directory for segment, intermediate, and output files
    pub scratch_dir: PathBuf,

    pub session: SessionConfig,

    pub zoom: ZoomConfig,

    pub export: ExportConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("segment-camera"),
            session: SessionConfig::default(),
            zoom: ZoomConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

/// Session defaults applied by `configure`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub default_frame_rate: FrameRate,

    pub default_position: CameraPosition,

    pub stabilization: StabilizationMode,

    /// Record HEVC when the output offers it
    pub prefer_hevc: bool,

    /// How long to wait for a freshly switched device before re-arming the torch
    pub device_ready_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_frame_rate: FrameRate::Fps60,
            default_position: CameraPosition::Front,
            stabilization: StabilizationMode::Cinematic,
            prefer_hevc: true,
            device_ready_timeout_ms: 400,
        }
    }
}

impl SessionConfig {
    pub fn device_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.device_ready_timeout_ms)
    }
}

/// Zoom limits and ramp rates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoomConfig {
    /// Upper bound on zoom regardless of what the device allows
    pub quality_ceiling: f64,

    /// Ramp rate for the quick-jump buttons
    pub preset_ramp_rate: f32,

    /// Ramp rate while pinching
    pub pinch_ramp_rate: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            quality_ceiling: 6.0,
            preset_ramp_rate: 8.0,
            pinch_ramp_rate: 8.0,
        }
    }
}

/// Export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportConfig {
    pub format: ExportFormat,

    pub quality: ExportQuality,

    /// Output frame rate (None = first segment's rate)
    pub fps: Option<u32>,

    /// Delay before temporary files are deleted after hand-off
    pub cleanup_grace_ms: u64,

    /// Filter used when the filter toggle is on
    pub filter: ColorFilter,

    /// Thumbnail width in pixels
    pub thumbnail_width: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::Mp4,
            quality: ExportQuality::High,
            fps: None,
            cleanup_grace_ms: 2_000,
            filter: ColorFilter::rose(),
            thumbnail_width: 160,
        }
    }
}

impl ExportConfig {
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

impl CameraConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> CameraResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CameraConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded camera config from {:?}", path);
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: &Path) -> CameraResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> CameraResult<()> {
        if !(self.zoom.quality_ceiling >= 1.0) {
            return Err(CameraError::Config(format!(
                "zoom.qualityCeiling must be at least 1.0, got {}",
                self.zoom.quality_ceiling
            )));
        }
        if self.zoom.preset_ramp_rate <= 0.0 || self.zoom.pinch_ramp_rate <= 0.0 {
            return Err(CameraError::Config("zoom ramp rates must be positive".to_string()));
        }
        if self.export.thumbnail_width == 0 {
            return Err(CameraError::Config("export.thumbnailWidth must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Create the scratch directory if needed
    pub fn ensure_scratch_dir(&self) -> CameraResult<&Path> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        Ok(&self.scratch_dir)
    }
}

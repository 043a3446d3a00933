//! Export types and configuration
//!
//! This module defines the types used for export configuration, probing,
//! progress tracking, and error handling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Export container options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Mp4,
    Mov,
}

impl ExportFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Mp4 => "mp4",
            ExportFormat::Mov => "mov",
        }
    }
}

/// Export quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    Low,
    Medium,
    #[default]
    High,
    Lossless,
}

impl ExportQuality {
    /// Get the CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            ExportQuality::Low => 28,
            ExportQuality::Medium => 23,
            ExportQuality::High => 18,
            // CRF 0 breaks yuv420p output
            ExportQuality::Lossless => 1,
        }
    }

    /// Get the FFmpeg preset for H.264 encoding
    pub fn h264_preset(&self) -> &'static str {
        match self {
            ExportQuality::Low => "faster",
            ExportQuality::Medium => "medium",
            ExportQuality::High => "slow",
            ExportQuality::Lossless => "veryslow",
        }
    }
}

/// Export configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Output container
    pub format: ExportFormat,
    /// Quality level
    pub quality: ExportQuality,
    /// Output frame rate (None = first segment's fps)
    pub fps: Option<u32>,
}

/// Kind of media handed to a persistence sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
}

/// Stream metadata for one media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Coded width in pixels
    pub width: u32,
    /// Coded height in pixels
    pub height: u32,
    pub fps: f64,
    pub duration_secs: f64,
    pub has_audio: bool,
    /// Clockwise display rotation stored with the video track
    pub rotation: u32,
}

impl MediaInfo {
    /// Dimensions after the stored rotation is applied
    pub fn display_dimensions(&self) -> (u32, u32) {
        if self.rotation % 180 == 90 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// One decoded RGBA frame
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Export progress stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExportStage {
    /// Probing segments and building the composition
    Preparing,
    /// Rendering the concatenated timeline
    Composing,
    /// Re-rendering frames through the color filter
    Filtering,
    /// Finalizing output file
    Finalizing,
    /// Export completed successfully
    Complete,
    /// Export failed with error
    Error { message: String },
}

/// Export progress information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    /// Progress percentage (0.0 to 100.0)
    pub percent: f32,
    /// Current stage of export
    pub stage: ExportStage,
    /// Current frame being processed
    pub current_frame: u64,
    /// Total frames to process
    pub total_frames: u64,
}

impl ExportProgress {
    fn at(percent: f32, stage: ExportStage) -> Self {
        Self {
            percent,
            stage,
            current_frame: 0,
            total_frames: 0,
        }
    }

    pub fn preparing() -> Self {
        Self::at(0.0, ExportStage::Preparing)
    }

    pub fn composing() -> Self {
        Self::at(10.0, ExportStage::Composing)
    }

    pub fn filtering(current_frame: u64, total_frames: u64) -> Self {
        let percent = if total_frames > 0 {
            50.0 + (current_frame as f32 / total_frames as f32) * 45.0
        } else {
            50.0
        };
        Self {
            percent,
            stage: ExportStage::Filtering,
            current_frame,
            total_frames,
        }
    }

    pub fn finalizing() -> Self {
        Self::at(95.0, ExportStage::Finalizing)
    }

    pub fn complete() -> Self {
        Self::at(100.0, ExportStage::Complete)
    }

    pub fn error(message: String) -> Self {
        Self::at(0.0, ExportStage::Error { message })
    }
}

/// Outcome of one export run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    /// Final file to hand to the persistence sink
    pub output: PathBuf,
    /// Temporary files produced along the way, excluding `output`
    pub intermediates: Vec<PathBuf>,
    /// Whether the color filter made it into `output`
    pub filtered: bool,
    pub duration_secs: f64,
    /// Segments whose content is in `output`, in timeline order
    pub segment_ids: Vec<Uuid>,
    /// Segments dropped because their video could not be read
    pub skipped: Vec<Uuid>,
}

impl ExportJob {
    /// Every temporary file this job created
    pub fn temp_files(&self) -> Vec<PathBuf> {
        let mut files = self.intermediates.clone();
        files.push(self.output.clone());
        files
    }
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Nothing to export")]
    NothingToExport,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotated_display_dimensions() {
        let mut info = MediaInfo {
            width: 1920,
            height: 1080,
            fps: 30.0,
            duration_secs: 2.0,
            has_audio: true,
            rotation: 90,
        };
        assert_eq!(info.display_dimensions(), (1080, 1920));
        info.rotation = 180;
        assert_eq!(info.display_dimensions(), (1920, 1080));
    }

    #[test]
    fn test_temp_files_include_output() {
        let job = ExportJob {
            id: Uuid::new_v4(),
            output: PathBuf::from("/tmp/filtered.mp4"),
            intermediates: vec![PathBuf::from("/tmp/composed.mp4")],
            filtered: true,
            duration_secs: 8.0,
            segment_ids: Vec::new(),
            skipped: Vec::new(),
        };
        assert_eq!(job.temp_files().len(), 2);
        assert_eq!(job.temp_files()[1], job.output);
    }

    #[test]
    fn test_filtering_progress_range() {
        assert_eq!(ExportProgress::filtering(0, 100).percent, 50.0);
        assert_eq!(ExportProgress::filtering(100, 100).percent, 95.0);
    }
}

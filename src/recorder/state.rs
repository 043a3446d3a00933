//! Recorded segment state
//!
//! Defines a finished take and its preview thumbnail.

use crate::capture::traits::{CameraPosition, VideoOrientation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// PNG-encoded preview image for a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    /// PNG bytes
    #[serde(skip)]
    pub png: Vec<u8>,

    pub width: u32,

    pub height: u32,
}

/// One completed take
///
/// Owned by the segment store until deleted or consumed by an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSegment {
    /// Unique segment identity
    pub id: Uuid,

    /// Backing media file
    pub path: PathBuf,

    /// Preview image, attached asynchronously after the take is stored
    pub thumbnail: Option<Thumbnail>,

    pub created_at: DateTime<Utc>,

    /// Orientation latched when the take started
    pub orientation: VideoOrientation,

    /// Camera side the take was shot on
    pub position: CameraPosition,

    pub mirrored: bool,
}

impl RecordedSegment {
    pub fn new(
        id: Uuid,
        path: PathBuf,
        orientation: VideoOrientation,
        position: CameraPosition,
        mirrored: bool,
    ) -> Self {
        Self {
            id,
            path,
            thumbnail: None,
            created_at: Utc::now(),
            orientation,
            position,
            mirrored,
        }
    }

    /// File name for display
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

//! Media engine trait
//!
//! The media operations export and thumbnailing need. [`FfmpegEngine`]
//! implements it by driving the ffmpeg command line tools.
//!
//! [`FfmpegEngine`]: crate::export::ffmpeg::FfmpegEngine

use crate::export::composition::Composition;
use crate::export::filter::ColorFilter;
use crate::export::types::{ExportError, ExportOptions, MediaInfo, RgbaFrame};
use std::path::Path;

/// Reports `(frames_done, total_frames)` while filtering
pub type FrameProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

pub trait MediaEngine: Send + Sync {
    /// Read stream metadata; fails when the file has no readable video
    fn probe(&self, path: &Path) -> Result<MediaInfo, ExportError>;

    /// Render the composition's timeline into one interleaved file at `output`
    fn render(
        &self,
        composition: &Composition,
        options: &ExportOptions,
        output: &Path,
    ) -> Result<(), ExportError>;

    /// Re-encode `input` into `output` with every frame run through `filter`
    fn apply_filter(
        &self,
        input: &Path,
        output: &Path,
        filter: &ColorFilter,
        options: &ExportOptions,
        progress: FrameProgress<'_>,
    ) -> Result<(), ExportError>;

    /// First frame of `path`, scaled to `max_width` pixels wide
    fn thumbnail(&self, path: &Path, max_width: u32) -> Result<RgbaFrame, ExportError>;
}

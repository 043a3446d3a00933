//! Segment export module
//!
//! Concatenates recorded segments into one file, optionally through a color
//! filter, hands the result to a persistence sink, and cleans up afterwards.

pub mod cleanup;
pub mod composition;
pub mod engine;
pub mod ffmpeg;
pub mod filter;
pub mod pipeline;
pub mod sink;
pub mod types;

pub use cleanup::schedule_cleanup;
pub use composition::{Composition, TimeRange, TrackEntry};
pub use engine::MediaEngine;
pub use ffmpeg::FfmpegEngine;
pub use filter::ColorFilter;
pub use pipeline::ExportPipeline;
pub use sink::{DirectorySink, PersistenceSink};
pub use types::{
    ExportError, ExportFormat, ExportJob, ExportOptions, ExportProgress, ExportQuality, ExportStage,
    MediaInfo, MediaKind, RgbaFrame,
};

//! Segmented recording
//!
//! - SegmentRecorder drives one take at a time against the session
//! - SegmentStore keeps finished takes in order
//! - thumbnail renders preview images for stored takes

pub mod segment_recorder;
pub mod state;
pub mod store;
pub mod thumbnail;

pub use segment_recorder::{RecordingEvent, RecordingState, SegmentRecorder};
pub use state::{RecordedSegment, Thumbnail};
pub use store::SegmentStore;

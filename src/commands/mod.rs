//! Command handlers
//!
//! The surface a camera screen calls into: take control on [`CameraApp`]
//! and the export "finish" flow.

pub mod camera;
pub mod export;

pub use camera::{CameraApp, UiState};
pub use export::{ExportContext, ExportState, FinishedExport};

//! Shared utilities

pub mod error;
pub mod process;

pub use error::{CameraError, CameraResult, ErrorResponse};

//! Error types and handling
//!
//! Common error types used across the camera core.

use crate::capture::traits::{CameraPosition, HardwareError};
use crate::export::types::ExportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("No camera available for position {0}")]
    NoDeviceAvailable(CameraPosition),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Hardware lock error: {0}")]
    HardwareLock(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("An export is already in progress")]
    ExportInProgress,

    #[error("Capture session has shut down")]
    SessionClosed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CameraError {
    /// Whether the error is transient hardware contention the next gesture may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::HardwareLock(_))
    }
}

impl From<HardwareError> for CameraError {
    fn from(error: HardwareError) -> Self {
        match error {
            HardwareError::Locked(msg) => CameraError::HardwareLock(msg),
            other => CameraError::Configuration(other.to_string()),
        }
    }
}

/// Error response for the UI layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<CameraError> for ErrorResponse {
    fn from(error: CameraError) -> Self {
        let code = match &error {
            CameraError::NoDeviceAvailable(_) => "NO_DEVICE_AVAILABLE",
            CameraError::Configuration(_) => "CONFIGURATION_ERROR",
            CameraError::HardwareLock(_) => "HARDWARE_LOCK_ERROR",
            CameraError::Recording(_) => "RECORDING_FAILURE",
            CameraError::Export(_) => "EXPORT_FAILURE",
            CameraError::ExportInProgress => "EXPORT_IN_PROGRESS",
            CameraError::SessionClosed => "SESSION_CLOSED",
            CameraError::Config(_) => "CONFIG_ERROR",
            CameraError::Io(_) => "IO_ERROR",
            CameraError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_errors_map_to_transient() {
        let err: CameraError = HardwareError::Locked("busy".into()).into();
        assert!(err.is_transient());

        let err: CameraError = HardwareError::Unavailable("gone".into()).into();
        assert!(!err.is_transient());
        assert!(matches!(err, CameraError::Configuration(_)));
    }

    #[test]
    fn test_error_response_codes() {
        let response: ErrorResponse = CameraError::NoDeviceAvailable(CameraPosition::Back).into();
        assert_eq!(response.code, "NO_DEVICE_AVAILABLE");
        assert!(response.message.contains("back"));

        let response: ErrorResponse = CameraError::ExportInProgress.into();
        assert_eq!(response.code, "EXPORT_IN_PROGRESS");
    }
}

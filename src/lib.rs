//! Segment Camera - record in takes, finish into one video.
//!
//! This is the main library crate. It drives a capture session (device
//! choice, zoom, torch, formats), records segmented takes, and composes the
//! takes into a single exported file.

pub mod capture;
pub mod commands;
pub mod config;
pub mod export;
pub mod recorder;
pub mod session;
pub mod utils;

pub use commands::{CameraApp, UiState};
pub use config::CameraConfig;
pub use utils::error::{CameraError, CameraResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber
///
/// Honors `RUST_LOG`, falling back to debug output for this crate. Calling it
/// twice is harmless.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segment_camera=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_ok() {
        tracing::info!("Starting Segment Camera v{}", env!("CARGO_PKG_VERSION"));
    }
}

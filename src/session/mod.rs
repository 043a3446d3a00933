//! Capture session control
//!
//! One queue thread owns the hardware session; everything else talks to it
//! through [`SessionController`].

pub mod controller;
pub mod format;
pub mod state;
pub mod zoom;

pub use controller::{RecordingFinished, SessionController, SessionSettings};
pub use state::{FrameRate, SessionEvent, SessionPhase, SessionSnapshot, TorchState};
pub use zoom::{ZoomPlan, ZoomPreset, ZoomRequest};

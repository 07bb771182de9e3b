//! Measurement sessions
//!
//! The send side runs timed sessions through [`SessionController`]; the
//! receive side runs the capture or datagram loops in [`receiver`].

pub mod controller;
pub mod receiver;

use thiserror::Error;

use crate::transport::TransportError;

pub use controller::{
    SessionCommand, SessionConfig, SessionController, SessionOutcome, SessionPhase, SessionReport,
};
pub use receiver::{run_udp_receiver, CaptureCounts, CaptureLoop, CaptureStats};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already running")]
    AlreadyRunning,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

use thiserror::Error;

use crate::link::LinkError;
use crate::session::SessionError;
use crate::transport::TransportError;

/// Crate-wide error, wrapping the per-concern errors.
#[derive(Debug, Error)]
pub enum LatencyError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("config error: {0}")]
    Config(String),

    #[error("task failed: {0}")]
    Task(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LatencyError>;

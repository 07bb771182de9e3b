//! Test unit transports
//!
//! A transport sends one test unit per call. The session loop does not know
//! whether a unit is an injected 802.11 frame or a UDP datagram.

pub mod loopback;
pub mod raw;
pub mod udp;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::CodecError;
use crate::link::ReadinessLevel;

pub use loopback::{loopback_pair, LoopbackSink, LoopbackSource};
pub use raw::{FrameSink, FrameSource, RawTransport};
pub use udp::{UdpClient, UdpServer};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not initialized: {0}")]
    NotInitialized(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("no buffer for a {requested} byte unit")]
    BufferExhausted { requested: usize },

    #[error("transport closed")]
    Closed,
}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::BufferExhausted { requested } => TransportError::BufferExhausted { requested },
            other => TransportError::Send(other.to_string()),
        }
    }
}

/// What went out on one successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentUnit {
    /// Frame sequence number or datagram counter
    pub index: u32,
    pub len: usize,
}

#[async_trait]
pub trait Transport: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Link readiness this transport needs before sending
    fn readiness(&self) -> ReadinessLevel;

    /// Acquire sockets / handles. Failure is fatal for the session.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Send one test unit
    async fn send_unit(&mut self) -> Result<SentUnit, TransportError>;

    async fn close(&mut self);
}

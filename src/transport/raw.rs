//! Raw 802.11 transport
//!
//! Builds a test frame per unit and hands it to a [`FrameSink`]. The sink is
//! any injector bound to the wireless interface (pcap on Linux, an in-memory
//! channel in tests).

use async_trait::async_trait;
use tracing::{debug, info};

use super::{SentUnit, Transport, TransportError};
use crate::codec::{FrameBuilder, SequenceNumber};
use crate::link::ReadinessLevel;

/// Raw link-layer injector
pub trait FrameSink: Send {
    fn inject(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Raw link-layer capture. `Ok(None)` means the read timeout elapsed.
pub trait FrameSource: Send {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

pub struct RawTransport {
    builder: FrameBuilder,
    sink: Option<Box<dyn FrameSink>>,
    last_sent: SequenceNumber,
}

impl RawTransport {
    pub fn new(builder: FrameBuilder, sink: Box<dyn FrameSink>) -> Self {
        Self {
            builder,
            sink: Some(sink),
            last_sent: SequenceNumber::UNSENT,
        }
    }

    /// Sequence number of the last frame that was injected
    pub fn last_sent(&self) -> SequenceNumber {
        self.last_sent
    }

    pub fn builder(&self) -> &FrameBuilder {
        &self.builder
    }
}

#[async_trait]
impl Transport for RawTransport {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn readiness(&self) -> ReadinessLevel {
        ReadinessLevel::LinkOnly
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.sink.is_none() {
            return Err(TransportError::NotInitialized("raw injector already closed".into()));
        }
        info!(
            "Raw transport ready: {} byte frames, {:?}",
            self.builder.frame_len(),
            self.builder.template().encapsulation
        );
        Ok(())
    }

    async fn send_unit(&mut self) -> Result<SentUnit, TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::Closed)?;

        let sequence = self.last_sent.next();
        let frame = self.builder.build_frame(sequence)?;
        sink.inject(&frame)?;
        self.last_sent = sequence;

        debug!("injected frame seq={} len={}", sequence, frame.len());
        Ok(SentUnit {
            index: sequence.value() as u32,
            len: frame.len(),
        })
    }

    async fn close(&mut self) {
        if self.sink.take().is_some() {
            debug!("raw injector released after seq {}", self.last_sent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Classification, Classifier, TestFrameTemplate, RAW_PRE_HEADER_LEN};
    use crate::transport::loopback::loopback_pair;

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn inject(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
            Err(TransportError::Send("radio off".into()))
        }
    }

    #[tokio::test]
    async fn test_sequence_starts_at_one() {
        let (sink, source) = loopback_pair(16);
        let mut transport = RawTransport::new(FrameBuilder::new(TestFrameTemplate::default()), Box::new(sink));
        transport.open().await.unwrap();

        for expected in 1..=3u32 {
            let unit = transport.send_unit().await.unwrap();
            assert_eq!(unit.index, expected);
        }

        let classifier = Classifier::default();
        let seqs: Vec<u16> = source
            .drain()
            .iter()
            .filter_map(|f| match classifier.classify(f, RAW_PRE_HEADER_LEN) {
                Classification::Match { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_sequence() {
        let mut transport =
            RawTransport::new(FrameBuilder::new(TestFrameTemplate::default()), Box::new(FailingSink));
        assert!(transport.send_unit().await.is_err());
        assert!(transport.last_sent().is_unsent());
    }

    #[tokio::test]
    async fn test_closed_transport() {
        let (sink, _source) = loopback_pair(1);
        let mut transport = RawTransport::new(FrameBuilder::new(TestFrameTemplate::default()), Box::new(sink));
        transport.close().await;
        assert!(matches!(transport.send_unit().await, Err(TransportError::Closed)));
        assert!(matches!(transport.open().await, Err(TransportError::NotInitialized(_))));
    }
}

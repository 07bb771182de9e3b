//! In-memory frame path for dry runs and tests

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::raw::{FrameSink, FrameSource};
use super::TransportError;

/// Connected sink/source pair holding at most `capacity` frames in flight
pub fn loopback_pair(capacity: usize) -> (LoopbackSink, LoopbackSource) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        LoopbackSink { tx },
        LoopbackSource {
            rx,
            timeout: Duration::from_secs(1),
        },
    )
}

#[derive(Clone)]
pub struct LoopbackSink {
    tx: Sender<Vec<u8>>,
}

impl FrameSink for LoopbackSink {
    fn inject(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        match self.tx.try_send(frame.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(f)) => Err(TransportError::BufferExhausted { requested: f.len() }),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }
}

pub struct LoopbackSource {
    rx: Receiver<Vec<u8>>,
    timeout: Duration,
}

impl LoopbackSource {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Everything queued right now
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.rx.try_iter().collect()
    }
}

impl FrameSource for LoopbackSource {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_is_buffer_exhaustion() {
        let (mut sink, source) = loopback_pair(1);
        sink.inject(&[1, 2, 3]).unwrap();
        assert!(matches!(
            sink.inject(&[4, 5]),
            Err(TransportError::BufferExhausted { requested: 2 })
        ));
        assert_eq!(source.drain(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_source_timeout_and_close() {
        let (sink, source) = loopback_pair(4);
        let mut source = source.with_timeout(Duration::from_millis(5));
        assert!(source.recv_frame().unwrap().is_none());

        drop(sink);
        assert!(matches!(source.recv_frame(), Err(TransportError::Closed)));
    }
}

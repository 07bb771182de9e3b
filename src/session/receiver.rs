//! Receive-side loops
//!
//! The raw loop classifies every captured frame and fires the receive
//! trigger on a match. The UDP loop fires on every datagram.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::codec::{CapturePrefix, Classification, Classifier, NoMatchReason};
use crate::transport::raw::FrameSource;
use crate::transport::udp::{parse_payload, UdpServer};
use crate::transport::TransportError;
use crate::trigger::TimingTrigger;
use crate::wireless::radiotap::parse_radiotap;

/// Per-frame diagnostics
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames: AtomicU64,
    matches: AtomicU64,
    truncated: AtomicU64,
    malformed: AtomicU64,
    other: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureCounts {
    pub frames: u64,
    pub matches: u64,
    pub truncated: u64,
    pub malformed: u64,
    pub other: u64,
}

impl CaptureStats {
    fn record(&self, result: &Classification) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            Classification::Match { .. } => &self.matches,
            Classification::NoMatch(NoMatchReason::Truncated) => &self.truncated,
            Classification::NoMatch(NoMatchReason::Malformed) => &self.malformed,
            Classification::NoMatch(_) => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureCounts {
        CaptureCounts {
            frames: self.frames.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            other: self.other.load(Ordering::Relaxed),
        }
    }
}

pub struct CaptureLoop {
    classifier: Classifier,
    prefix: CapturePrefix,
    trigger: Arc<TimingTrigger>,
    stats: CaptureStats,
}

impl CaptureLoop {
    pub fn new(classifier: Classifier, prefix: CapturePrefix, trigger: Arc<TimingTrigger>) -> Self {
        Self {
            classifier,
            prefix,
            trigger,
            stats: CaptureStats::default(),
        }
    }

    pub fn stats(&self) -> CaptureCounts {
        self.stats.snapshot()
    }

    /// Classify one captured buffer, firing the trigger on a match
    pub fn handle(&self, raw: &[u8]) -> Classification {
        let result = self.classifier.classify_captured(raw, self.prefix);
        if let Classification::Match { sequence, source } = result {
            self.trigger.fire();
            info!("Received test frame seq={} from {}", sequence, source);
            if self.prefix == CapturePrefix::Radiotap {
                if let Some((_, rx)) = parse_radiotap(raw) {
                    debug!(
                        "seq={} channel={:?} rate={:?} signal={:?}dBm",
                        sequence,
                        rx.channel(),
                        rx.rate,
                        rx.signal_dbm
                    );
                }
            }
        } else {
            trace!("ignored {} byte frame: {:?}", raw.len(), result);
        }
        self.stats.record(&result);
        result
    }

    /// Pull frames from `source` until `stop` is set or the source closes
    pub fn run_blocking(&self, source: &mut dyn FrameSource, stop: &AtomicBool) -> Result<(), TransportError> {
        while !stop.load(Ordering::SeqCst) {
            match source.recv_frame() {
                Ok(Some(frame)) => {
                    self.handle(&frame);
                }
                Ok(None) => continue,
                Err(TransportError::Closed) => {
                    debug!("capture source closed");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        info!("Capture loop finished: {:?}", self.stats());
        Ok(())
    }

    /// Run the loop on a blocking thread
    pub fn spawn(
        self: Arc<Self>,
        mut source: Box<dyn FrameSource>,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<Result<(), TransportError>> {
        tokio::task::spawn_blocking(move || self.run_blocking(source.as_mut(), &stop))
    }
}

/// Receive datagrams until `stop` is set, firing `trigger` for each one
pub async fn run_udp_receiver(
    server: &UdpServer,
    trigger: &TimingTrigger,
    stop: &AtomicBool,
    timeout: Duration,
) -> Result<CaptureCounts, TransportError> {
    let stats = CaptureStats::default();

    while !stop.load(Ordering::SeqCst) {
        let datagram = match server.recv(timeout).await? {
            Some(d) => d,
            None => continue,
        };
        trigger.fire();
        stats.frames.fetch_add(1, Ordering::Relaxed);

        match parse_payload(&datagram.payload) {
            Some((index, sent_ms)) => {
                stats.matches.fetch_add(1, Ordering::Relaxed);
                info!("Received packet {} (t={} ms) from {}", index, sent_ms, datagram.from);
            }
            None => {
                stats.other.fetch_add(1, Ordering::Relaxed);
                warn!("Unrecognised {} byte datagram from {}", datagram.payload.len(), datagram.from);
            }
        }
    }

    Ok(stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codec::{FrameBuilder, SequenceNumber, TestFrameTemplate, RAW_PRE_HEADER_LEN};
    use crate::transport::loopback::loopback_pair;
    use crate::transport::raw::FrameSink;
    use crate::transport::{Transport, UdpClient};
    use crate::trigger::tests::RecordingPulse;
    use crate::trigger::TriggerRole;

    fn trigger() -> Arc<TimingTrigger> {
        Arc::new(TimingTrigger::current(
            TriggerRole::Receive,
            Arc::new(RecordingPulse::default()),
            Duration::from_millis(50),
        ))
    }

    #[tokio::test]
    async fn test_handle_counts_and_fires() {
        let trigger = trigger();
        let capture = CaptureLoop::new(
            Classifier::default(),
            CapturePrefix::Fixed(RAW_PRE_HEADER_LEN),
            Arc::clone(&trigger),
        );
        let frame = FrameBuilder::new(TestFrameTemplate::default())
            .build_frame(SequenceNumber::FIRST)
            .unwrap();

        assert!(capture.handle(&frame).is_match());
        capture.handle(&frame[..20]);
        let mut bad = frame.clone();
        bad[RAW_PRE_HEADER_LEN + 37] = 0xff;
        capture.handle(&bad);

        let stats = capture.stats();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.matches, 1);
        assert_eq!(stats.truncated, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(trigger.fire_count(), 1);
    }

    #[tokio::test]
    async fn test_blocking_loop_ends_on_close() {
        let trigger = trigger();
        let capture = Arc::new(CaptureLoop::new(
            Classifier::default(),
            CapturePrefix::Fixed(RAW_PRE_HEADER_LEN),
            Arc::clone(&trigger),
        ));
        let (mut sink, source) = loopback_pair(8);
        let source = source.with_timeout(Duration::from_millis(10));

        let builder = FrameBuilder::new(TestFrameTemplate::default());
        for seq in 1..=3 {
            sink.inject(&builder.build_frame(SequenceNumber::new(seq).unwrap()).unwrap())
                .unwrap();
        }
        drop(sink);

        let stop = Arc::new(AtomicBool::new(false));
        Arc::clone(&capture).spawn(Box::new(source), stop).await.unwrap().unwrap();
        assert_eq!(capture.stats().matches, 3);
        assert_eq!(trigger.fire_count(), 3);
    }

    #[tokio::test]
    async fn test_udp_receiver_fires_per_datagram() {
        let server = UdpServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut client = UdpClient::new(server.local_addr().unwrap());
        client.open().await.unwrap();
        client.send_unit().await.unwrap();
        client.send_unit().await.unwrap();

        let trigger = trigger();
        let stop = Arc::new(AtomicBool::new(false));
        let stopper = {
            let stop = Arc::clone(&stop);
            let trigger = Arc::clone(&trigger);
            tokio::spawn(async move {
                while trigger.fire_count() < 2 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                stop.store(true, Ordering::SeqCst);
            })
        };

        let counts = run_udp_receiver(&server, &trigger, &stop, Duration::from_millis(20))
            .await
            .unwrap();
        stopper.await.unwrap();
        assert_eq!(counts.frames, 2);
        assert_eq!(counts.matches, 2);
    }
}

//! Wireless Packet Capture and Injection
//!
//! pcap handles bound to the wireless interface. Injection writes complete
//! buffers with `sendpacket`; capture returns raw frames (capture prefix
//! included) and reports a read timeout as "nothing yet".

use std::time::Duration;

use tracing::{debug, info};

use crate::transport::raw::{FrameSink, FrameSource};
use crate::transport::TransportError;

/// Wireless capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Interface name
    pub interface: String,
    /// Capture buffer size
    pub buffer_size: usize,
    /// Promiscuous mode (usually true for monitor mode)
    pub promiscuous: bool,
    /// Immediate mode (lower latency)
    pub immediate: bool,
    /// Read timeout; a capture with nothing pending returns after this
    pub read_timeout: Duration,
    /// Snapshot length
    pub snaplen: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            buffer_size: 1 << 20,
            promiscuous: true,
            immediate: true,
            read_timeout: Duration::from_secs(1),
            snaplen: 2048,
        }
    }
}

impl CaptureConfig {
    /// Create config for a specific interface
    pub fn for_interface(name: &str) -> Self {
        Self {
            interface: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    fn open(&self) -> Result<pcap::Capture<pcap::Active>, TransportError> {
        pcap::Capture::from_device(self.interface.as_str())
            .and_then(|cap| {
                cap.promisc(self.promiscuous)
                    .immediate_mode(self.immediate)
                    .buffer_size(self.buffer_size as i32)
                    .snaplen(self.snaplen)
                    .timeout(self.read_timeout.as_millis() as i32)
                    .open()
            })
            .map_err(|e| TransportError::NotInitialized(format!("{}: {}", self.interface, e)))
    }
}

/// Raw frame injector
pub struct PcapInjector {
    interface: String,
    cap: pcap::Capture<pcap::Active>,
}

impl PcapInjector {
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        let config = CaptureConfig::for_interface(interface).with_promiscuous(false);
        let cap = config.open()?;
        info!("Raw injector ready on {}", interface);
        Ok(Self {
            interface: interface.to_string(),
            cap,
        })
    }
}

impl FrameSink for PcapInjector {
    fn inject(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.cap
            .sendpacket(frame)
            .map_err(|e| TransportError::Send(format!("{}: {}", self.interface, e)))
    }
}

/// Raw frame capture
pub struct PcapCapture {
    config: CaptureConfig,
    cap: pcap::Capture<pcap::Active>,
}

impl PcapCapture {
    pub fn open(config: CaptureConfig) -> Result<Self, TransportError> {
        let cap = config.open()?;
        info!(
            "Capturing on {} (promiscuous={}, timeout={:?})",
            config.interface, config.promiscuous, config.read_timeout
        );
        Ok(Self { config, cap })
    }

    pub fn interface(&self) -> &str {
        &self.config.interface
    }
}

impl FrameSource for PcapCapture {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.cap.next_packet() {
            Ok(packet) => Ok(Some(packet.data.to_vec())),
            Err(pcap::Error::TimeoutExpired) => {
                debug!("no frame on {} within {:?}", self.config.interface, self.config.read_timeout);
                Ok(None)
            }
            Err(e) => Err(TransportError::Receive(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_defaults() {
        let config = CaptureConfig::for_interface("wlan0");
        assert_eq!(config.interface, "wlan0");
        assert!(config.promiscuous);
        assert_eq!(config.read_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_device_is_not_initialized() {
        let err = PcapCapture::open(CaptureConfig::for_interface("wlat-missing0")).err();
        assert!(matches!(err, Some(TransportError::NotInitialized(_))));
    }
}

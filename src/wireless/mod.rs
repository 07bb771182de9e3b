//! 802.11 Wireless Layer
//!
//! Frame layout helpers, radiotap handling, interface control and the pcap
//! injection/capture handles used by the raw transport.
//!
//! Live capture and injection need a wireless interface and CAP_NET_RAW.

pub mod capture;
pub mod ieee80211;
pub mod interface;
pub mod radiotap;

pub use capture::{CaptureConfig, PcapCapture, PcapInjector};
pub use ieee80211::{FrameControl, FrameType, MacAddr, MgmtHeader, SequenceControl};
pub use interface::{channel_to_freq, is_valid_channel, InterfaceMode, WirelessError, WirelessInterface};
pub use radiotap::{RadiotapHeader, RadiotapInfo};

//! Wi-Fi end-to-end latency measurement
//!
//! The sending endpoint pulses a timing output as each test unit leaves and
//! the receiving endpoint pulses its own output when the unit is recognised.
//! An external instrument measures the gap between the two pulse trains.
//!
//! Units are either raw 802.11 beacons carrying a marker SSID (injected and
//! captured below the network stack) or plain UDP datagrams.

pub mod app;
pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod session;
pub mod signal;
pub mod transport;
pub mod trigger;
pub mod wireless;

pub use config::Config;
pub use error::{LatencyError, Result};
pub use link::{ConnectionState, ConnectivityStateMachine, LinkEvent, ReadinessLevel, StationRegistry};
pub use session::{SessionCommand, SessionController, SessionReport};
pub use signal::Signals;
pub use transport::Transport;
pub use trigger::TimingTrigger;

//! Link connectivity
//!
//! Association state, retry handling, readiness signalling and the station
//! registry used when this endpoint runs the access point.

pub mod backend;
pub mod events;
pub mod machine;
pub mod registry;
pub mod state;

use thiserror::Error;

use crate::wireless::WirelessError;

pub use backend::{AccessPointSettings, CommandLink, LinkControl, StationCredentials};
pub use events::LinkEvent;
pub use machine::ConnectivityStateMachine;
pub use registry::{JoinOutcome, StationRecord, StationRegistry};
pub use state::{ConnectionState, ReadinessLevel, RetryBudget};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no wireless interface available")]
    NoInterface,

    #[error("connection failed after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error(transparent)]
    Wireless(#[from] WirelessError),
}

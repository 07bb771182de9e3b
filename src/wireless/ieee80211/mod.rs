//! 802.11 Frame Layout
//!
//! Header, frame-control and element helpers used to build and inspect the
//! test frames.

mod frame;
mod management;

pub use frame::*;
pub use management::*;

//! Test Frame Codec
//!
//! Pure encode/classify logic for the raw test frame. No I/O happens here.

pub mod classify;
pub mod frame;
pub mod header;
pub mod sequence;

use thiserror::Error;

pub use classify::{CapturePrefix, Classification, Classifier, NoMatchReason, MIN_CLASSIFIABLE_LEN};
pub use frame::{FrameBuilder, TestFrameTemplate, DEFAULT_SIGNATURE, DEFAULT_SOURCE};
pub use header::{RawPreHeader, RawTxParams, TxEncapsulation, RAW_PRE_HEADER_LEN, RAW_TX_MAGIC};
pub use sequence::{SequenceNumber, SEQUENCE_MAX};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot allocate {requested} byte frame buffer")]
    BufferExhausted { requested: usize },

    #[error("frame body of {0} bytes does not fit the length field")]
    FrameTooLarge(usize),
}

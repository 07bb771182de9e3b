//! Receive-side test frame classification
//!
//! Works on whatever the capture path hands over: a metadata prefix (fixed
//! driver bytes or a radiotap header) followed by the 802.11 frame. No FCS
//! check is done.

use serde::{Deserialize, Serialize};

use super::frame::DEFAULT_SIGNATURE;
use crate::wireless::ieee80211::{
    ElementId, ElementItem, Elements, MacAddr, MgmtHeader, BEACON_FIXED_LEN,
    ELEMENT_HEADER_LEN, MGMT_HEADER_LEN,
};
use crate::wireless::radiotap::RadiotapHeader;

/// Header, fixed beacon fields and one element header
pub const MIN_CLASSIFIABLE_LEN: usize = MGMT_HEADER_LEN + BEACON_FIXED_LEN + ELEMENT_HEADER_LEN;

const ELEMENTS_OFFSET: usize = MGMT_HEADER_LEN + BEACON_FIXED_LEN;

/// Metadata in front of captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePrefix {
    /// Driver metadata of a known size
    Fixed(usize),
    /// Radiotap header, length read per frame
    Radiotap,
}

impl Default for CapturePrefix {
    fn default() -> Self {
        CapturePrefix::Radiotap
    }
}

impl CapturePrefix {
    /// Prefix length for this capture, `None` if it cannot be determined
    pub fn len_for(&self, raw: &[u8]) -> Option<usize> {
        match self {
            CapturePrefix::Fixed(n) => Some(*n),
            CapturePrefix::Radiotap => RadiotapHeader::parse(raw).map(|h| h.length as usize),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoMatchReason {
    /// Shorter than the minimum classifiable length
    Truncated,
    /// Capture prefix could not be parsed
    BadPrefix,
    /// Frame control is not a beacon (strict mode only)
    NotBeacon,
    /// First element is not the SSID element
    NotIdentity,
    /// Element length runs past the buffer
    Malformed,
    /// SSID present but not the configured marker
    SignatureMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Match { sequence: u16, source: MacAddr },
    NoMatch(NoMatchReason),
}

impl Classification {
    pub fn is_match(&self) -> bool {
        matches!(self, Classification::Match { .. })
    }
}

/// Compares captured frames against the configured marker
#[derive(Debug, Clone)]
pub struct Classifier {
    signature: Vec<u8>,
    require_beacon: bool,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE.to_vec())
    }
}

impl Classifier {
    pub fn new(signature: Vec<u8>) -> Self {
        Self {
            signature,
            require_beacon: false,
        }
    }

    /// Also require the beacon frame-control value
    pub fn require_beacon(mut self, require: bool) -> Self {
        self.require_beacon = require;
        self
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Strip the prefix reported by `prefix`, then classify the remainder
    pub fn classify_captured(&self, raw: &[u8], prefix: CapturePrefix) -> Classification {
        match prefix.len_for(raw) {
            Some(len) => self.classify(raw, len),
            None => Classification::NoMatch(NoMatchReason::BadPrefix),
        }
    }

    /// Classify `raw` after skipping `capture_header_len` bytes of metadata
    pub fn classify(&self, raw: &[u8], capture_header_len: usize) -> Classification {
        let frame = match raw.get(capture_header_len..) {
            Some(f) if f.len() >= MIN_CLASSIFIABLE_LEN => f,
            _ => return Classification::NoMatch(NoMatchReason::Truncated),
        };

        let header = match MgmtHeader::parse(frame) {
            Some(h) => h,
            None => return Classification::NoMatch(NoMatchReason::Truncated),
        };

        if self.require_beacon && !header.frame_control.is_beacon() {
            return Classification::NoMatch(NoMatchReason::NotBeacon);
        }

        let element = match Elements::new(&frame[ELEMENTS_OFFSET..]).next() {
            Some(ElementItem::Element(e)) => e,
            Some(ElementItem::Malformed { .. }) => {
                return Classification::NoMatch(NoMatchReason::Malformed)
            }
            None => return Classification::NoMatch(NoMatchReason::Truncated),
        };

        if element.id != ElementId::Ssid {
            return Classification::NoMatch(NoMatchReason::NotIdentity);
        }

        if element.data != self.signature.as_slice() {
            return Classification::NoMatch(NoMatchReason::SignatureMismatch);
        }

        Classification::Match {
            sequence: header.seq_control.sequence_number(),
            source: header.addr2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::{FrameBuilder, TestFrameTemplate, DEFAULT_SOURCE};
    use crate::codec::header::{TxEncapsulation, RAW_PRE_HEADER_LEN};
    use crate::codec::sequence::SequenceNumber;

    fn test_frame(seq: u16) -> Vec<u8> {
        FrameBuilder::new(TestFrameTemplate::default())
            .build_frame(SequenceNumber::new(seq).unwrap())
            .unwrap()
    }

    #[test]
    fn test_exact_signature_matches() {
        let frame = test_frame(42);
        let result = Classifier::default().classify(&frame, RAW_PRE_HEADER_LEN);
        assert_eq!(
            result,
            Classification::Match {
                sequence: 42,
                source: DEFAULT_SOURCE
            }
        );
    }

    #[test]
    fn test_any_differing_byte_rejects() {
        let frame = test_frame(1);
        let ssid_data = RAW_PRE_HEADER_LEN + ELEMENTS_OFFSET + ELEMENT_HEADER_LEN;
        for i in 0..DEFAULT_SIGNATURE.len() {
            let mut corrupted = frame.clone();
            corrupted[ssid_data + i] ^= 0x01;
            assert_eq!(
                Classifier::default().classify(&corrupted, RAW_PRE_HEADER_LEN),
                Classification::NoMatch(NoMatchReason::SignatureMismatch),
                "byte {} flipped",
                i
            );
        }
    }

    #[test]
    fn test_length_mismatch_rejects() {
        let classifier = Classifier::new(b"WIFI_LATENCY_TES".to_vec());
        let frame = test_frame(1);
        assert!(!classifier.classify(&frame, RAW_PRE_HEADER_LEN).is_match());
    }

    #[test]
    fn test_short_buffers_are_truncated() {
        let frame = test_frame(1);
        let classifier = Classifier::default();
        for len in 0..RAW_PRE_HEADER_LEN + MIN_CLASSIFIABLE_LEN {
            assert_eq!(
                classifier.classify(&frame[..len], RAW_PRE_HEADER_LEN),
                Classification::NoMatch(NoMatchReason::Truncated)
            );
        }
        // Prefix longer than the capture itself
        assert_eq!(
            classifier.classify(&frame[..4], 6),
            Classification::NoMatch(NoMatchReason::Truncated)
        );
    }

    #[test]
    fn test_element_length_past_buffer() {
        let mut frame = test_frame(1);
        let ssid = RAW_PRE_HEADER_LEN + ELEMENTS_OFFSET;
        frame.truncate(ssid + ELEMENT_HEADER_LEN + 3);
        assert_eq!(
            Classifier::default().classify(&frame, RAW_PRE_HEADER_LEN),
            Classification::NoMatch(NoMatchReason::Malformed)
        );

        frame[ssid + 1] = 0xff;
        assert_eq!(
            Classifier::default().classify(&frame, RAW_PRE_HEADER_LEN),
            Classification::NoMatch(NoMatchReason::Malformed)
        );
    }

    #[test]
    fn test_first_element_must_be_ssid() {
        let mut frame = test_frame(1);
        frame[RAW_PRE_HEADER_LEN + ELEMENTS_OFFSET] = ElementId::SupportedRates as u8;
        assert_eq!(
            Classifier::default().classify(&frame, RAW_PRE_HEADER_LEN),
            Classification::NoMatch(NoMatchReason::NotIdentity)
        );
    }

    #[test]
    fn test_strict_beacon_check() {
        let mut frame = test_frame(1);
        // Another management subtype with the same body layout
        frame[RAW_PRE_HEADER_LEN] = 0x50;
        assert!(Classifier::default().classify(&frame, RAW_PRE_HEADER_LEN).is_match());
        assert_eq!(
            Classifier::default()
                .require_beacon(true)
                .classify(&frame, RAW_PRE_HEADER_LEN),
            Classification::NoMatch(NoMatchReason::NotBeacon)
        );
    }

    #[test]
    fn test_strict_beacon_check_ignores_flag_bits() {
        let mut frame = test_frame(1);
        // Retry and power management set by the air
        frame[RAW_PRE_HEADER_LEN + 1] = 0x18;
        assert!(Classifier::default()
            .require_beacon(true)
            .classify(&frame, RAW_PRE_HEADER_LEN)
            .is_match());
    }

    #[test]
    fn test_radiotap_prefix() {
        let frame = FrameBuilder::new(TestFrameTemplate {
            encapsulation: TxEncapsulation::Radiotap,
            ..Default::default()
        })
        .build_frame(SequenceNumber::new(9).unwrap())
        .unwrap();

        let classifier = Classifier::default();
        assert!(classifier.classify_captured(&frame, CapturePrefix::Radiotap).is_match());
        assert_eq!(
            classifier.classify_captured(&frame[..6], CapturePrefix::Radiotap),
            Classification::NoMatch(NoMatchReason::BadPrefix)
        );
    }

    #[test]
    fn test_fixed_driver_prefix() {
        // Receive-side driver metadata is 6 bytes, unrelated to the TX pre-header
        let mut raw = vec![0xaa; 6];
        raw.extend_from_slice(&test_frame(3)[RAW_PRE_HEADER_LEN..]);
        let result = Classifier::default().classify_captured(&raw, CapturePrefix::Fixed(6));
        assert!(matches!(result, Classification::Match { sequence: 3, .. }));
    }
}

//! Test frame construction
//!
//! The test frame is a broadcast beacon whose SSID element carries the
//! identification marker. The body is built once per session; only the
//! sequence control field changes between frames.

use super::header::{RawTxParams, TxEncapsulation};
use super::sequence::SequenceNumber;
use super::CodecError;
use crate::wireless::ieee80211::{
    write_element, BeaconFixed, ElementId, FrameControl, MacAddr, MgmtHeader, SequenceControl,
    MGMT_HEADER_LEN,
};

/// ASCII marker distinguishing test traffic from ambient beacons
pub const DEFAULT_SIGNATURE: &[u8] = b"WIFI_LATENCY_TEST";

/// Source address / BSSID stamped on test frames
pub const DEFAULT_SOURCE: MacAddr = MacAddr::new([0xa0, 0x69, 0x60, 0xe3, 0x52, 0x15]);

/// Fixed beacon fields carried by every test frame
pub const TEST_BEACON_FIXED: BeaconFixed = BeaconFixed {
    timestamp: 0x0028_a20c,
    interval: 0x0064,
    capability: 0x0411,
};

/// 1, 2, 5.5 and 11 Mbps (basic) plus 6, 9, 12, 18 Mbps
const SUPPORTED_RATES: [u8; 8] = [0x82, 0x84, 0x8b, 0x96, 0x0c, 0x12, 0x18, 0x24];

/// Offset of the sequence control field inside the 802.11 header
const SEQ_CTRL_OFFSET: usize = 22;

/// Everything that stays fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFrameTemplate {
    pub source: MacAddr,
    pub bssid: MacAddr,
    pub signature: Vec<u8>,
    pub channel: u8,
    pub tx: RawTxParams,
    pub encapsulation: TxEncapsulation,
}

impl Default for TestFrameTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE,
            bssid: DEFAULT_SOURCE,
            signature: DEFAULT_SIGNATURE.to_vec(),
            channel: 1,
            tx: RawTxParams::default(),
            encapsulation: TxEncapsulation::default(),
        }
    }
}

/// Builds encapsulated test frames for successive sequence numbers
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    template: TestFrameTemplate,
    body: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(template: TestFrameTemplate) -> Self {
        let body = encode_body(&template);
        Self { template, body }
    }

    pub fn template(&self) -> &TestFrameTemplate {
        &self.template
    }

    /// Length of the 802.11 frame without the TX prefix
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Length of a complete buffer handed to the injector
    pub fn frame_len(&self) -> usize {
        self.template.encapsulation.prefix_len() + self.body.len()
    }

    /// Build the TX prefix followed by the frame body with `sequence` set.
    ///
    /// The buffer is reserved up front; if the allocator refuses, the caller
    /// gets [`CodecError::BufferExhausted`] and should drop this frame.
    pub fn build_frame(&self, sequence: SequenceNumber) -> Result<Vec<u8>, CodecError> {
        let total = self.frame_len();
        let mut buf = Vec::new();
        buf.try_reserve_exact(total)
            .map_err(|_| CodecError::BufferExhausted { requested: total })?;

        let body_len = u16::try_from(self.body.len())
            .map_err(|_| CodecError::FrameTooLarge(self.body.len()))?;
        self.template.encapsulation.write_prefix(self.template.tx, body_len, &mut buf);

        let body_start = buf.len();
        buf.extend_from_slice(&self.body);

        let seq_ctrl = SequenceControl::new(sequence.value(), 0);
        let at = body_start + SEQ_CTRL_OFFSET;
        buf[at..at + 2].copy_from_slice(&seq_ctrl.0.to_le_bytes());

        Ok(buf)
    }
}

fn encode_body(template: &TestFrameTemplate) -> Vec<u8> {
    let mut body = Vec::with_capacity(MGMT_HEADER_LEN + 64);

    MgmtHeader {
        frame_control: FrameControl::BEACON,
        duration: 0,
        addr1: MacAddr::BROADCAST,
        addr2: template.source,
        addr3: template.bssid,
        seq_control: SequenceControl::default(),
    }
    .write_to(&mut body);

    TEST_BEACON_FIXED.write_to(&mut body);
    write_element(&mut body, ElementId::Ssid, &template.signature);
    write_element(&mut body, ElementId::SupportedRates, &SUPPORTED_RATES);
    write_element(&mut body, ElementId::DsParameter, &[template.channel]);

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::header::{RAW_PRE_HEADER_LEN, RAW_TX_MAGIC};
    use crate::wireless::ieee80211::BEACON_FIXED_LEN;

    #[test]
    fn test_body_layout() {
        let builder = FrameBuilder::new(TestFrameTemplate::default());
        let frame = builder.build_frame(SequenceNumber::FIRST).unwrap();
        let body = &frame[RAW_PRE_HEADER_LEN..];

        assert_eq!(&body[0..2], &[0x80, 0x00]);
        assert_eq!(&body[4..10], MacAddr::BROADCAST.as_bytes());
        assert_eq!(&body[10..16], &[0xa0, 0x69, 0x60, 0xe3, 0x52, 0x15]);
        assert_eq!(
            &body[MGMT_HEADER_LEN..MGMT_HEADER_LEN + BEACON_FIXED_LEN],
            &[0x0c, 0xa2, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64, 0x00, 0x11, 0x04]
        );

        let ssid = MGMT_HEADER_LEN + BEACON_FIXED_LEN;
        assert_eq!(body[ssid], 0);
        assert_eq!(body[ssid + 1] as usize, DEFAULT_SIGNATURE.len());
        assert_eq!(&body[ssid + 2..ssid + 2 + DEFAULT_SIGNATURE.len()], DEFAULT_SIGNATURE);
    }

    #[test]
    fn test_pre_header_tracks_body_len() {
        let builder = FrameBuilder::new(TestFrameTemplate {
            signature: b"SHORT".to_vec(),
            ..Default::default()
        });
        let frame = builder.build_frame(SequenceNumber::FIRST).unwrap();
        assert_eq!(frame[..4], RAW_TX_MAGIC.to_le_bytes());
        let packet_length = u16::from_le_bytes([frame[6], frame[7]]);
        assert_eq!(packet_length as usize, builder.body_len());
        assert_eq!(frame.len(), builder.frame_len());
    }

    #[test]
    fn test_sequence_field_updated() {
        let builder = FrameBuilder::new(TestFrameTemplate::default());
        for value in [1u16, 2, 300, 4095] {
            let seq = SequenceNumber::new(value).unwrap();
            let frame = builder.build_frame(seq).unwrap();
            let header = MgmtHeader::parse(&frame[RAW_PRE_HEADER_LEN..]).unwrap();
            assert_eq!(header.seq_control.sequence_number(), value);
            assert_eq!(header.seq_control.0 & 0x000f, 0);
        }
    }

    #[test]
    fn test_radiotap_encapsulation() {
        let builder = FrameBuilder::new(TestFrameTemplate {
            encapsulation: TxEncapsulation::Radiotap,
            ..Default::default()
        });
        let frame = builder.build_frame(SequenceNumber::FIRST).unwrap();
        let (rt, info) = crate::wireless::radiotap::parse_radiotap(&frame).unwrap();
        assert_eq!(info.rate, Some(RawTxParams::default().data_rate));
        assert_eq!(&frame[rt.length as usize..][..2], &[0x80, 0x00]);
    }
}

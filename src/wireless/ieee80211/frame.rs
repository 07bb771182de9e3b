//! 802.11 Frame Header
//!
//! Management header layout and the frame-control / sequence-control fields.
//! Both fields are kept as plain little-endian integers with mask/shift
//! accessors, so the layout does not depend on compiler bit-field rules.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a three-address management header
pub const MGMT_HEADER_LEN: usize = 24;

/// MAC address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = data.get(..6)?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2],
            self.0[3], self.0[4], self.0[5])
    }
}

/// Error parsing a textual MAC address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct MacParseError(String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| MacParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Frame type (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Management = 0,
    Control = 1,
    Data = 2,
    Extension = 3,
}

impl From<u8> for FrameType {
    fn from(val: u8) -> Self {
        match val & 0x03 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Extension,
        }
    }
}

/// Management subtypes we build or inspect
pub mod subtype {
    pub const BEACON: u8 = 0x08;
}

/// Frame control field as the 16-bit value read little-endian from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl(pub u16);

impl FrameControl {
    const TYPE_MASK: u16 = 0x000c;
    const TYPE_SHIFT: u16 = 2;
    const SUBTYPE_MASK: u16 = 0x00f0;
    const SUBTYPE_SHIFT: u16 = 4;

    /// Frame control of a beacon
    pub const BEACON: FrameControl = FrameControl::management(subtype::BEACON);

    pub const fn management(subtype: u8) -> Self {
        Self(((subtype as u16) << Self::SUBTYPE_SHIFT) & Self::SUBTYPE_MASK)
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 2] = data.get(..2)?.try_into().ok()?;
        Some(Self(u16::from_le_bytes(bytes)))
    }

    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub fn frame_type(self) -> FrameType {
        FrameType::from(((self.0 & Self::TYPE_MASK) >> Self::TYPE_SHIFT) as u8)
    }

    pub fn subtype(self) -> u8 {
        ((self.0 & Self::SUBTYPE_MASK) >> Self::SUBTYPE_SHIFT) as u8
    }

    /// Beacon regardless of the flag bits (retry, power management, ...)
    pub fn is_beacon(self) -> bool {
        self.frame_type() == FrameType::Management && self.subtype() == subtype::BEACON
    }
}

/// Sequence control: 12-bit sequence number above a 4-bit fragment number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceControl(pub u16);

impl SequenceControl {
    const SEQ_SHIFT: u16 = 4;
    const FRAG_MASK: u16 = 0x000f;

    pub fn new(sequence: u16, fragment: u8) -> Self {
        Self(((sequence & 0x0fff) << Self::SEQ_SHIFT) | (fragment as u16 & Self::FRAG_MASK))
    }

    pub fn sequence_number(self) -> u16 {
        self.0 >> Self::SEQ_SHIFT
    }
}

/// Three-address management frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MgmtHeader {
    pub frame_control: FrameControl,
    pub duration: u16,
    /// Destination
    pub addr1: MacAddr,
    /// Source
    pub addr2: MacAddr,
    /// BSSID
    pub addr3: MacAddr,
    pub seq_control: SequenceControl,
}

impl MgmtHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MGMT_HEADER_LEN {
            return None;
        }

        Some(Self {
            frame_control: FrameControl::parse(data)?,
            duration: u16::from_le_bytes([data[2], data[3]]),
            addr1: MacAddr::from_slice(&data[4..])?,
            addr2: MacAddr::from_slice(&data[10..])?,
            addr3: MacAddr::from_slice(&data[16..])?,
            seq_control: SequenceControl(u16::from_le_bytes([data[22], data[23]])),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.frame_control.to_bytes());
        out.extend_from_slice(&self.duration.to_le_bytes());
        out.extend_from_slice(self.addr1.as_bytes());
        out.extend_from_slice(self.addr2.as_bytes());
        out.extend_from_slice(self.addr3.as_bytes());
        out.extend_from_slice(&self.seq_control.0.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_frame_control_bytes() {
        assert_eq!(FrameControl::BEACON.to_bytes(), [0x80, 0x00]);
        let fc = FrameControl::parse(&[0x80, 0x00]).unwrap();
        assert!(fc.is_beacon());
        assert_eq!(fc.frame_type(), FrameType::Management);
        assert_eq!(fc.subtype(), subtype::BEACON);
    }

    #[test]
    fn test_frame_control_flags() {
        // Retried beacon with power management set
        let fc = FrameControl::parse(&[0x80, 0x18]).unwrap();
        assert!(fc.is_beacon());
        assert_ne!(fc, FrameControl::BEACON);

        // QoS data, to-DS, protected: same subtype bits, wrong type
        let fc = FrameControl::parse(&[0x88, 0x41]).unwrap();
        assert_eq!(fc.frame_type(), FrameType::Data);
        assert_eq!(fc.subtype(), 8);
        assert!(!fc.is_beacon());
    }

    #[test]
    fn test_sequence_control_fields() {
        let sc = SequenceControl::new(0x123, 0x4);
        assert_eq!(sc.0, 0x1234);
        assert_eq!(sc.sequence_number(), 0x123);
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "A0:69:60:e3:52:15".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0xa0, 0x69, 0x60, 0xe3, 0x52, 0x15]);
        assert_eq!(mac.to_string(), "a0:69:60:e3:52:15");
        assert!("a0:69:60".parse::<MacAddr>().is_err());
        assert!("a0:69:60:e3:52:15:00".parse::<MacAddr>().is_err());
        assert_eq!(MacAddr::BROADCAST.to_string(), "ff:ff:ff:ff:ff:ff");
    }

    #[test]
    fn test_header_roundtrip() {
        let header = MgmtHeader {
            frame_control: FrameControl::BEACON,
            duration: 0,
            addr1: MacAddr::BROADCAST,
            addr2: MacAddr::new([1, 2, 3, 4, 5, 6]),
            addr3: MacAddr::new([1, 2, 3, 4, 5, 6]),
            seq_control: SequenceControl::new(7, 0),
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf);
        assert_eq!(buf.len(), MGMT_HEADER_LEN);
        assert_eq!(MgmtHeader::parse(&buf), Some(header));
        assert!(MgmtHeader::parse(&buf[..23]).is_none());
    }
}

//! Transmit encapsulation
//!
//! The driver pre-header tells the Wi-Fi driver that the buffer is an
//! already framed raw transmission. It mirrors a C struct with natural
//! alignment, little-endian:
//!
//! ```text
//! 0      4         5    6           8        9      10      11
//! +------+---------+----+-----------+--------+------+-------+----+
//! |magic |data_rate|pad |packet_len |tx_mode |queue |flags  |pad |
//! +------+---------+----+-----------+--------+------+-------+----+
//! ```

use serde::{Deserialize, Serialize};

use crate::wireless::radiotap;

/// Driver sentinel for pre-framed raw transmissions
pub const RAW_TX_MAGIC: u32 = 0x1234_5678;

/// Encoded size of [`RawPreHeader`]
pub const RAW_PRE_HEADER_LEN: usize = 12;

/// Per-session radio parameters carried in the pre-header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTxParams {
    /// Legacy rate (500 kbps units) or MCS index, depending on `tx_mode`
    pub data_rate: u8,
    /// Rate flags: 0 = legacy, 1 = HT, 2 = VHT, ...
    pub tx_mode: u8,
    /// Access category queue (0 = BK, 1 = BE, 2 = VI, 3 = VO)
    pub queue: u8,
}

impl Default for RawTxParams {
    fn default() -> Self {
        Self {
            data_rate: 12,
            tx_mode: 0,
            queue: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPreHeader {
    pub magic: u32,
    pub data_rate: u8,
    pub packet_length: u16,
    pub tx_mode: u8,
    pub queue: u8,
    /// Reserved for the driver
    pub flags: u8,
}

impl RawPreHeader {
    pub fn new(params: RawTxParams, packet_length: u16) -> Self {
        Self {
            magic: RAW_TX_MAGIC,
            data_rate: params.data_rate,
            packet_length,
            tx_mode: params.tx_mode,
            queue: params.queue,
            flags: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; RAW_PRE_HEADER_LEN] {
        let mut out = [0u8; RAW_PRE_HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4] = self.data_rate;
        out[6..8].copy_from_slice(&self.packet_length.to_le_bytes());
        out[8] = self.tx_mode;
        out[9] = self.queue;
        out[10] = self.flags;
        out
    }
}

/// What goes in front of the 802.11 frame on injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEncapsulation {
    /// Driver pre-header with the raw-TX magic
    #[default]
    DriverPreHeader,
    /// Radiotap TX header (Linux monitor-mode injection)
    Radiotap,
}

impl TxEncapsulation {
    pub fn prefix_len(self) -> usize {
        match self {
            TxEncapsulation::DriverPreHeader => RAW_PRE_HEADER_LEN,
            TxEncapsulation::Radiotap => radiotap::tx_header(0).len(),
        }
    }

    pub(crate) fn write_prefix(self, params: RawTxParams, body_len: u16, out: &mut Vec<u8>) {
        match self {
            TxEncapsulation::DriverPreHeader => {
                out.extend_from_slice(&RawPreHeader::new(params, body_len).to_bytes())
            }
            TxEncapsulation::Radiotap => out.extend_from_slice(&radiotap::tx_header(params.data_rate)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_header_layout() {
        let hdr = RawPreHeader::new(RawTxParams { data_rate: 0x0c, tx_mode: 1, queue: 3 }, 0x0118);
        assert_eq!(
            hdr.to_bytes(),
            [0x78, 0x56, 0x34, 0x12, 0x0c, 0x00, 0x18, 0x01, 0x01, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encapsulation_prefix_len() {
        let mut out = Vec::new();
        TxEncapsulation::Radiotap.write_prefix(RawTxParams::default(), 10, &mut out);
        assert_eq!(out.len(), TxEncapsulation::Radiotap.prefix_len());

        out.clear();
        TxEncapsulation::DriverPreHeader.write_prefix(RawTxParams::default(), 10, &mut out);
        assert_eq!(out.len(), RAW_PRE_HEADER_LEN);
    }
}

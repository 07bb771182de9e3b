//! Radiotap Header
//!
//! Linux monitor interfaces deliver captured frames behind a radiotap header
//! and expect one in front of injected frames.
//!
//! Reference: https://www.radiotap.org/

/// Radiotap present flags
pub mod flags {
    pub const TSFT: u32 = 1 << 0;
    pub const FLAGS: u32 = 1 << 1;
    pub const RATE: u32 = 1 << 2;
    pub const CHANNEL: u32 = 1 << 3;
    pub const FHSS: u32 = 1 << 4;
    pub const DBM_ANTSIGNAL: u32 = 1 << 5;
    pub const DBM_ANTNOISE: u32 = 1 << 6;
    pub const EXT: u32 = 1 << 31;
}

/// Fixed part of every radiotap header
pub const RADIOTAP_MIN_LEN: usize = 8;

/// Parsed radiotap header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadiotapHeader {
    /// Header version (always 0)
    pub version: u8,
    /// Total header length including fields
    pub length: u16,
    /// Present flags indicating which fields are present
    pub present_flags: u32,
}

impl RadiotapHeader {
    /// Parse the fixed part and check the declared length fits the buffer.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < RADIOTAP_MIN_LEN || data[0] != 0 {
            return None;
        }

        let length = u16::from_le_bytes([data[2], data[3]]);
        if (length as usize) < RADIOTAP_MIN_LEN || data.len() < length as usize {
            return None;
        }

        Some(Self {
            version: data[0],
            length,
            present_flags: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// Fields of interest for a received test frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadiotapInfo {
    /// MAC timestamp in microseconds
    pub tsft: Option<u64>,
    /// Data rate in 500Kbps units
    pub rate: Option<u8>,
    /// Channel frequency in MHz
    pub channel_freq: Option<u16>,
    /// Signal strength in dBm
    pub signal_dbm: Option<i8>,
}

impl RadiotapInfo {
    /// Channel number derived from the frequency
    pub fn channel(&self) -> Option<u8> {
        self.channel_freq.map(freq_to_channel)
    }
}

/// Parse the header plus the leading fields we report on.
pub fn parse_radiotap(data: &[u8]) -> Option<(RadiotapHeader, RadiotapInfo)> {
    let header = RadiotapHeader::parse(data)?;
    if header.present_flags & flags::EXT != 0 {
        // Extended bitmaps shift every field; report the header only
        return Some((header, RadiotapInfo::default()));
    }

    let fields = &data[RADIOTAP_MIN_LEN..header.length as usize];
    let present = header.present_flags;
    let mut info = RadiotapInfo::default();
    let mut pos = 0usize;

    // TSFT (8 bytes, 8-byte aligned relative to header start)
    if present & flags::TSFT != 0 {
        pos = align(pos, 8);
        if let Some(b) = fields.get(pos..pos + 8) {
            info.tsft = b.try_into().ok().map(u64::from_le_bytes);
        }
        pos += 8;
    }

    if present & flags::FLAGS != 0 {
        pos += 1;
    }

    if present & flags::RATE != 0 {
        info.rate = fields.get(pos).copied();
        pos += 1;
    }

    // Channel (4 bytes, 2-byte aligned)
    if present & flags::CHANNEL != 0 {
        pos = align(pos, 2);
        if let Some(b) = fields.get(pos..pos + 2) {
            info.channel_freq = Some(u16::from_le_bytes([b[0], b[1]]));
        }
        pos += 4;
    }

    if present & flags::FHSS != 0 {
        pos += 2;
    }

    if present & flags::DBM_ANTSIGNAL != 0 {
        info.signal_dbm = fields.get(pos).map(|&b| b as i8);
    }

    Some((header, info))
}

// Field offsets are aligned relative to the header start, which is itself
// 8 bytes long, so aligning the offset into `fields` is equivalent.
fn align(pos: usize, to: usize) -> usize {
    (pos + to - 1) / to * to
}

/// Minimal TX radiotap header carrying flags and a legacy rate.
pub fn tx_header(rate_500kbps: u8) -> [u8; 10] {
    let present = flags::FLAGS | flags::RATE;
    let p = present.to_le_bytes();
    [0x00, 0x00, 10, 0x00, p[0], p[1], p[2], p[3], 0x00, rate_500kbps]
}

/// Convert frequency to channel number
pub fn freq_to_channel(freq: u16) -> u8 {
    if (2412..=2484).contains(&freq) {
        if freq == 2484 {
            14
        } else {
            ((freq - 2407) / 5) as u8
        }
    } else if (5170..=5825).contains(&freq) {
        ((freq - 5000) / 5) as u8
    } else {
        0
    }
}

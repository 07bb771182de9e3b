//! 802.11 Management Frame Body
//!
//! Beacon fixed fields and the tagged information element list.

/// Beacon fixed fields: timestamp, interval, capability
pub const BEACON_FIXED_LEN: usize = 12;

/// Element header: id + length
pub const ELEMENT_HEADER_LEN: usize = 2;

/// Information Element (IE) types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementId {
    Ssid = 0,
    SupportedRates = 1,
    DsParameter = 3,
    Tim = 5,
    Country = 7,
    HtCapabilities = 45,
    RsnInfo = 48,
    ExtendedSupportedRates = 50,
    VendorSpecific = 221,
    Unknown = 255,
}

impl From<u8> for ElementId {
    fn from(val: u8) -> Self {
        match val {
            0 => ElementId::Ssid,
            1 => ElementId::SupportedRates,
            3 => ElementId::DsParameter,
            5 => ElementId::Tim,
            7 => ElementId::Country,
            45 => ElementId::HtCapabilities,
            48 => ElementId::RsnInfo,
            50 => ElementId::ExtendedSupportedRates,
            221 => ElementId::VendorSpecific,
            _ => ElementId::Unknown,
        }
    }
}

/// Borrowed information element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub id: ElementId,
    pub raw_id: u8,
    pub data: &'a [u8],
}

/// Result of walking one element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementItem<'a> {
    Element(Element<'a>),
    /// Declared length runs past the end of the buffer
    Malformed { raw_id: u8, declared: usize, available: usize },
}

/// Iterator over the tagged element list.
///
/// Stops at the first malformed element after yielding it; never reads past
/// the end of the buffer.
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Elements<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, done: false }
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = ElementItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos + ELEMENT_HEADER_LEN > self.data.len() {
            return None;
        }

        let raw_id = self.data[self.pos];
        let len = self.data[self.pos + 1] as usize;
        let start = self.pos + ELEMENT_HEADER_LEN;
        let available = self.data.len() - start;

        if len > available {
            self.done = true;
            return Some(ElementItem::Malformed { raw_id, declared: len, available });
        }

        self.pos = start + len;
        Some(ElementItem::Element(Element {
            id: ElementId::from(raw_id),
            raw_id,
            data: &self.data[start..start + len],
        }))
    }
}

/// Append one element. Payloads longer than 255 bytes are truncated.
pub fn write_element(out: &mut Vec<u8>, id: ElementId, data: &[u8]) {
    let len = data.len().min(u8::MAX as usize);
    out.push(id as u8);
    out.push(len as u8);
    out.extend_from_slice(&data[..len]);
}

/// Beacon fixed fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFixed {
    /// Timestamp (microseconds)
    pub timestamp: u64,
    /// Beacon interval (TUs, 1 TU = 1024 microseconds)
    pub interval: u16,
    /// Capability information
    pub capability: u16,
}

impl BeaconFixed {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.interval.to_le_bytes());
        out.extend_from_slice(&self.capability.to_le_bytes());
    }
}

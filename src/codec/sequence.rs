//! 12-bit test frame sequence counter

/// Largest value representable in the 802.11 sequence number field
pub const SEQUENCE_MAX: u16 = 0x0fff;

/// Sequence number of a test frame.
///
/// Zero is reserved as the "never sent" sentinel: incrementing past
/// [`SEQUENCE_MAX`] wraps to 1, so a transmitted frame never carries 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(u16);

impl SequenceNumber {
    pub const UNSENT: SequenceNumber = SequenceNumber(0);
    pub const FIRST: SequenceNumber = SequenceNumber(1);

    /// `None` if `value` does not fit in 12 bits
    pub fn new(value: u16) -> Option<Self> {
        (value <= SEQUENCE_MAX).then_some(Self(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn is_unsent(self) -> bool {
        self.0 == 0
    }

    /// The value following this one
    pub fn next(self) -> Self {
        if self.0 >= SEQUENCE_MAX {
            Self::FIRST
        } else {
            Self(self.0 + 1)
        }
    }

    pub fn increment(&mut self) {
        *self = self.next();
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

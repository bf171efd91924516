pub mod timestamped;

use std::fmt;

pub use self::timestamped::Timestamped;

/// Cell version in the backing store.
///
/// Larger values are newer. Ceilings are exclusive: a read "as of" `ts` only
/// sees cells strictly older than `ts`.
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Default)]
pub struct Timestamp(u64);

pub(crate) const EPOCH: Timestamp = Timestamp(0);

impl Timestamp {
    /// Newest possible version, used for unbounded reads.
    pub const LATEST: Timestamp = Timestamp(u64::MAX);

    /// Construct a timestamp from its raw value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value backing this timestamp.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The timestamp right after `self`, saturating at [`Timestamp::LATEST`].
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for Timestamp {
    fn from(ts: u64) -> Self {
        Self(ts)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

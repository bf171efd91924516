use std::fmt;

use bytes::Bytes;

use crate::timestamp::Timestamp;

pub const SCANNED_DATA_ROW_COUNT: &str = "ScannedDataRowCount";
pub const REBUILT_INDEX_ROW_COUNT: &str = "RebuiltIndexRowCount";
pub const BEFORE_REBUILD_VALID_INDEX_ROW_COUNT: &str = "BeforeRebuildValidIndexRowCount";
pub const BEFORE_REBUILD_EXPIRED_INDEX_ROW_COUNT: &str = "BeforeRebuildExpiredIndexRowCount";
pub const BEFORE_REBUILD_MISSING_INDEX_ROW_COUNT: &str = "BeforeRebuildMissingIndexRowCount";
pub const BEFORE_REBUILD_INVALID_INDEX_ROW_COUNT: &str = "BeforeRebuildInvalidIndexRowCount";
pub const BEFORE_REBUILD_BEYOND_MAX_LOOKBACK_MISSING_INDEX_ROW_COUNT: &str =
    "BeforeRebuildBeyondMaxLookBackMissingIndexRowCount";
pub const BEFORE_REBUILD_BEYOND_MAX_LOOKBACK_INVALID_INDEX_ROW_COUNT: &str =
    "BeforeRebuildBeyondMaxLookBackInvalidIndexRowCount";
pub const AFTER_REBUILD_VALID_INDEX_ROW_COUNT: &str = "AfterRebuildValidIndexRowCount";
/// Name older writers used for [`AFTER_REBUILD_VALID_INDEX_ROW_COUNT`]. Read,
/// never written.
pub const LEGACY_AFTER_REBUILD_VALID_INDEX_ROW_COUNT: &str = "AfterValidExpiredIndexRowCount";
pub const AFTER_REBUILD_EXPIRED_INDEX_ROW_COUNT: &str = "AfterRebuildExpiredIndexRowCount";
pub const AFTER_REBUILD_MISSING_INDEX_ROW_COUNT: &str = "AfterRebuildMissingIndexRowCount";
pub const AFTER_REBUILD_INVALID_INDEX_ROW_COUNT: &str = "AfterRebuildInvalidIndexRowCount";
pub const AFTER_REBUILD_BEYOND_MAX_LOOKBACK_MISSING_INDEX_ROW_COUNT: &str =
    "AfterRebuildBeyondMaxLookBackMissingIndexRowCount";
pub const AFTER_REBUILD_BEYOND_MAX_LOOKBACK_INVALID_INDEX_ROW_COUNT: &str =
    "AfterRebuildBeyondMaxLookBackInvalidIndexRowCount";

const BEFORE_COUNTERS: [&str; 6] = [
    BEFORE_REBUILD_VALID_INDEX_ROW_COUNT,
    BEFORE_REBUILD_EXPIRED_INDEX_ROW_COUNT,
    BEFORE_REBUILD_MISSING_INDEX_ROW_COUNT,
    BEFORE_REBUILD_INVALID_INDEX_ROW_COUNT,
    BEFORE_REBUILD_BEYOND_MAX_LOOKBACK_MISSING_INDEX_ROW_COUNT,
    BEFORE_REBUILD_BEYOND_MAX_LOOKBACK_INVALID_INDEX_ROW_COUNT,
];

const AFTER_COUNTERS: [&str; 6] = [
    AFTER_REBUILD_VALID_INDEX_ROW_COUNT,
    AFTER_REBUILD_EXPIRED_INDEX_ROW_COUNT,
    AFTER_REBUILD_MISSING_INDEX_ROW_COUNT,
    AFTER_REBUILD_INVALID_INDEX_ROW_COUNT,
    AFTER_REBUILD_BEYOND_MAX_LOOKBACK_MISSING_INDEX_ROW_COUNT,
    AFTER_REBUILD_BEYOND_MAX_LOOKBACK_INVALID_INDEX_ROW_COUNT,
];

/// Whether `name` is one of the persisted counter columns.
pub fn is_counter(name: &[u8]) -> bool {
    std::str::from_utf8(name).is_ok_and(|name| {
        name == SCANNED_DATA_ROW_COUNT
            || name == REBUILT_INDEX_ROW_COUNT
            || name == LEGACY_AFTER_REBUILD_VALID_INDEX_ROW_COUNT
            || BEFORE_COUNTERS.contains(&name)
            || AFTER_COUNTERS.contains(&name)
    })
}

/// When an index rebuild verifies the index against the data table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyPhase {
    /// Rebuild without verification.
    None,
    /// Verify before rebuilding.
    Before,
    /// Verify after rebuilding.
    After,
    /// Verify before and after rebuilding.
    Both,
    /// Verify without rebuilding.
    Only,
}

impl VerifyPhase {
    /// Whether results of this phase carry the before-rebuild counters.
    pub fn has_before(self) -> bool {
        matches!(self, VerifyPhase::Before | VerifyPhase::Both | VerifyPhase::Only)
    }

    /// Whether results of this phase carry the after-rebuild counters.
    pub fn has_after(self) -> bool {
        matches!(self, VerifyPhase::After | VerifyPhase::Both)
    }
}

/// Index row counters of one verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseResult {
    pub valid: u64,
    pub expired: u64,
    pub missing: u64,
    pub invalid: u64,
    /// Missing rows whose history is past the max lookback window, so they
    /// cannot be judged.
    pub beyond_max_lookback_missing: u64,
    /// Invalid rows whose history is past the max lookback window.
    pub beyond_max_lookback_invalid: u64,
}

impl PhaseResult {
    pub fn add(&mut self, other: &PhaseResult) {
        self.valid += other.valid;
        self.expired += other.expired;
        self.missing += other.missing;
        self.invalid += other.invalid;
        self.beyond_max_lookback_missing += other.beyond_max_lookback_missing;
        self.beyond_max_lookback_invalid += other.beyond_max_lookback_invalid;
    }

    /// Failed when any row is missing or invalid. Rows beyond the max
    /// lookback window do not count.
    pub fn is_failed(&self) -> bool {
        self.missing + self.invalid > 0
    }

    fn values(&self) -> [u64; 6] {
        [
            self.valid,
            self.expired,
            self.missing,
            self.invalid,
            self.beyond_max_lookback_missing,
            self.beyond_max_lookback_invalid,
        ]
    }

    fn slot(&mut self, position: usize) -> &mut u64 {
        match position {
            0 => &mut self.valid,
            1 => &mut self.expired,
            2 => &mut self.missing,
            3 => &mut self.invalid,
            4 => &mut self.beyond_max_lookback_missing,
            _ => &mut self.beyond_max_lookback_invalid,
        }
    }
}

/// Outcome of verifying the index rows of one run, for one region or summed
/// over all regions of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    /// Upper timestamp of the run's scans; identifies the run.
    pub scan_max_ts: Timestamp,
    pub start_row: Bytes,
    pub stop_row: Bytes,
    pub scanned_data_row_count: u64,
    pub rebuilt_index_row_count: u64,
    pub before: PhaseResult,
    pub after: PhaseResult,
}

impl VerificationResult {
    pub fn new(scan_max_ts: Timestamp) -> Self {
        Self {
            scan_max_ts,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, start_row: impl Into<Bytes>, stop_row: impl Into<Bytes>) -> Self {
        self.start_row = start_row.into();
        self.stop_row = stop_row.into();
        self
    }

    /// Sum the counters of `other` into this result.
    pub fn add(&mut self, other: &VerificationResult) {
        self.scanned_data_row_count += other.scanned_data_row_count;
        self.rebuilt_index_row_count += other.rebuilt_index_row_count;
        self.before.add(&other.before);
        self.after.add(&other.after);
    }

    /// Whether the pass that `phase` reports on found broken index rows.
    ///
    /// `Before` and `Only` judge the index as found; `After` and `Both` judge
    /// it as rebuilt. `None` never fails.
    pub fn is_verification_failed(&self, phase: VerifyPhase) -> bool {
        match phase {
            VerifyPhase::Before | VerifyPhase::Only => self.before.is_failed(),
            VerifyPhase::After | VerifyPhase::Both => self.after.is_failed(),
            VerifyPhase::None => false,
        }
    }

    /// Counter columns persisted for `phase`, by name.
    pub fn counters(&self, phase: VerifyPhase) -> Vec<(&'static str, u64)> {
        let mut counters = vec![
            (SCANNED_DATA_ROW_COUNT, self.scanned_data_row_count),
            (REBUILT_INDEX_ROW_COUNT, self.rebuilt_index_row_count),
        ];
        if phase.has_before() {
            counters.extend(BEFORE_COUNTERS.into_iter().zip(self.before.values()));
        }
        if phase.has_after() {
            counters.extend(AFTER_COUNTERS.into_iter().zip(self.after.values()));
        }
        counters
    }

    /// Add `value` to the counter named `counter`.
    ///
    /// Returns `false`, leaving the result unchanged, for names that are not
    /// counters.
    pub fn update(&mut self, counter: &[u8], value: u64) -> bool {
        let Some(slot) = self.counter_mut(counter) else {
            return false;
        };
        *slot += value;
        true
    }

    fn counter_mut(&mut self, counter: &[u8]) -> Option<&mut u64> {
        let counter = std::str::from_utf8(counter).ok()?;
        match counter {
            SCANNED_DATA_ROW_COUNT => return Some(&mut self.scanned_data_row_count),
            REBUILT_INDEX_ROW_COUNT => return Some(&mut self.rebuilt_index_row_count),
            LEGACY_AFTER_REBUILD_VALID_INDEX_ROW_COUNT => return Some(&mut self.after.valid),
            _ => {}
        }
        if let Some(position) = BEFORE_COUNTERS.iter().position(|name| *name == counter) {
            return Some(self.before.slot(position));
        }
        AFTER_COUNTERS
            .iter()
            .position(|name| *name == counter)
            .map(|position| self.after.slot(position))
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: scanned {}, rebuilt {}, before {:?}, after {:?}",
            self.scan_max_ts,
            self.scanned_data_row_count,
            self.rebuilt_index_row_count,
            self.before,
            self.after
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VerificationResult {
        let mut result = VerificationResult::new(Timestamp::new(42));
        result.scanned_data_row_count = 100;
        result.rebuilt_index_row_count = 100;
        result.before.valid = 95;
        result.before.missing = 5;
        result.after.valid = 100;
        result
    }

    #[test]
    fn counters_follow_the_phase() {
        let result = sample();
        assert_eq!(result.counters(VerifyPhase::None).len(), 2);
        assert_eq!(result.counters(VerifyPhase::Before).len(), 8);
        assert_eq!(result.counters(VerifyPhase::Only).len(), 8);
        assert_eq!(result.counters(VerifyPhase::After).len(), 8);
        assert_eq!(result.counters(VerifyPhase::Both).len(), 14);

        let after = result.counters(VerifyPhase::After);
        assert!(after.contains(&(AFTER_REBUILD_VALID_INDEX_ROW_COUNT, 100)));
        assert!(!after
            .iter()
            .any(|(name, _)| *name == BEFORE_REBUILD_MISSING_INDEX_ROW_COUNT));
    }

    #[test]
    fn update_reads_back_every_counter() {
        let result = sample();
        let mut read = VerificationResult::new(Timestamp::new(42));
        for (name, value) in result.counters(VerifyPhase::Both) {
            assert!(read.update(name.as_bytes(), value));
        }
        assert_eq!(read, result);
        assert!(!read.update(b"SomethingElse", 1));
    }

    #[test]
    fn legacy_after_valid_name_is_read() {
        assert!(is_counter(LEGACY_AFTER_REBUILD_VALID_INDEX_ROW_COUNT.as_bytes()));
        let mut read = VerificationResult::new(Timestamp::new(42));
        assert!(read.update(LEGACY_AFTER_REBUILD_VALID_INDEX_ROW_COUNT.as_bytes(), 7));
        assert_eq!(read.after.valid, 7);
        assert!(!sample()
            .counters(VerifyPhase::Both)
            .iter()
            .any(|(name, _)| *name == LEGACY_AFTER_REBUILD_VALID_INDEX_ROW_COUNT));
    }

    #[test]
    fn failure_ignores_beyond_lookback_rows() {
        let mut result = sample();
        assert!(result.is_verification_failed(VerifyPhase::Before));
        assert!(result.is_verification_failed(VerifyPhase::Only));
        assert!(!result.is_verification_failed(VerifyPhase::After));
        assert!(!result.is_verification_failed(VerifyPhase::Both));
        assert!(!result.is_verification_failed(VerifyPhase::None));

        result.after.beyond_max_lookback_invalid = 3;
        result.after.beyond_max_lookback_missing = 2;
        assert!(!result.is_verification_failed(VerifyPhase::Both));
        result.after.invalid = 1;
        assert!(result.is_verification_failed(VerifyPhase::Both));
    }

    #[test]
    fn add_sums_counters() {
        let mut total = sample();
        total.add(&sample());
        assert_eq!(total.scanned_data_row_count, 200);
        assert_eq!(total.before.missing, 10);
        assert_eq!(total.after.valid, 200);
        assert_eq!(total.scan_max_ts, Timestamp::new(42));
    }
}

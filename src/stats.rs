//! Stats Module - Global Collection Counters
//!
//! Two counters are the only mutable state shared between scheduler
//! threads: the number of collections performed and the number of
//! words reclaimed. Both are updated once per collection under a
//! short lock so `info()` snapshots stay mutually consistent.

use lazy_static::lazy_static;
use parking_lot::Mutex;

/// Snapshot of the global collection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcInfo {
    /// Number of garbage collections.
    pub collections: u64,
    /// Words reclaimed across all collections.
    pub reclaimed: u64,
}

lazy_static! {
    static ref INFO: Mutex<GcInfo> = Mutex::new(GcInfo::default());
}

/// Record one finished collection.
pub(crate) fn record_collection(reclaimed_words: usize) {
    let mut info = INFO.lock();
    info.collections += 1;
    info.reclaimed += reclaimed_words as u64;
}

/// Snapshot of the global counters.
pub fn info() -> GcInfo {
    *INFO.lock()
}

/// Reset the counters. Test hook.
pub fn reset() {
    *INFO.lock() = GcInfo::default();
}

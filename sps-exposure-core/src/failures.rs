//! Deduplicated, thread-safe accumulator of human-readable failure reasons.

use indexmap::IndexSet;
use parking_lot::Mutex;

const ABORTED_MARKER: &str = "ExposureAborted(";

#[derive(Debug, Default)]
pub struct FailureSet {
    reasons: Mutex<IndexSet<String>>,
}

impl FailureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `reason` unless it is an `ExposureAborted(...)` entry and a
    /// more specific reason is already recorded.
    pub fn add(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut reasons = self.reasons.lock();
        if reason.starts_with(ABORTED_MARKER) && !reasons.is_empty() {
            return;
        }
        reasons.insert(reason);
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.lock().is_empty()
    }

    pub fn format(&self) -> String {
        self.reasons.lock().iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_identical_reasons() {
        let set = FailureSet::new();
        set.add("WipeFailed(ccd_b1 with timeout)");
        set.add("WipeFailed(ccd_b1 with timeout)");
        assert_eq!(set.format(), "WipeFailed(ccd_b1 with timeout)");
    }

    #[test]
    fn suppresses_aborted_when_other_reason_present() {
        let set = FailureSet::new();
        set.add("ShuttersFailed(enu_sm1 with closed early)");
        set.add("ExposureAborted(exposure with operator request)");
        assert_eq!(set.format(), "ShuttersFailed(enu_sm1 with closed early)");
    }

    #[test]
    fn records_aborted_when_it_is_the_only_reason() {
        let set = FailureSet::new();
        set.add("ExposureAborted(exposure with operator request)");
        assert_eq!(set.format(), "ExposureAborted(exposure with operator request)");
    }

    #[test]
    fn preserves_insertion_order() {
        let set = FailureSet::new();
        set.add("a");
        set.add("b");
        assert_eq!(set.format(), "a,b");
    }
}

//! Progress tracking for ledger synchronization.
//!
//! The `SyncProgressTracker` accumulates what a run has done so far: windows scheduled, settled
//! and dropped, records fetched, and records the parser rejected. Pagination and strategies feed
//! it through the shared `SyncContext`; the orchestrator drains the failures into the final
//! `SyncResult` and logs the summary.

use crate::sync::types::{SkippedRecord, WindowFailure};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Accumulators for one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncProgressTracker {
    windows_scheduled: usize,
    windows_completed: usize,
    records_fetched: usize,
    failures: Vec<WindowFailure>,
    skipped_records: Vec<SkippedRecord>,
    /// Completed windows at the last progress log line
    last_logged: usize,
}

impl SyncProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scheduled(&mut self, windows: usize) {
        self.windows_scheduled += windows;
    }

    pub fn record_completed(&mut self) {
        self.windows_completed += 1;
    }

    pub fn record_records(&mut self, count: usize) {
        self.records_fetched += count;
    }

    pub fn record_failure(&mut self, label: String, message: String) {
        warn!("Dropping {}: {}", label, message);
        self.failures.push(WindowFailure { label, message });
    }

    pub fn record_skipped(&mut self, index: u64, message: String) {
        warn!("Skipping record {}: {}", index, message);
        self.skipped_records.push(SkippedRecord { index, message });
    }

    /// Log progress every 100 settled windows or when forced.
    pub fn log_progress(&mut self, force: bool) {
        let settled = self.windows_completed + self.failures.len();
        if force || settled.saturating_sub(self.last_logged) >= 100 {
            info!(
                "Sync progress: {}/{} windows settled, {} records fetched",
                settled, self.windows_scheduled, self.records_fetched
            );
            self.last_logged = settled;
        }
    }

    pub fn take_failures(&mut self) -> Vec<WindowFailure> {
        std::mem::take(&mut self.failures)
    }

    pub fn take_skipped(&mut self) -> Vec<SkippedRecord> {
        std::mem::take(&mut self.skipped_records)
    }

    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            windows_scheduled: self.windows_scheduled,
            windows_completed: self.windows_completed,
            windows_failed: self.failures.len(),
            records_fetched: self.records_fetched,
            records_skipped: self.skipped_records.len(),
        }
    }
}

/// Length of the prefix `0..n` fully contained in `settled`.
pub fn contiguous_prefix(settled: &BTreeSet<usize>) -> usize {
    settled
        .iter()
        .enumerate()
        .take_while(|(expected, rank)| expected == *rank)
        .count()
}

/// Missing ranges between settled positions, as `(last settled, next settled)` pairs.
pub fn find_gaps(settled: &BTreeSet<usize>) -> Vec<(usize, usize)> {
    settled
        .iter()
        .zip(settled.iter().skip(1))
        .filter(|(a, b)| **b - **a > 1)
        .map(|(a, b)| (*a, *b))
        .collect()
}

/// Statistics about a sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub windows_scheduled: usize,
    pub windows_completed: usize,
    pub windows_failed: usize,
    pub records_fetched: usize,
    pub records_skipped: usize,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "{} of {} windows completed, {} records fetched{}{}",
            self.windows_completed,
            self.windows_scheduled,
            self.records_fetched,
            if self.windows_failed == 0 {
                String::new()
            } else {
                format!(", {} windows failed", self.windows_failed)
            },
            if self.records_skipped == 0 {
                String::new()
            } else {
                format!(", {} records skipped", self.records_skipped)
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_stops_at_first_hole() {
        let settled: BTreeSet<usize> = [0, 1, 3, 4].into_iter().collect();
        assert_eq!(contiguous_prefix(&settled), 2);
        assert_eq!(find_gaps(&settled), vec![(1, 3)]);

        let late: BTreeSet<usize> = [1, 2].into_iter().collect();
        assert_eq!(contiguous_prefix(&late), 0);
        assert_eq!(contiguous_prefix(&BTreeSet::new()), 0);
    }

    #[test]
    fn summary_mentions_failures_only_when_present() {
        let mut tracker = SyncProgressTracker::new();
        tracker.record_scheduled(3);
        tracker.record_completed();
        tracker.record_records(12);
        assert_eq!(
            tracker.get_stats().summary(),
            "1 of 3 windows completed, 12 records fetched"
        );

        tracker.record_failure("window 2".into(), "HTTP error 500".into());
        tracker.record_skipped(7, "Missing field 'qty'".into());
        let stats = tracker.get_stats();
        assert_eq!(stats.windows_failed, 1);
        assert!(stats.summary().ends_with(", 1 windows failed, 1 records skipped"));

        assert_eq!(tracker.take_failures().len(), 1);
        assert!(tracker.take_failures().is_empty());
    }
}

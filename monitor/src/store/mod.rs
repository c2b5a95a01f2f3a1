pub(crate) mod file;
pub(crate) mod writer;

use pulse_monitor_common::{EpochHistogram, EpochIndex};
use std::sync::{
    RwLock,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use thiserror::Error;
use tracing::warn;

/// Hard ceiling on run duration. A publish beyond this indicates a
/// clock or configuration fault, not a runtime condition.
pub(crate) const MAX_EPOCHS: usize = 4_000_000;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("epoch index {index} exceeds store capacity {capacity}")]
    CapacityExceeded { index: EpochIndex, capacity: usize },
    #[error("epoch index {index} is below the published count {count}")]
    IndexRegression { index: EpochIndex, count: usize },
}

/// Append-only map from elapsed second to its pulse-height histogram.
///
/// Single writer, any number of readers. The published count is stored
/// with Release ordering only after the epoch is fully appended, so a
/// reader observing `count() == n` is guaranteed complete epochs
/// `0..n`; entries are never mutated after publication.
pub(crate) struct TimeSeriesStore {
    start_time: i64,
    epochs: RwLock<Vec<EpochHistogram>>,
    published: AtomicUsize,
    raw_reads: AtomicU64,
}

impl TimeSeriesStore {
    pub(crate) fn new(start_time: i64) -> Self {
        Self {
            start_time,
            epochs: RwLock::new(Vec::new()),
            published: AtomicUsize::new(0),
            raw_reads: AtomicU64::new(0),
        }
    }

    /// Populates the store from a recorded run (playback mode); runs
    /// single-threaded before any reader starts.
    pub(crate) fn from_recorded(
        start_time: i64,
        epochs: Vec<EpochHistogram>,
    ) -> Result<Self, StoreError> {
        if epochs.len() > MAX_EPOCHS {
            return Err(StoreError::CapacityExceeded {
                index: epochs.len() - 1,
                capacity: MAX_EPOCHS,
            });
        }
        Ok(Self {
            start_time,
            published: AtomicUsize::new(epochs.len()),
            epochs: RwLock::new(epochs),
            raw_reads: AtomicU64::new(0),
        })
    }

    pub(crate) fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Number of published epochs, the exclusive upper bound of valid
    /// indices.
    pub(crate) fn count(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    /// Appends at `index`. A gap is zero-filled with a warning (the
    /// detector is still live, so recovery continues); regression and
    /// capacity overflow are the caller's fault.
    pub(crate) fn publish(
        &self,
        index: EpochIndex,
        histogram: EpochHistogram,
    ) -> Result<(), StoreError> {
        if index >= MAX_EPOCHS {
            return Err(StoreError::CapacityExceeded {
                index,
                capacity: MAX_EPOCHS,
            });
        }
        let mut epochs = self.epochs.write().unwrap_or_else(|e| e.into_inner());
        if index < epochs.len() {
            return Err(StoreError::IndexRegression {
                index,
                count: epochs.len(),
            });
        }
        if index > epochs.len() {
            // The offset before the first epoch is just the mid-second
            // acquisition start, not a gap.
            if !epochs.is_empty() {
                warn!(index, count = epochs.len(), "gap in published epochs, zero-filling");
            }
            epochs.resize(index, EpochHistogram::default());
        }
        epochs.push(histogram);
        self.published.store(epochs.len(), Ordering::Release);
        Ok(())
    }

    pub(crate) fn get(&self, index: EpochIndex) -> Option<EpochHistogram> {
        if index >= self.count() {
            return None;
        }
        self.raw_reads.fetch_add(1, Ordering::Relaxed);
        let epochs = self.epochs.read().unwrap_or_else(|e| e.into_inner());
        epochs.get(index).cloned()
    }

    /// Instrumentation: raw epoch reads served so far.
    pub(crate) fn raw_reads(&self) -> u64 {
        self.raw_reads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram_with(height: u16) -> EpochHistogram {
        let mut histogram = EpochHistogram::default();
        histogram.record(height);
        histogram
    }

    #[test]
    fn publish_and_read_back() {
        let store = TimeSeriesStore::new(100);
        assert_eq!(store.count(), 0);
        assert!(store.get(0).is_none());

        store.publish(0, histogram_with(62)).unwrap();
        store.publish(1, histogram_with(10)).unwrap();
        assert_eq!(store.count(), 2);
        assert_eq!(store.get(0).unwrap().counts()[12], 1);
        assert_eq!(store.get(1).unwrap().counts()[2], 1);
        assert!(store.get(2).is_none());
    }

    #[test]
    fn gap_is_zero_filled() {
        let store = TimeSeriesStore::new(0);
        store.publish(0, histogram_with(62)).unwrap();
        store.publish(3, histogram_with(62)).unwrap();
        assert_eq!(store.count(), 4);
        assert_eq!(store.get(1).unwrap().total(), 0);
        assert_eq!(store.get(2).unwrap().total(), 0);
        assert_eq!(store.get(3).unwrap().total(), 1);
    }

    #[test]
    fn regression_is_rejected() {
        let store = TimeSeriesStore::new(0);
        store.publish(0, histogram_with(62)).unwrap();
        assert!(matches!(
            store.publish(0, histogram_with(62)),
            Err(StoreError::IndexRegression { index: 0, count: 1 })
        ));
    }

    #[test]
    fn capacity_is_enforced() {
        let store = TimeSeriesStore::new(0);
        assert!(matches!(
            store.publish(MAX_EPOCHS, EpochHistogram::default()),
            Err(StoreError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn from_recorded_publishes_everything() {
        let store =
            TimeSeriesStore::from_recorded(42, vec![histogram_with(62), histogram_with(10)])
                .unwrap();
        assert_eq!(store.start_time(), 42);
        assert_eq!(store.count(), 2);
        assert_eq!(store.get(1).unwrap().counts()[2], 1);
    }

    #[test]
    fn raw_reads_are_counted() {
        let store = TimeSeriesStore::new(0);
        store.publish(0, histogram_with(62)).unwrap();
        assert_eq!(store.raw_reads(), 0);
        store.get(0);
        store.get(0);
        assert_eq!(store.raw_reads(), 2);
    }
}

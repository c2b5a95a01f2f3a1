use crate::store::TimeSeriesStore;
use pulse_monitor_common::{BUCKET_COUNT, EpochIndex};
use std::{collections::HashMap, sync::Arc};

/// Memoizing windowed count-rate queries against the store.
///
/// The display re-queries heavily overlapping windows as the user
/// scrolls, so computed window rates are kept per end epoch, and
/// per-epoch threshold-filtered sums are kept separately (an epoch's
/// sum never changes once published, whatever the interval). Changing
/// the interval drops the window rates but keeps the sums; changing
/// the threshold drops both.
pub(crate) struct RateCache {
    store: Arc<TimeSeriesStore>,
    interval: usize,
    threshold_bucket: usize,
    epoch_sums: Vec<u32>,
    window_rates: HashMap<EpochIndex, f64>,
    bucket_rates: Option<(EpochIndex, Box<[f64; BUCKET_COUNT]>)>,
}

impl RateCache {
    pub(crate) fn new(
        store: Arc<TimeSeriesStore>,
        interval: usize,
        threshold_bucket: usize,
    ) -> Self {
        Self {
            store,
            interval: interval.max(1),
            threshold_bucket,
            epoch_sums: Vec::new(),
            window_rates: HashMap::new(),
            bucket_rates: None,
        }
    }

    pub(crate) fn interval(&self) -> usize {
        self.interval
    }

    pub(crate) fn threshold_bucket(&self) -> usize {
        self.threshold_bucket
    }

    pub(crate) fn set_interval(&mut self, interval: usize) {
        let interval = interval.max(1);
        if interval == self.interval {
            return;
        }
        self.interval = interval;
        self.window_rates.clear();
        self.bucket_rates = None;
    }

    pub(crate) fn set_threshold_bucket(&mut self, threshold_bucket: usize) {
        if threshold_bucket == self.threshold_bucket {
            return;
        }
        self.threshold_bucket = threshold_bucket;
        self.epoch_sums.clear();
        self.window_rates.clear();
    }

    /// CPM of threshold-filtered counts over the window of `interval`
    /// epochs ending at `end`, or `None` when the window is not fully
    /// inside the published range. Callers treat `None` as "nothing to
    /// draw here".
    pub(crate) fn average_rate(&mut self, end: EpochIndex) -> Option<f64> {
        if end + 1 < self.interval || end >= self.store.count() {
            return None;
        }
        if let Some(&rate) = self.window_rates.get(&end) {
            return Some(rate);
        }
        self.fill_sums_through(end);
        let window = &self.epoch_sums[end + 1 - self.interval..=end];
        let rate = f64::from(window.iter().sum::<u32>()) / self.interval as f64 * 60.0;
        self.window_rates.insert(end, rate);
        Some(rate)
    }

    /// Per-bucket CPM over the same window, for the histogram view.
    /// Only the most recent window is retained; the view redraws one
    /// end epoch at a time.
    pub(crate) fn average_rate_all_buckets(
        &mut self,
        end: EpochIndex,
    ) -> Option<[f64; BUCKET_COUNT]> {
        if end + 1 < self.interval || end >= self.store.count() {
            return None;
        }
        if let Some((cached_end, rates)) = &self.bucket_rates {
            if *cached_end == end {
                return Some(**rates);
            }
        }
        let mut sums = [0u64; BUCKET_COUNT];
        for epoch in end + 1 - self.interval..=end {
            let histogram = self.store.get(epoch)?;
            for (sum, &count) in sums.iter_mut().zip(histogram.counts()) {
                *sum += u64::from(count);
            }
        }
        let mut rates = [0.0; BUCKET_COUNT];
        for (rate, sum) in rates.iter_mut().zip(sums) {
            *rate = sum as f64 / self.interval as f64 * 60.0;
        }
        self.bucket_rates = Some((end, Box::new(rates)));
        Some(rates)
    }

    fn fill_sums_through(&mut self, end: EpochIndex) {
        while self.epoch_sums.len() <= end {
            let epoch = self.epoch_sums.len();
            let sum = self
                .store
                .get(epoch)
                .map(|histogram| histogram.sum_from(self.threshold_bucket))
                .unwrap_or(0);
            self.epoch_sums.push(sum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use pulse_monitor_common::EpochHistogram;

    // heights: 12 -> bucket 2, 62 -> bucket 12
    fn store_with_epochs(per_epoch_pulses: &[&[u16]]) -> Arc<TimeSeriesStore> {
        let store = Arc::new(TimeSeriesStore::new(0));
        for (index, heights) in per_epoch_pulses.iter().enumerate() {
            let mut histogram = EpochHistogram::default();
            for &height in *heights {
                histogram.record(height);
            }
            store.publish(index, histogram).unwrap();
        }
        store
    }

    #[test]
    fn window_outside_published_range_is_not_available() {
        let store = store_with_epochs(&[&[62], &[62], &[62]]);
        let mut cache = RateCache::new(store, 5, 0);
        // fewer than 5 epochs published: even the newest end is unusable
        assert!(cache.average_rate(2).is_none());
        assert!(cache.average_rate(7).is_none());
        assert!(cache.average_rate_all_buckets(2).is_none());
    }

    #[test]
    fn rate_is_cpm_over_the_window() {
        // 2 pulses/s for 5 epochs = 120 cpm
        let store = store_with_epochs(&[&[62, 62], &[62, 62], &[62, 62], &[62, 62], &[62, 62]]);
        let mut cache = RateCache::new(store, 5, 0);
        assert_approx_eq!(cache.average_rate(4).unwrap(), 120.0);
    }

    #[test]
    fn repeated_queries_do_not_rescan_the_store() {
        let store = store_with_epochs(&[&[62], &[62], &[62]]);
        let mut cache = RateCache::new(store.clone(), 2, 0);

        let first = cache.average_rate(2).unwrap();
        let reads = store.raw_reads();
        let second = cache.average_rate(2).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
        assert_eq!(store.raw_reads(), reads);
    }

    #[test]
    fn threshold_filters_low_buckets() {
        // one pulse in bucket 2, one in bucket 12, each epoch
        let store = store_with_epochs(&[&[12, 62], &[12, 62]]);
        let mut cache = RateCache::new(store, 2, 0);
        assert_approx_eq!(cache.average_rate(1).unwrap(), 120.0);

        cache.set_threshold_bucket(8);
        assert_approx_eq!(cache.average_rate(1).unwrap(), 60.0);
    }

    #[test]
    fn interval_change_reuses_epoch_sums() {
        let store = store_with_epochs(&[&[62], &[62], &[62], &[62]]);
        let mut cache = RateCache::new(store.clone(), 4, 0);
        assert_approx_eq!(cache.average_rate(3).unwrap(), 60.0);

        let reads = store.raw_reads();
        cache.set_interval(2);
        assert_approx_eq!(cache.average_rate(3).unwrap(), 60.0);
        // the per-epoch sums survive an interval change
        assert_eq!(store.raw_reads(), reads);
    }

    #[test]
    fn all_buckets_reports_each_bucket_independently() {
        let store = store_with_epochs(&[&[12, 62], &[12]]);
        let mut cache = RateCache::new(store, 2, 0);
        let rates = cache.average_rate_all_buckets(1).unwrap();
        assert_approx_eq!(rates[2], 60.0);
        assert_approx_eq!(rates[12], 30.0);
        assert_approx_eq!(rates[0], 0.0);
    }

    #[test]
    fn late_epochs_become_queryable() {
        let store = store_with_epochs(&[&[62]]);
        let mut cache = RateCache::new(store.clone(), 1, 0);
        assert!(cache.average_rate(1).is_none());

        let mut histogram = EpochHistogram::default();
        histogram.record(62);
        store.publish(1, histogram).unwrap();
        assert_approx_eq!(cache.average_rate(1).unwrap(), 60.0);
    }
}

use super::{EpochSummary, PulseDetector};
use crate::store::{StoreError, TimeSeriesStore};
use pulse_monitor_common::{SAMPLE_RATE, Sample};
use std::{
    ops::RangeInclusive,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{error, warn};

// 500 kS/s +-4%
const EXPECTED_EPOCH_SAMPLES: RangeInclusive<usize> =
    (SAMPLE_RATE - SAMPLE_RATE / 25)..=(SAMPLE_RATE + SAMPLE_RATE / 25);
// Operating band of the amplifier's no-pulse level: 1500-1800 mV,
// where mv = (adc - 2048) * 10000 / 2048 with truncating division.
const EXPECTED_BASELINE: RangeInclusive<Sample> = 2356..=2416;

/// Hands each completed wall-clock second's histogram to the store,
/// checking acquisition health on the way.
pub(crate) struct EpochPublisher {
    store: Arc<TimeSeriesStore>,
    shutdown: Arc<AtomicBool>,
    last_second: Option<i64>,
    last_restart_count: u32,
}

impl EpochPublisher {
    pub(crate) fn new(store: Arc<TimeSeriesStore>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            store,
            shutdown,
            last_second: None,
            last_restart_count: 0,
        }
    }

    /// Called after every ingested block with the current wall-clock
    /// second and the source's cumulative restart count.
    pub(crate) fn tick(&mut self, detector: &mut PulseDetector, now: i64, restart_count: u32) {
        let Some(last) = self.last_second else {
            self.last_second = Some(now);
            self.last_restart_count = restart_count;
            return;
        };
        if now <= last {
            return;
        }
        self.last_second = Some(now);

        let summary = detector.finish_epoch();
        self.check_health(&summary, restart_count.wrapping_sub(self.last_restart_count));
        self.last_restart_count = restart_count;

        let index = now - self.store.start_time();
        if index < 0 {
            warn!(now, "wall clock behind acquisition start, dropping epoch");
            return;
        }
        match self.store.publish(index as usize, summary.histogram) {
            Ok(()) => {}
            Err(e @ StoreError::CapacityExceeded { .. }) => {
                // A serious clock or configuration fault; fail fast.
                error!("store capacity exhausted, terminating: {e}");
                self.shutdown.store(true, Ordering::Release);
            }
            Err(e) => warn!("failed to publish epoch: {e}"),
        }
    }

    fn check_health(&self, summary: &EpochSummary, restarts: u32) {
        if restarts != 0 {
            warn!(restarts, "sample source restarted during epoch");
        }
        if !EXPECTED_EPOCH_SAMPLES.contains(&summary.samples) {
            warn!(
                samples = summary.samples,
                pulses = summary.pulses,
                "epoch sample count outside expected band"
            );
        }
        if summary.baseline != 0 && !EXPECTED_BASELINE.contains(&summary.baseline) {
            warn!(
                baseline = summary.baseline,
                "baseline outside expected operating band"
            );
        }
    }
}

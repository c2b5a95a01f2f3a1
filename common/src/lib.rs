pub mod logging;

/// Raw ADC magnitude as delivered by the acquisition front-end.
pub type Sample = u16;

/// Elapsed whole seconds since acquisition start.
pub type EpochIndex = usize;

/// Nominal aggregate sample rate of the front-end, in samples per second.
pub const SAMPLE_RATE: usize = 500_000;

pub const ADC_MAX: Sample = 4095;
pub const ADC_MIDSCALE: Sample = 2048;

/// Width of one pulse-height bucket, in ADC units.
pub const BUCKET_WIDTH: Sample = 5;

/// Number of height buckets. Covers the full 12-bit height span; the
/// last bucket absorbs anything larger.
pub const BUCKET_COUNT: usize = 410;

pub fn bucket_of(height: Sample) -> usize {
    ((height / BUCKET_WIDTH) as usize).min(BUCKET_COUNT - 1)
}

/// Pulse counts for one second of acquisition, classified by pulse
/// height. Immutable once published to the time-series store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochHistogram {
    counts: [u32; BUCKET_COUNT],
}

impl Default for EpochHistogram {
    fn default() -> Self {
        Self {
            counts: [0; BUCKET_COUNT],
        }
    }
}

impl EpochHistogram {
    pub fn from_counts(counts: [u32; BUCKET_COUNT]) -> Self {
        Self { counts }
    }

    pub fn record(&mut self, height: Sample) {
        self.counts[bucket_of(height)] += 1;
    }

    pub fn counts(&self) -> &[u32; BUCKET_COUNT] {
        &self.counts
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Sum of counts in buckets `first_bucket..`, the display-side
    /// threshold filter.
    pub fn sum_from(&self, first_bucket: usize) -> u32 {
        self.counts.iter().skip(first_bucket).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(bucket_of(0), 0);
        assert_eq!(bucket_of(4), 0);
        assert_eq!(bucket_of(5), 1);
        assert_eq!(bucket_of(62), 12);
    }

    #[test]
    fn oversized_heights_land_in_last_bucket() {
        assert_eq!(bucket_of(BUCKET_COUNT as Sample * BUCKET_WIDTH), BUCKET_COUNT - 1);
        assert_eq!(bucket_of(Sample::MAX), BUCKET_COUNT - 1);
    }

    #[test]
    fn record_and_filter() {
        let mut histogram = EpochHistogram::default();
        histogram.record(10);
        histogram.record(62);
        histogram.record(63);
        assert_eq!(histogram.total(), 3);
        assert_eq!(histogram.counts()[2], 1);
        assert_eq!(histogram.counts()[12], 2);
        assert_eq!(histogram.sum_from(8), 2);
        assert_eq!(histogram.sum_from(13), 0);
    }
}

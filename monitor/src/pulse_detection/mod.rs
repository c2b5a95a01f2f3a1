mod epoch;

pub(crate) use epoch::EpochPublisher;

use pulse_monitor_common::{ADC_MAX, ADC_MIDSCALE, EpochHistogram, Sample};
use tracing::{debug, error, warn};

/// Fixed detection trigger height above baseline, in ADC units. The
/// display-side `pht` filters buckets for aggregation; this gates
/// detection itself.
pub(crate) const DEFAULT_MIN_PULSE_HEIGHT: Sample = 100;

const MAX_WORKING_SAMPLES: usize = 1_000_000;
const MIN_SCAN_SAMPLES: usize = 100;
// The scan stops this far short of the end of data so a pulse opening
// near the boundary is seen whole on the next pass.
const UNSCANNED_TAIL: usize = 20;
const BASELINE_LOOKAHEAD: usize = 10;
const BASELINE_AGREEMENT: usize = 3;
const MAX_PULSE_SAMPLES: usize = 10;

/// Everything accumulated for one epoch, handed to the publisher at
/// the wall-clock second boundary.
pub(crate) struct EpochSummary {
    pub(crate) histogram: EpochHistogram,
    pub(crate) pulses: u32,
    pub(crate) samples: usize,
    pub(crate) baseline: Sample,
}

/// Streaming pulse classifier. All state survives across `ingest`
/// calls; per-epoch state is cleared by `finish_epoch` while the
/// baseline estimate persists for the life of the acquisition.
pub(crate) struct PulseDetector {
    min_pulse_height: Sample,
    buffer: Vec<Sample>,
    cursor: usize,
    baseline: Sample, // 0 until first established
    pulse_start: Option<usize>,
    pulse_peak: Sample,
    histogram: EpochHistogram,
    pulses: u32,
    samples: usize,
}

impl PulseDetector {
    pub(crate) fn new(min_pulse_height: Sample) -> Self {
        Self {
            min_pulse_height,
            buffer: Vec::new(),
            cursor: 0,
            baseline: 0,
            pulse_start: None,
            pulse_peak: 0,
            histogram: EpochHistogram::default(),
            pulses: 0,
            samples: 0,
        }
    }

    pub(crate) fn ingest(&mut self, block: &[Sample]) {
        if self.buffer.len() + block.len() > MAX_WORKING_SAMPLES {
            // Unrecoverable accumulation: drop the epoch and resume
            // cleanly rather than stall the acquisition path.
            error!(
                buffered = self.buffer.len(),
                incoming = block.len(),
                "working buffer overflow, dropping epoch"
            );
            self.reset_epoch();
            return;
        }
        self.buffer.extend_from_slice(block);
        self.samples += block.len();
        if self.buffer.len() < MIN_SCAN_SAMPLES {
            return;
        }
        self.scan();
        self.compact();
    }

    /// Takes the completed epoch and clears per-epoch state. A pulse
    /// still open at the boundary is dropped with the working buffer.
    pub(crate) fn finish_epoch(&mut self) -> EpochSummary {
        let summary = EpochSummary {
            histogram: std::mem::take(&mut self.histogram),
            pulses: self.pulses,
            samples: self.samples,
            baseline: self.baseline,
        };
        self.reset_epoch();
        summary
    }

    #[cfg(test)]
    pub(crate) fn histogram(&self) -> &EpochHistogram {
        &self.histogram
    }

    #[cfg(test)]
    pub(crate) fn pulses(&self) -> u32 {
        self.pulses
    }

    #[cfg(test)]
    pub(crate) fn samples(&self) -> usize {
        self.samples
    }

    #[cfg(test)]
    pub(crate) fn baseline(&self) -> Sample {
        self.baseline
    }

    fn reset_epoch(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.pulse_start = None;
        self.histogram = EpochHistogram::default();
        self.pulses = 0;
        self.samples = 0;
    }

    fn scan(&mut self) {
        let len = self.buffer.len();
        while self.cursor < len {
            if self.pulse_start.is_none() && self.cursor + UNSCANNED_TAIL >= len {
                break;
            }
            let idx = self.cursor;
            if self.buffer[idx] > ADC_MAX {
                warn!(
                    index = idx,
                    value = self.buffer[idx],
                    "sample out of range, clamped to mid-scale"
                );
                self.buffer[idx] = ADC_MIDSCALE;
            }
            let sample = self.buffer[idx];

            if self.pulse_start.is_none() {
                self.track_baseline(idx);
            }
            if self.baseline == 0 {
                self.cursor += 1;
                continue;
            }

            let trigger = u32::from(self.baseline) + u32::from(self.min_pulse_height);
            match self.pulse_start {
                None => {
                    if u32::from(sample) >= trigger {
                        self.pulse_start = Some(idx);
                        self.pulse_peak = sample;
                    }
                }
                Some(start) => {
                    if u32::from(sample) < trigger {
                        let height = self.pulse_peak - self.baseline;
                        self.histogram.record(height);
                        self.pulses += 1;
                        debug!(start, end = idx - 1, height, "pulse");
                        self.pulse_start = None;
                    } else if idx - start >= MAX_PULSE_SAMPLES {
                        warn!(start, "discarding over-long pulse candidate as noise");
                        self.pulse_start = None;
                    } else if sample > self.pulse_peak {
                        self.pulse_peak = sample;
                    }
                }
            }
            self.cursor += 1;
        }
    }

    // Only called while not inside a candidate pulse, so pulse tails
    // never corrupt the estimate.
    fn track_baseline(&mut self, idx: usize) {
        let current = self.buffer[idx];
        if current.abs_diff(self.baseline) <= 1 {
            return;
        }
        if let Some(&ahead) = self.buffer.get(idx + BASELINE_LOOKAHEAD) {
            if ahead.abs_diff(self.baseline) <= 1 {
                return;
            }
        }
        if idx >= BASELINE_AGREEMENT
            && (1..=BASELINE_AGREEMENT).all(|k| self.buffer[idx - k].abs_diff(current) <= 1)
        {
            if self.baseline == 0 {
                debug!(baseline = current, "baseline established");
            }
            self.baseline = current;
        }
    }

    // Retain the unscanned tail plus enough history for the baseline
    // debounce (and any open pulse span); the rest is consumed.
    fn compact(&mut self) {
        let scanned = match self.pulse_start {
            Some(start) => start,
            None => self.cursor,
        };
        let keep_from = scanned.saturating_sub(BASELINE_AGREEMENT);
        if keep_from == 0 {
            return;
        }
        self.buffer.drain(..keep_from);
        self.cursor -= keep_from;
        if let Some(start) = &mut self.pulse_start {
            *start -= keep_from;
        }
    }
}

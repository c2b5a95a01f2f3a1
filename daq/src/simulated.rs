use crate::{DaqError, RestartCounter, SampleCallback, SampleSource};
use pulse_monitor_common::{ADC_MAX, SAMPLE_RATE, Sample};
use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::info;

/// Shape of the synthesised stream. Defaults approximate a quiet
/// amplifier idling a little above mid-scale.
#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    pub baseline: Sample,
    pub mean_rate_cpm: f64,
    pub pulse_height_mean: f64,
    pub pulse_height_sd: f64,
    pub block_len: usize,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            baseline: 2385,
            mean_rate_cpm: 600.0,
            pulse_height_mean: 400.0,
            pulse_height_sd: 120.0,
            block_len: 10_000,
        }
    }
}

pub struct SimulatedSource {
    config: SimulatedConfig,
    initialised: bool,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    restarts: RestartCounter,
}

impl SimulatedSource {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            initialised: false,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            restarts: RestartCounter::default(),
        }
    }
}

impl SampleSource for SimulatedSource {
    fn init(&mut self) -> Result<(), DaqError> {
        self.initialised = true;
        info!(config = ?self.config, "simulated source initialised");
        Ok(())
    }

    fn start(&mut self, mut callback: SampleCallback) -> Result<(), DaqError> {
        if !self.initialised {
            return Err(DaqError::NotInitialised);
        }
        if self.worker.is_some() {
            return Err(DaqError::AlreadyRunning);
        }
        self.stop.store(false, Ordering::Release);
        let config = self.config.clone();
        let stop = self.stop.clone();
        let worker = thread::Builder::new()
            .name("daq-simulator".into())
            .spawn(move || deliver_blocks(&config, &stop, &mut callback))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DaqError> {
        let worker = self.worker.take().ok_or(DaqError::NotRunning)?;
        self.stop.store(true, Ordering::Release);
        let _ = worker.join();
        Ok(())
    }

    fn restart_counter(&self) -> RestartCounter {
        self.restarts.clone()
    }
}

fn deliver_blocks(config: &SimulatedConfig, stop: &AtomicBool, callback: &mut SampleCallback) {
    let mut rng = rand::rng();
    let block_period = Duration::from_secs_f64(config.block_len as f64 / SAMPLE_RATE as f64);
    let pulses_per_block =
        config.mean_rate_cpm / 60.0 * config.block_len as f64 / SAMPLE_RATE as f64;
    let arrivals = Poisson::new(pulses_per_block).ok();
    let heights = Normal::new(config.pulse_height_mean, config.pulse_height_sd).ok();

    let mut block = vec![0 as Sample; config.block_len];
    while !stop.load(Ordering::Acquire) {
        for sample in block.iter_mut() {
            *sample = (i32::from(config.baseline) + rng.random_range(-1..=1)) as Sample;
        }
        if let (Some(arrivals), Some(heights)) = (&arrivals, &heights) {
            let count = arrivals.sample(&mut rng) as usize;
            for _ in 0..count {
                inject_pulse(&mut block, &mut rng, config.baseline, heights);
            }
        }
        callback(&block);
        thread::sleep(block_period);
    }
}

fn inject_pulse(block: &mut [Sample], rng: &mut impl Rng, baseline: Sample, heights: &Normal<f64>) {
    // fast rise, short tail; well inside the detector's 10-sample limit
    const PROFILE: [f64; 5] = [0.5, 1.0, 0.6, 0.3, 0.1];

    let height = heights.sample(rng).clamp(150.0, 2000.0);
    if block.len() <= PROFILE.len() {
        return;
    }
    let at = rng.random_range(0..block.len() - PROFILE.len());
    for (offset, fraction) in PROFILE.iter().enumerate() {
        let value = u32::from(baseline) + (height * fraction) as u32;
        block[at + offset] = value.min(u32::from(ADC_MAX)) as Sample;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn delivers_blocks_in_adc_range() {
        let mut source = SimulatedSource::new(SimulatedConfig {
            block_len: 1000,
            ..Default::default()
        });
        source.init().unwrap();

        let seen: Arc<Mutex<Vec<Sample>>> = Arc::default();
        let sink = seen.clone();
        source
            .start(Box::new(move |block| {
                sink.lock().unwrap().extend_from_slice(block)
            }))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        source.stop().unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&sample| sample <= ADC_MAX));
    }

    #[test]
    fn start_requires_init() {
        let mut source = SimulatedSource::new(SimulatedConfig::default());
        assert!(matches!(
            source.start(Box::new(|_| {})),
            Err(DaqError::NotInitialised)
        ));
    }

    #[test]
    fn stop_requires_start() {
        let mut source = SimulatedSource::new(SimulatedConfig::default());
        source.init().unwrap();
        assert!(matches!(source.stop(), Err(DaqError::NotRunning)));
    }

    #[test]
    fn restart_counter_is_shared() {
        let source = SimulatedSource::new(SimulatedConfig::default());
        let counter = source.restart_counter();
        assert_eq!(counter.get(), 0);
        source.restart_counter().record_restart();
        assert_eq!(counter.get(), 1);
    }
}

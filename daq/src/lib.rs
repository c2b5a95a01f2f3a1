//! Acquisition boundary: the contract a sample source must satisfy,
//! plus a software source that synthesises a detector-like stream.

mod simulated;

pub use simulated::{SimulatedConfig, SimulatedSource};

use pulse_monitor_common::Sample;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};
use thiserror::Error;

/// Invoked from the source's delivery thread with raw sample blocks of
/// arbitrary size. Must never block on I/O: it gates real-time sample
/// consumption.
pub type SampleCallback = Box<dyn FnMut(&[Sample]) + Send>;

#[derive(Debug, Error)]
pub enum DaqError {
    #[error("sample source is not initialised")]
    NotInitialised,
    #[error("sample source is already running")]
    AlreadyRunning,
    #[error("sample source is not running")]
    NotRunning,
    #[error("failed to spawn source worker: {0}")]
    Worker(#[from] io::Error),
}

/// Cumulative count of internal recoveries performed by a source.
/// Cloneable so the acquisition path can watch it without holding a
/// reference to the source itself.
#[derive(Clone, Debug, Default)]
pub struct RestartCounter(Arc<AtomicU32>);

impl RestartCounter {
    pub fn record_restart(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// The hardware (or simulated) front-end delivering raw ADC samples.
pub trait SampleSource {
    fn init(&mut self) -> Result<(), DaqError>;

    fn start(&mut self, callback: SampleCallback) -> Result<(), DaqError>;

    fn stop(&mut self) -> Result<(), DaqError>;

    fn restart_counter(&self) -> RestartCounter;
}

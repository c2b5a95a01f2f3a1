mod aggregate;
mod parameters;
mod pulse_detection;
mod store;
mod tui;

use crate::{
    parameters::{DisplayParams, ParamsError},
    pulse_detection::{DEFAULT_MIN_PULSE_HEIGHT, EpochPublisher, PulseDetector},
    store::{TimeSeriesStore, writer::Persistence},
    tui::{DisplayApp, Mode},
};
use anyhow::Context;
use chrono::{Local, Utc};
use clap::Parser;
use pulse_monitor_common::{Sample, logging};
use pulse_monitor_daq::{DaqError, SampleSource, SimulatedConfig, SimulatedSource};
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Play back an existing recording instead of acquiring live.
    #[clap(short, long)]
    playback: Option<PathBuf>,

    /// Recording path for live mode; refuses to overwrite.
    /// Defaults to pulse-monitor_<timestamp>.dat.
    #[clap(long)]
    output: Option<PathBuf>,

    /// Display parameters file, loaded at startup and on demand.
    #[clap(long, default_value = "monitor.params")]
    params_file: PathBuf,

    /// Diagnostic log file.
    #[clap(long, default_value = "pulse-monitor.log")]
    log_file: PathBuf,

    /// Log filter directive, e.g. "info" or "pulse_monitor=debug".
    #[clap(short, long, default_value = "info")]
    verbosity: String,

    /// Detection trigger height above baseline, in ADC units.
    #[clap(long, default_value_t = DEFAULT_MIN_PULSE_HEIGHT)]
    min_pulse_height: Sample,

    /// Mean count rate of the simulated source, in CPM.
    #[clap(long, default_value_t = 600.0)]
    sim_rate_cpm: f64,

    /// No-pulse level of the simulated source, in ADC units.
    #[clap(long, default_value_t = 2385)]
    sim_baseline: Sample,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_file, &cli.verbosity)?;
    info!(?cli, "pulse monitor starting");

    let params = load_params(&cli.params_file);
    match cli.playback.clone() {
        Some(path) => run_playback(&cli, params, &path),
        None => run_live(&cli, params),
    }
}

/// A missing parameters file is the normal first run; anything else
/// is logged and the defaults stand in.
fn load_params(path: &std::path::Path) -> DisplayParams {
    match DisplayParams::load(path) {
        Ok(params) => params,
        Err(ParamsError::Io(e)) if e.kind() == ErrorKind::NotFound => DisplayParams::default(),
        Err(e) => {
            error!("failed to load parameters, using defaults: {e}");
            DisplayParams::default()
        }
    }
}

fn run_playback(cli: &Cli, params: DisplayParams, path: &std::path::Path) -> anyhow::Result<()> {
    let (start_time, epochs) = store::file::load(path)
        .with_context(|| format!("cannot play back {}", path.display()))?;
    let store = Arc::new(TimeSeriesStore::from_recorded(start_time, epochs)?);
    info!(epochs = store.count(), "playback ready");

    let shutdown = Arc::new(AtomicBool::new(false));
    DisplayApp::new(
        store,
        params,
        cli.params_file.clone(),
        shutdown,
        Mode::Playback,
    )
    .run()?;
    Ok(())
}

fn run_live(cli: &Cli, params: DisplayParams) -> anyhow::Result<()> {
    let start_time = Utc::now().timestamp();
    let output = cli.output.clone().unwrap_or_else(|| {
        PathBuf::from(format!(
            "pulse-monitor_{}.dat",
            Local::now().format("%Y-%m-%d_%H-%M-%S")
        ))
    });

    let store = Arc::new(TimeSeriesStore::new(start_time));
    let shutdown = Arc::new(AtomicBool::new(false));
    let persistence = Persistence::start(store.clone(), &output)
        .with_context(|| format!("cannot record to {}", output.display()))?;

    let mut source = SimulatedSource::new(SimulatedConfig {
        baseline: cli.sim_baseline,
        mean_rate_cpm: cli.sim_rate_cpm,
        ..Default::default()
    });
    source.init()?;
    let restarts = source.restart_counter();
    let mut detector = PulseDetector::new(cli.min_pulse_height);
    let mut publisher = EpochPublisher::new(store.clone(), shutdown.clone());
    source.start(Box::new(move |block| {
        detector.ingest(block);
        publisher.tick(&mut detector, Utc::now().timestamp(), restarts.get());
    }))?;

    let display_result = DisplayApp::new(
        store,
        params,
        cli.params_file.clone(),
        shutdown.clone(),
        Mode::Live,
    )
    .run();

    // Teardown runs whether or not the display loop failed: every
    // published epoch must reach disk before the process exits.
    let stop_result = finish_acquisition(&mut source, persistence, &shutdown);
    info!("shutdown complete");
    display_result?;
    stop_result?;
    Ok(())
}

/// Stops acquisition and joins the persistence thread's final drain.
/// A source stop failure is reported only after the drain completes.
fn finish_acquisition(
    source: &mut dyn SampleSource,
    persistence: Persistence,
    shutdown: &AtomicBool,
) -> Result<(), DaqError> {
    shutdown.store(true, Ordering::Release);
    let stopped = source.stop();
    persistence.finish();
    stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_monitor_common::EpochHistogram;
    use pulse_monitor_daq::{RestartCounter, SampleCallback};
    use std::{env, fs};

    struct FailingSource;

    impl SampleSource for FailingSource {
        fn init(&mut self) -> Result<(), DaqError> {
            Ok(())
        }

        fn start(&mut self, _callback: SampleCallback) -> Result<(), DaqError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DaqError> {
            Err(DaqError::NotRunning)
        }

        fn restart_counter(&self) -> RestartCounter {
            RestartCounter::default()
        }
    }

    #[test]
    fn teardown_drains_persistence_even_when_stop_fails() {
        let path = env::temp_dir().join("pulse-monitor-teardown.dat");
        let _ = fs::remove_file(&path);

        let store = Arc::new(TimeSeriesStore::new(900));
        let shutdown = Arc::new(AtomicBool::new(false));
        let persistence = Persistence::start(store.clone(), &path).unwrap();

        let mut histogram = EpochHistogram::default();
        histogram.record(62);
        store.publish(0, histogram).unwrap();

        let mut source = FailingSource;
        let result = finish_acquisition(&mut source, persistence, &shutdown);

        // the stop error is surfaced, but only after the final drain
        assert!(matches!(result, Err(DaqError::NotRunning)));
        assert!(shutdown.load(Ordering::Acquire));
        let (start_time, epochs) = store::file::load(&path).unwrap();
        assert_eq!(start_time, 900);
        assert_eq!(epochs.len(), 1);
        assert_eq!(epochs[0].counts()[12], 1);
        fs::remove_file(&path).unwrap();
    }
}

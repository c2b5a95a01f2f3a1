use super::{
    TimeSeriesStore,
    file::{DataFileError, DataFileWriter},
};
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{info, warn};

const DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_SLICES: u32 = 10;

/// Background thread trailing the store's published count and
/// appending new epochs to the data file roughly once a second.
pub(crate) struct Persistence {
    shutdown: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Persistence {
    pub(crate) fn start(
        store: Arc<TimeSeriesStore>,
        path: &Path,
    ) -> Result<Self, DataFileError> {
        let mut writer = DataFileWriter::create(path, store.start_time())?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let worker = thread::Builder::new()
            .name("persistence".into())
            .spawn(move || {
                let mut next = 0;
                loop {
                    // Latch before draining so epochs published while we
                    // drain are picked up by the final pass.
                    let terminate = stop.load(Ordering::Acquire);
                    while next < store.count() {
                        if let Some(histogram) = store.get(next) {
                            if let Err(e) = writer.append(&histogram) {
                                warn!(index = next, "failed to persist epoch: {e}");
                            }
                        }
                        next += 1;
                    }
                    if let Err(e) = writer.flush() {
                        warn!("failed to flush data file: {e}");
                    }
                    if terminate {
                        info!(epochs = next, "persistence complete");
                        break;
                    }
                    for _ in 0..DRAIN_SLICES {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        thread::sleep(DRAIN_INTERVAL);
                    }
                }
            })?;
        Ok(Self { shutdown, worker })
    }

    /// Drains any remaining epochs and closes the file.
    pub(crate) fn finish(self) {
        self.shutdown.store(true, Ordering::Release);
        if self.worker.join().is_err() {
            warn!("persistence thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::file;
    use pulse_monitor_common::EpochHistogram;
    use std::{env, fs};

    #[test]
    fn persists_published_epochs_on_finish() {
        let path = env::temp_dir().join("pulse-monitor-persistence.dat");
        let _ = fs::remove_file(&path);

        let store = Arc::new(TimeSeriesStore::new(500));
        let persistence = Persistence::start(store.clone(), &path).unwrap();

        let mut histogram = EpochHistogram::default();
        histogram.record(62);
        store.publish(0, EpochHistogram::default()).unwrap();
        store.publish(1, histogram).unwrap();
        persistence.finish();

        let (start_time, epochs) = file::load(&path).unwrap();
        assert_eq!(start_time, 500);
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0].total(), 0);
        assert_eq!(epochs[1].counts()[12], 1);
        fs::remove_file(&path).unwrap();
    }
}

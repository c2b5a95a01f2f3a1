use chrono::Local;
use std::{fs::OpenOptions, io, path::Path, sync::Arc};
use thiserror::Error;
use tracing_subscriber::{
    EnvFilter,
    fmt::{format::Writer, time::FormatTime},
};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file: {0}")]
    Open(#[from] io::Error),
    #[error("invalid verbosity directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
}

struct LogTimer;

impl FormatTime for LogTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y/%m/%d %H:%M:%S"))
    }
}

/// Routes all diagnostics to an append-mode log file, one timestamped
/// leveled line per event, filtered by `directive` (e.g. "info" or
/// "pulse_monitor=debug").
pub fn init(path: &Path, directive: &str) -> Result<(), LoggingError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(directive)?)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_timer(LogTimer)
        .init();
    Ok(())
}

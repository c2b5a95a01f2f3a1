use pulse_monitor_common::Sample;
use std::{fs, io, path::Path};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub(crate) enum ParamsError {
    #[error("malformed parameters line {0:?}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// User-adjustable display parameters, persisted as a one-line
/// human-editable file: `pht=<int> avg_intvl=<int> y_max=<int>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DisplayParams {
    /// Display-side pulse height cutoff separating signal buckets from
    /// the noise-dominated low end. Distinct from the detector's fixed
    /// minimum detection height.
    pub(crate) pht: Sample,
    /// Averaging interval in seconds, at least 1.
    pub(crate) avg_intvl: usize,
    /// Upper bound of the rate plot's y axis, in CPM.
    pub(crate) y_max: u32,
}

impl Default for DisplayParams {
    fn default() -> Self {
        Self {
            pht: 100,
            avg_intvl: 10,
            y_max: 1000,
        }
    }
}

impl DisplayParams {
    pub(crate) fn load(path: &Path) -> Result<Self, ParamsError> {
        let text = fs::read_to_string(path)?;
        let params = Self::parse(text.trim())?;
        info!(path = %path.display(), ?params, "parameters loaded");
        Ok(params)
    }

    pub(crate) fn save(&self, path: &Path) -> Result<(), ParamsError> {
        fs::write(
            path,
            format!("pht={} avg_intvl={} y_max={}\n", self.pht, self.avg_intvl, self.y_max),
        )?;
        info!(path = %path.display(), "parameters saved");
        Ok(())
    }

    fn parse(line: &str) -> Result<Self, ParamsError> {
        let malformed = || ParamsError::Malformed(line.to_owned());
        let mut fields = line.split_whitespace();
        let pht = Self::field(fields.next(), "pht").ok_or_else(malformed)?;
        let avg_intvl = Self::field(fields.next(), "avg_intvl").ok_or_else(malformed)?;
        let y_max = Self::field(fields.next(), "y_max").ok_or_else(malformed)?;
        if fields.next().is_some() || avg_intvl < 1 {
            return Err(malformed());
        }
        Ok(Self {
            pht,
            avg_intvl,
            y_max,
        })
    }

    fn field<T: std::str::FromStr>(field: Option<&str>, key: &str) -> Option<T> {
        field?
            .strip_prefix(key)?
            .strip_prefix('=')?
            .parse()
            .ok()
    }
}

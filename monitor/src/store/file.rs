use pulse_monitor_common::{BUCKET_COUNT, EpochHistogram};
use std::{
    fs::{File, OpenOptions, read},
    io::{self, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

/// "PHM1", little-endian.
const FILE_MAGIC: u32 = 0x5048_4D31;
const HEADER_LEN: usize = 16;
const RECORD_LEN: usize = BUCKET_COUNT * 4;

#[derive(Debug, Error)]
pub(crate) enum DataFileError {
    #[error("data file {0} already exists, refusing to overwrite")]
    AlreadyExists(PathBuf),
    #[error("bad magic number {found:#010x}, not a pulse monitor data file")]
    BadMagic { found: u32 },
    #[error("truncated header, file is only {len} bytes")]
    TruncatedHeader { len: usize },
    #[error("file body of {len} bytes is not a whole number of epoch records")]
    MisalignedBody { len: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Incremental writer for the on-disk epoch series.
///
/// Layout is all little-endian: a 16-byte header (magic u32, reserved
/// u32, acquisition start time i64) followed by one fixed-size record
/// of `BUCKET_COUNT` u32 bucket counts per epoch, in index order.
pub(crate) struct DataFileWriter {
    writer: BufWriter<File>,
}

impl DataFileWriter {
    pub(crate) fn create(path: &Path, start_time: i64) -> Result<Self, DataFileError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => DataFileError::AlreadyExists(path.to_owned()),
                _ => DataFileError::Io(e),
            })?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&FILE_MAGIC.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(&start_time.to_le_bytes())?;
        writer.flush()?;
        info!(path = %path.display(), start_time, "data file created");
        Ok(Self { writer })
    }

    pub(crate) fn append(&mut self, histogram: &EpochHistogram) -> Result<(), DataFileError> {
        let mut record = [0u8; RECORD_LEN];
        for (chunk, count) in record.chunks_exact_mut(4).zip(histogram.counts()) {
            chunk.copy_from_slice(&count.to_le_bytes());
        }
        self.writer.write_all(&record)?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), DataFileError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Loads a complete recorded run for playback.
pub(crate) fn load(path: &Path) -> Result<(i64, Vec<EpochHistogram>), DataFileError> {
    let bytes = read(path)?;
    if bytes.len() < HEADER_LEN {
        return Err(DataFileError::TruncatedHeader { len: bytes.len() });
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != FILE_MAGIC {
        return Err(DataFileError::BadMagic { found: magic });
    }
    let start_time = i64::from_le_bytes([
        bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    ]);

    let body = &bytes[HEADER_LEN..];
    if body.len() % RECORD_LEN != 0 {
        return Err(DataFileError::MisalignedBody { len: body.len() });
    }
    let epochs = body
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let mut counts = [0u32; BUCKET_COUNT];
            for (count, chunk) in counts.iter_mut().zip(record.chunks_exact(4)) {
                *count = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            EpochHistogram::from_counts(counts)
        })
        .collect();
    info!(path = %path.display(), "data file loaded");
    Ok((start_time, epochs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    fn temp_path(name: &str) -> PathBuf {
        let path = env::temp_dir().join(name);
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn round_trip_preserves_epochs() {
        let path = temp_path("pulse-monitor-round-trip.dat");
        let mut first = EpochHistogram::default();
        first.record(62);
        first.record(62);
        let mut second = EpochHistogram::default();
        second.record(2049); // clamps to the last bucket

        let mut writer = DataFileWriter::create(&path, 1_700_000_000).unwrap();
        writer.append(&first).unwrap();
        writer.append(&second).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let (start_time, epochs) = load(&path).unwrap();
        assert_eq!(start_time, 1_700_000_000);
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0].counts()[12], 2);
        assert_eq!(epochs[1].counts()[BUCKET_COUNT - 1], 1);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn refuses_to_overwrite() {
        let path = temp_path("pulse-monitor-no-overwrite.dat");
        let _writer = DataFileWriter::create(&path, 0).unwrap();
        assert!(matches!(
            DataFileWriter::create(&path, 0),
            Err(DataFileError::AlreadyExists(_))
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_wrong_magic() {
        let path = temp_path("pulse-monitor-bad-magic.dat");
        fs::write(&path, [0u8; HEADER_LEN]).unwrap();
        assert!(matches!(
            load(&path),
            Err(DataFileError::BadMagic { found: 0 })
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_truncated_header() {
        let path = temp_path("pulse-monitor-short.dat");
        fs::write(&path, [0u8; 7]).unwrap();
        assert!(matches!(
            load(&path),
            Err(DataFileError::TruncatedHeader { len: 7 })
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_misaligned_body() {
        let path = temp_path("pulse-monitor-misaligned.dat");
        let mut writer = DataFileWriter::create(&path, 0).unwrap();
        writer.append(&EpochHistogram::default()).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 1);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(load(&path), Err(DataFileError::MisalignedBody { .. })));
        fs::remove_file(&path).unwrap();
    }
}

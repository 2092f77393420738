//! Append-only sample logs.
//!
//! Samples are written as line-delimited JSON (the format the report reads
//! back) or as CSV for spreadsheets. Reading tolerates malformed lines.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::models::{RadioMetrics, Sample};

/// Log store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("could not open log file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode sample: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Destination for captured samples.
pub trait SampleSink: Send {
    fn append(&mut self, sample: &Sample) -> Result<(), StoreError>;

    fn path(&self) -> &Path;
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Line-delimited JSON log, one sample per line.
pub struct JsonLog {
    path: PathBuf,
    file: File,
}

impl JsonLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self { path, file })
    }
}

impl SampleSink for JsonLog {
    fn append(&mut self, sample: &Sample) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(sample)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

const CSV_HEADER: [&str; 11] = [
    "Timestamp", "5G_Band", "5G_RSRP", "5G_SINR", "5G_Bars", "4G_Band", "4G_RSRP", "4G_SINR",
    "4G_Bars", "Ping_Avg", "Ping_Loss",
];

/// CSV log with a header row written once per file.
pub struct CsvLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let is_new = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let mut writer = csv::Writer::from_writer(open_append(&path)?);

        if is_new {
            writer.write_record(CSV_HEADER)?;
            writer.flush()?;
        }

        Ok(Self { path, writer })
    }
}

impl SampleSink for CsvLog {
    fn append(&mut self, sample: &Sample) -> Result<(), StoreError> {
        let mut record = vec![sample.timestamp().to_rfc3339()];
        record.extend(radio_fields(sample.five_g()));
        record.extend(radio_fields(sample.four_g()));
        record.push(sample.ping.avg.map(|v| format!("{:.1}", v)).unwrap_or_default());
        record.push(format!("{:.1}", sample.ping.loss));

        self.writer.write_record(&record)?;
        self.writer.flush()?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn radio_fields(radio: &RadioMetrics) -> [String; 4] {
    [
        radio.bands.join(","),
        radio.rsrp.to_string(),
        radio.sinr.to_string(),
        format!("{:.1}", radio.bars),
    ]
}

/// Read samples in file order, skipping blank and malformed lines.
pub fn read_samples<R: BufRead>(reader: R) -> Result<Vec<Sample>, StoreError> {
    let mut samples = Vec::new();
    let mut skipped = 0usize;

    // Split on raw bytes so a line with invalid UTF-8 is skipped, not fatal.
    for (idx, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Sample>(trimmed) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                tracing::debug!("Skipping malformed line {}: {}", idx + 1, e);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} malformed log lines", skipped);
    }

    Ok(samples)
}

/// Load every sample from a JSON log file.
pub fn load_samples<P: AsRef<Path>>(path: P) -> Result<Vec<Sample>, StoreError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| StoreError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_samples(BufReader::new(file))
}

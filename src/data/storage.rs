//! Scan sinks with clean feature flag handling.
//!
//! A [`ScanSink`] is one persistence backend for a scan session. Every sink
//! must leave a readable artifact after each single `append`, not only after
//! `finish`, so a crash after point N still leaves points `0..=N` on disk.
use crate::{core::DataPoint, error::ScanError, metadata::ScanMetadata};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Column order of the CSV artifact.
pub const CSV_HEADER: [&str; 6] = ["point_index", "x", "y", "daq_value", "timestamp", "datetime"];

/// One persistence backend for a scan session.
///
/// Calls arrive in order: `open`, any number of `append`, then `finish`.
/// `close` may be called at any point to release the backend without writing
/// anything further; it must be idempotent.
pub trait ScanSink: Send {
    /// Short backend name used in logs (`csv`, `tdms`, ...).
    fn name(&self) -> &str;

    /// Path of the artifact this sink writes, if any.
    fn path(&self) -> Option<&Path>;

    /// Creates the artifact and writes any structural header.
    fn open(&mut self, metadata: &ScanMetadata) -> Result<()>;

    /// Durably appends one point.
    fn append(&mut self, point: &DataPoint) -> Result<()>;

    /// Writes trailing metadata, if the format supports it, and closes.
    fn finish(&mut self, metadata: &ScanMetadata) -> Result<()>;

    /// Releases the backend.
    fn close(&mut self);
}

/// Built-in sink formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    /// `<base>.csv`
    Csv,
    /// `<base>.tdms`
    Tdms,
}

impl SinkFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            SinkFormat::Csv => "csv",
            SinkFormat::Tdms => "tdms",
        }
    }

    /// Builds the sink for this format writing `<dir>/<stem>.<ext>`.
    pub fn create(&self, dir: &Path, stem: &str) -> Box<dyn ScanSink> {
        let path = dir.join(format!("{}.{}", stem, self.extension()));
        match self {
            SinkFormat::Csv => Box::new(CsvSink::new(path)),
            SinkFormat::Tdms => Box::new(crate::data::tdms::TdmsSink::new(path)),
        }
    }
}

impl fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SinkFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(SinkFormat::Csv),
            "tdms" => Ok(SinkFormat::Tdms),
            other => Err(ScanError::InvalidParameter(format!(
                "unknown storage format '{}'; expected csv or tdms",
                other
            ))),
        }
    }
}

/// One row of the CSV artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsvRecord {
    /// Plan index
    pub point_index: usize,
    /// Stage X in mm
    pub x: f64,
    /// Stage Y in mm
    pub y: f64,
    /// Reading in volts
    pub daq_value: f64,
    /// Epoch seconds
    pub timestamp: f64,
    /// RFC 3339 capture time
    pub datetime: String,
}

impl From<&DataPoint> for CsvRecord {
    fn from(point: &DataPoint) -> Self {
        Self {
            point_index: point.index,
            x: point.position.x,
            y: point.position.y,
            daq_value: point.value,
            timestamp: point.epoch_seconds(),
            datetime: point.acquired_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// CSV Sink
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use anyhow::Context;
    use std::fs::{File, OpenOptions};

    /// Append-only CSV sink.
    ///
    /// The header is written only if the file did not exist before `open`, so
    /// re-running with the same stem keeps appending below the original header.
    pub struct CsvSink {
        path: PathBuf,
        writer: Option<csv::Writer<File>>,
    }

    impl CsvSink {
        /// Sink writing to `path`.
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                writer: None,
            }
        }
    }

    impl ScanSink for CsvSink {
        fn name(&self) -> &str {
            "csv"
        }

        fn path(&self) -> Option<&Path> {
            Some(&self.path)
        }

        fn open(&mut self, _metadata: &ScanMetadata) -> Result<()> {
            let existed = self.path.exists();
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open CSV file at {:?}", self.path))?;

            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            if !existed {
                writer
                    .write_record(CSV_HEADER)
                    .context("Failed to write CSV header")?;
            }
            writer.flush().context("Failed to flush CSV header")?;

            tracing::info!(path = %self.path.display(), "CSV sink opened");
            self.writer = Some(writer);
            Ok(())
        }

        fn append(&mut self, point: &DataPoint) -> Result<()> {
            let writer = self
                .writer
                .as_mut()
                .context("CSV sink is not open")?;
            writer
                .serialize(CsvRecord::from(point))
                .context("Failed to write data point to CSV file")?;
            writer.flush().context("Failed to flush CSV file")?;
            Ok(())
        }

        fn finish(&mut self, _metadata: &ScanMetadata) -> Result<()> {
            if let Some(mut writer) = self.writer.take() {
                writer.flush().context("Failed to flush CSV writer")?;
            }
            tracing::info!(path = %self.path.display(), "CSV sink closed");
            Ok(())
        }

        fn close(&mut self) {
            if let Some(mut writer) = self.writer.take() {
                let _ = writer.flush();
            }
        }
    }

    /// Reads a CSV artifact back into records, in file order.
    pub fn load_scan_csv(path: impl AsRef<Path>) -> Result<Vec<CsvRecord>> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open CSV file at {:?}", path))?;
        let records = reader
            .deserialize()
            .collect::<Result<Vec<CsvRecord>, _>>()
            .with_context(|| format!("Failed to parse CSV file at {:?}", path))?;
        tracing::debug!(count = records.len(), path = %path.display(), "Loaded scan CSV");
        Ok(records)
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    /// Placeholder CSV sink; fails to open without the `storage_csv` feature.
    pub struct CsvSink {
        path: PathBuf,
    }

    impl CsvSink {
        /// Sink that would write to `path`.
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }
    }

    impl ScanSink for CsvSink {
        fn name(&self) -> &str {
            "csv"
        }

        fn path(&self) -> Option<&Path> {
            Some(&self.path)
        }

        fn open(&mut self, _metadata: &ScanMetadata) -> Result<()> {
            Err(ScanError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        fn append(&mut self, _point: &DataPoint) -> Result<()> {
            Err(ScanError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        fn finish(&mut self, _metadata: &ScanMetadata) -> Result<()> {
            Err(ScanError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        fn close(&mut self) {}
    }

    /// Requires the `storage_csv` feature.
    pub fn load_scan_csv(_path: impl AsRef<Path>) -> Result<Vec<CsvRecord>> {
        Err(ScanError::FeatureNotEnabled("storage_csv".to_string()).into())
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{load_scan_csv, CsvSink};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{load_scan_csv, CsvSink};

//! Incremental, crash-consistent persistence of one scan session.
//!
//! `ScanRecorder` owns every sink of a session and drives them through
//! `Idle -> Active -> Finalized`:
//!
//! - [`ScanRecorder::start`] opens the sinks and writes their headers. A sink
//!   that fails to open is disabled; the session continues with the rest.
//! - [`ScanRecorder::add_point`] appends one point to every enabled sink before
//!   returning. A sink that fails is disabled for the rest of the session and
//!   the failure is logged exactly once.
//! - [`ScanRecorder::finish`] stamps summary metadata, lets each sink write its
//!   trailer, writes `<base>_metadata.json` and closes everything. It is a
//!   no-op unless the recorder is active.
//!
//! Dropping an active recorder finishes it with [`ScanStatus::Aborted`], so an
//! early return or panic in the caller still closes every artifact cleanly.

use crate::core::{DataPoint, ScanStatus};
use crate::data::storage::{ScanSink, SinkFormat};
use crate::error::{ScanError, ScanResult};
use crate::metadata::ScanMetadata;
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Lifecycle of a recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    /// Created, no artifacts written yet
    Idle,
    /// Sinks open and accepting points
    Active,
    /// Sinks closed, metadata frozen
    Finalized,
}

/// Per-sink state. `Active -> Disabled` is one-way within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    /// Receiving appends
    Active,
    /// Failed once; skipped for the rest of the session
    Disabled,
}

struct SinkSlot {
    sink: Box<dyn ScanSink>,
    state: SinkState,
    records: usize,
}

impl SinkSlot {
    fn disable(&mut self, err: &ScanError) {
        error!(sink = self.sink.name(), "{}; sink disabled for this session", err);
        self.state = SinkState::Disabled;
        self.sink.close();
    }
}

/// Summary of a finished session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    /// How the session ended
    pub status: ScanStatus,
    /// Points appended during the session
    pub total_points: usize,
    /// Wall-clock duration in seconds
    pub duration_seconds: f64,
    /// Throughput, 0 for a zero-length session
    pub points_per_second: f64,
    /// Artifacts written by sinks that stayed enabled, plus the metadata file
    pub artifacts: Vec<PathBuf>,
}

/// `<prefix>_YYYYmmdd_HHMMSS` stem for a session started at `started_at`.
pub fn session_stem(prefix: &str, started_at: DateTime<Local>) -> String {
    format!("{}_{}", prefix, started_at.format("%Y%m%d_%H%M%S"))
}

/// Like [`session_stem`], but adds a `_2`, `_3`, ... suffix while any artifact
/// of that stem already exists in `dir`.
pub fn unique_session_stem(dir: &Path, prefix: &str, started_at: DateTime<Local>) -> String {
    let base = session_stem(prefix, started_at);
    let taken = |stem: &str| {
        [SinkFormat::Csv, SinkFormat::Tdms]
            .iter()
            .map(|format| dir.join(format!("{}.{}", stem, format.extension())))
            .chain(std::iter::once(dir.join(format!("{}_metadata.json", stem))))
            .any(|path| path.exists())
    };
    if !taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let stem = format!("{}_{}", base, n);
        if !taken(&stem) {
            return stem;
        }
        n += 1;
    }
}

fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

/// Owns the sinks and metadata envelope of one scan session.
pub struct ScanRecorder {
    dir: PathBuf,
    stem: String,
    slots: Vec<SinkSlot>,
    state: RecorderState,
    metadata: ScanMetadata,
    started_at: Option<DateTime<Utc>>,
    points_recorded: usize,
    summary: Option<SessionSummary>,
}

impl ScanRecorder {
    /// Recorder writing `<dir>/<stem>.<ext>` for each requested format.
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>, formats: &[SinkFormat]) -> Self {
        let dir = dir.into();
        let stem = stem.into();
        let sinks = formats.iter().map(|f| f.create(&dir, &stem)).collect();
        Self::with_sinks(dir, stem, sinks)
    }

    /// Recorder over caller-supplied sinks. The metadata file still lands in `dir`.
    pub fn with_sinks(
        dir: impl Into<PathBuf>,
        stem: impl Into<String>,
        sinks: Vec<Box<dyn ScanSink>>,
    ) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            slots: sinks
                .into_iter()
                .map(|sink| SinkSlot {
                    sink,
                    state: SinkState::Active,
                    records: 0,
                })
                .collect(),
            state: RecorderState::Idle,
            metadata: ScanMetadata::new(),
            started_at: None,
            points_recorded: 0,
            summary: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Common file stem of every artifact.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Path of the JSON metadata artifact.
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}_metadata.json", self.stem))
    }

    /// Metadata as of now; frozen once finalized.
    pub fn metadata(&self) -> &ScanMetadata {
        &self.metadata
    }

    /// Points appended so far.
    pub fn points_recorded(&self) -> usize {
        self.points_recorded
    }

    /// `(name, state, records appended)` for every sink, in construction order.
    pub fn sink_states(&self) -> Vec<(String, SinkState, usize)> {
        self.slots
            .iter()
            .map(|slot| (slot.sink.name().to_string(), slot.state, slot.records))
            .collect()
    }

    /// Summary of the finished session, if any.
    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    /// Artifact paths of every sink still enabled, plus the metadata file.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.slots
            .iter()
            .filter(|slot| slot.state == SinkState::Active)
            .filter_map(|slot| slot.sink.path().map(Path::to_path_buf))
            .chain(std::iter::once(self.metadata_path()))
            .collect()
    }

    /// Opens every sink and writes its header. `Idle -> Active`.
    pub fn start(&mut self, metadata: ScanMetadata) -> ScanResult<()> {
        if self.state != RecorderState::Idle {
            return Err(ScanError::RecorderState(format!(
                "start called while {:?}",
                self.state
            )));
        }

        let started_at = Utc::now();
        self.metadata = metadata;
        self.metadata
            .insert("scan_start_time", started_at.with_timezone(&Local).to_rfc3339());
        self.metadata
            .insert("scan_start_timestamp", epoch_seconds(started_at));
        self.started_at = Some(started_at);

        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), "Failed to create output directory: {}", err);
        }

        for slot in &mut self.slots {
            if let Err(source) = slot.sink.open(&self.metadata) {
                let err = ScanError::SinkInit {
                    sink: slot.sink.name().to_string(),
                    source,
                };
                slot.disable(&err);
            }
        }

        self.state = RecorderState::Active;
        info!(stem = %self.stem, "Starting scan data collection");
        Ok(())
    }

    /// Appends one point to every enabled sink before returning.
    ///
    /// Points must arrive in index order starting at 0. Sink failures are
    /// absorbed here; only lifecycle misuse is returned as an error.
    pub fn add_point(&mut self, point: &DataPoint) -> ScanResult<()> {
        if self.state != RecorderState::Active {
            return Err(ScanError::RecorderState(format!(
                "add_point called while {:?}",
                self.state
            )));
        }
        if point.index != self.points_recorded {
            return Err(ScanError::RecorderState(format!(
                "expected point index {}, got {}",
                self.points_recorded, point.index
            )));
        }

        for slot in self.slots.iter_mut() {
            if slot.state == SinkState::Disabled {
                continue;
            }
            match slot.sink.append(point) {
                Ok(()) => slot.records += 1,
                Err(source) => {
                    let err = ScanError::SinkWrite {
                        sink: slot.sink.name().to_string(),
                        index: point.index,
                        source,
                    };
                    slot.disable(&err);
                }
            }
        }

        self.points_recorded += 1;
        Ok(())
    }

    /// Finalizes the session. `Active -> Finalized`; a no-op in any other state.
    ///
    /// `extra` is merged into the session metadata first; the summary keys
    /// (`scan_end_time`, `total_data_points`, `completion_status`, ...) are
    /// always the recorder's own.
    pub fn finish(&mut self, status: ScanStatus, extra: &ScanMetadata) -> Option<&SessionSummary> {
        if self.state != RecorderState::Active {
            return None;
        }
        self.state = RecorderState::Finalized;

        let ended_at = Utc::now();
        let started_at = self.started_at.unwrap_or(ended_at);
        let duration_seconds = (ended_at - started_at)
            .num_microseconds()
            .map_or(0.0, |us| us as f64 / 1_000_000.0)
            .max(0.0);
        let points_per_second = if duration_seconds > 0.0 {
            self.points_recorded as f64 / duration_seconds
        } else {
            0.0
        };

        self.metadata.merge(extra);
        self.metadata
            .insert("scan_end_time", ended_at.with_timezone(&Local).to_rfc3339());
        self.metadata.insert("scan_end_timestamp", epoch_seconds(ended_at));
        self.metadata.insert("scan_duration_seconds", duration_seconds);
        self.metadata.insert("total_data_points", self.points_recorded);
        self.metadata.insert("points_per_second", points_per_second);
        self.metadata.insert("completion_status", status.as_str());

        let mut artifacts = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.state == SinkState::Disabled {
                continue;
            }
            match slot.sink.finish(&self.metadata) {
                Ok(()) => artifacts.extend(slot.sink.path().map(Path::to_path_buf)),
                Err(err) => {
                    error!(sink = slot.sink.name(), "Error closing sink: {:#}", err);
                    slot.state = SinkState::Disabled;
                    slot.sink.close();
                }
            }
        }

        let metadata_path = self.metadata_path();
        match write_metadata(&metadata_path, &self.metadata) {
            Ok(()) => {
                info!(path = %metadata_path.display(), "Metadata saved");
                artifacts.push(metadata_path);
            }
            Err(err) => error!(path = %metadata_path.display(), "Failed to save metadata: {}", err),
        }

        info!(
            status = %status,
            points = self.points_recorded,
            "Scan finished: {} points in {:.1} seconds",
            self.points_recorded,
            duration_seconds
        );

        self.summary = Some(SessionSummary {
            status,
            total_points: self.points_recorded,
            duration_seconds,
            points_per_second,
            artifacts,
        });
        self.summary.as_ref()
    }
}

fn write_metadata(path: &Path, metadata: &ScanMetadata) -> ScanResult<()> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| ScanError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(path, json)?;
    Ok(())
}

impl Drop for ScanRecorder {
    fn drop(&mut self) {
        if self.state == RecorderState::Active {
            warn!(stem = %self.stem, "Recorder dropped while active; finalizing as aborted");
            self.finish(ScanStatus::Aborted, &ScanMetadata::new());
        }
        for slot in self.slots.iter_mut() {
            slot.sink.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;
    use anyhow::{bail, Result};
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Log {
        opened: bool,
        appended: Vec<usize>,
        finished: usize,
    }

    struct MemorySink {
        name: &'static str,
        log: Arc<Mutex<Log>>,
        fail_open: bool,
        fail_on_append: Option<usize>,
    }

    impl MemorySink {
        fn new(name: &'static str) -> (Self, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));
            (
                Self {
                    name,
                    log: log.clone(),
                    fail_open: false,
                    fail_on_append: None,
                },
                log,
            )
        }
    }

    impl ScanSink for MemorySink {
        fn name(&self) -> &str {
            self.name
        }

        fn path(&self) -> Option<&Path> {
            None
        }

        fn open(&mut self, _metadata: &ScanMetadata) -> Result<()> {
            if self.fail_open {
                bail!("disk full");
            }
            self.log.lock().unwrap().opened = true;
            Ok(())
        }

        fn append(&mut self, point: &DataPoint) -> Result<()> {
            let mut log = self.log.lock().unwrap();
            if self.fail_on_append == Some(log.appended.len() + 1) {
                bail!("write failed");
            }
            log.appended.push(point.index);
            Ok(())
        }

        fn finish(&mut self, _metadata: &ScanMetadata) -> Result<()> {
            self.log.lock().unwrap().finished += 1;
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn point(index: usize) -> DataPoint {
        DataPoint {
            index,
            position: Position::new(index as f64, 0.0),
            value: 1.0,
            acquired_at: Utc::now(),
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, log) = MemorySink::new("mem");
        let mut recorder = ScanRecorder::with_sinks(dir.path(), "scan", vec![Box::new(sink)]);
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(recorder.add_point(&point(0)).is_err());

        recorder.start(ScanMetadata::new()).unwrap();
        assert_eq!(recorder.state(), RecorderState::Active);
        assert!(recorder.start(ScanMetadata::new()).is_err());

        recorder.add_point(&point(0)).unwrap();
        recorder.add_point(&point(1)).unwrap();
        let summary = recorder
            .finish(ScanStatus::Completed, &ScanMetadata::new())
            .cloned()
            .unwrap();
        assert_eq!(summary.total_points, 2);
        assert_eq!(recorder.state(), RecorderState::Finalized);
        assert!(recorder.add_point(&point(2)).is_err());

        let log = log.lock().unwrap();
        assert!(log.opened);
        assert_eq!(log.appended, vec![0, 1]);
        assert_eq!(log.finished, 1);
    }

    #[test]
    fn test_rejects_out_of_order_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = ScanRecorder::with_sinks(dir.path(), "scan", Vec::new());
        recorder.start(ScanMetadata::new()).unwrap();
        recorder.add_point(&point(0)).unwrap();
        assert!(matches!(
            recorder.add_point(&point(2)),
            Err(ScanError::RecorderState(_))
        ));
        assert_eq!(recorder.points_recorded(), 1);
    }

    #[test]
    fn test_failed_open_disables_only_that_sink() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bad, bad_log) = MemorySink::new("bad");
        bad.fail_open = true;
        let (good, good_log) = MemorySink::new("good");
        let mut recorder =
            ScanRecorder::with_sinks(dir.path(), "scan", vec![Box::new(bad), Box::new(good)]);

        recorder.start(ScanMetadata::new()).unwrap();
        recorder.add_point(&point(0)).unwrap();
        recorder.finish(ScanStatus::Completed, &ScanMetadata::new());

        let states = recorder.sink_states();
        assert_eq!(states[0].1, SinkState::Disabled);
        assert_eq!(states[1], ("good".to_string(), SinkState::Active, 1));
        assert!(bad_log.lock().unwrap().appended.is_empty());
        assert_eq!(bad_log.lock().unwrap().finished, 0);
        assert_eq!(good_log.lock().unwrap().appended, vec![0]);
    }

    #[test]
    #[traced_test]
    fn test_write_fault_disables_sink_and_logs_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flaky, flaky_log) = MemorySink::new("flaky");
        flaky.fail_on_append = Some(2);
        let (good, good_log) = MemorySink::new("good");
        let mut recorder =
            ScanRecorder::with_sinks(dir.path(), "scan", vec![Box::new(flaky), Box::new(good)]);

        recorder.start(ScanMetadata::new()).unwrap();
        for i in 0..4 {
            recorder.add_point(&point(i)).unwrap();
        }
        recorder.finish(ScanStatus::Completed, &ScanMetadata::new());

        assert_eq!(flaky_log.lock().unwrap().appended, vec![0]);
        assert_eq!(good_log.lock().unwrap().appended, vec![0, 1, 2, 3]);
        assert_eq!(recorder.sink_states()[0].1, SinkState::Disabled);
        assert_eq!(recorder.points_recorded(), 4);
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("sink disabled for this session"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one sink fault report, got {}", n)),
            }
        });
    }

    #[test]
    fn test_artifacts_list_enabled_sinks_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = ScanRecorder::new(dir.path(), "scan", &[SinkFormat::Tdms]);
        recorder.start(ScanMetadata::new()).unwrap();
        assert_eq!(
            recorder.artifacts(),
            vec![dir.path().join("scan.tdms"), dir.path().join("scan_metadata.json")]
        );
        recorder.finish(ScanStatus::Completed, &ScanMetadata::new());
        assert!(dir.path().join("scan.tdms").exists());
    }

    #[test]
    fn test_finish_twice_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, log) = MemorySink::new("mem");
        let mut recorder = ScanRecorder::with_sinks(dir.path(), "scan", vec![Box::new(sink)]);
        recorder.start(ScanMetadata::new()).unwrap();
        recorder.add_point(&point(0)).unwrap();
        assert!(recorder.finish(ScanStatus::Completed, &ScanMetadata::new()).is_some());
        let first = std::fs::read_to_string(recorder.metadata_path()).unwrap();

        assert!(recorder
            .finish(ScanStatus::FailedMovement, &ScanMetadata::new())
            .is_none());
        let second = std::fs::read_to_string(recorder.metadata_path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(log.lock().unwrap().finished, 1);
        assert_eq!(
            recorder.metadata().get("completion_status"),
            Some(&serde_json::json!("completed"))
        );
    }

    #[test]
    fn test_finish_before_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = ScanRecorder::with_sinks(dir.path(), "scan", Vec::new());
        assert!(recorder.finish(ScanStatus::Completed, &ScanMetadata::new()).is_none());
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(!recorder.metadata_path().exists());
    }

    #[test]
    fn test_drop_finalizes_as_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, log) = MemorySink::new("mem");
        let metadata_path;
        {
            let mut recorder =
                ScanRecorder::with_sinks(dir.path(), "scan", vec![Box::new(sink)]);
            recorder.start(ScanMetadata::new()).unwrap();
            recorder.add_point(&point(0)).unwrap();
            metadata_path = recorder.metadata_path();
        }
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(metadata_path).unwrap()).unwrap();
        assert_eq!(json["completion_status"], "aborted");
        assert_eq!(json["total_data_points"], 1);
        assert_eq!(log.lock().unwrap().finished, 1);
    }

    #[test]
    fn test_extra_metadata_cannot_override_summary_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _log) = MemorySink::new("mem");
        let mut recorder = ScanRecorder::with_sinks(dir.path(), "scan", vec![Box::new(sink)]);
        recorder.start(ScanMetadata::new()).unwrap();
        recorder.add_point(&point(0)).unwrap();

        let mut extra = ScanMetadata::new();
        extra.insert("total_data_points", 99);
        extra.insert("completion_status", "bogus");
        extra.insert("scan_end_time", "yesterday");
        extra.insert("operator", "bench 2");
        recorder.finish(ScanStatus::Completed, &extra);

        let metadata = recorder.metadata();
        assert_eq!(metadata.get("total_data_points"), Some(&serde_json::json!(1)));
        assert_eq!(metadata.get("completion_status"), Some(&serde_json::json!("completed")));
        assert_ne!(metadata.get("scan_end_time"), Some(&serde_json::json!("yesterday")));
        assert_eq!(metadata.get("operator"), Some(&serde_json::json!("bench 2")));
    }

    #[test]
    fn test_unique_session_stem_skips_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let t = Local::now();
        let base = session_stem("scan", t);
        assert_eq!(unique_session_stem(dir.path(), "scan", t), base);

        std::fs::write(dir.path().join(format!("{}.tdms", base)), b"").unwrap();
        assert_eq!(unique_session_stem(dir.path(), "scan", t), format!("{}_2", base));

        std::fs::write(dir.path().join(format!("{}_2_metadata.json", base)), b"{}").unwrap();
        assert_eq!(unique_session_stem(dir.path(), "scan", t), format!("{}_3", base));
    }

    #[test]
    fn test_session_stem_format() {
        let t = Local::now();
        let stem = session_stem("scan", t);
        assert!(stem.starts_with("scan_"));
        assert_eq!(stem.len(), "scan_".len() + 15);
    }
}

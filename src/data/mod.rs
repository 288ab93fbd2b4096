//! Scan persistence: sinks and the session recorder.

pub mod recorder;
pub mod storage;
pub mod tdms;

pub use recorder::{
    session_stem, unique_session_stem, RecorderState, ScanRecorder, SessionSummary, SinkState,
};
pub use storage::{load_scan_csv, CsvRecord, CsvSink, ScanSink, SinkFormat};
pub use tdms::TdmsSink;

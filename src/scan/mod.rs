//! Scan planning and execution.

pub mod executor;
pub mod observer;
pub mod pattern;

pub use executor::{CancelFlag, ScanExecutor, ScanOutcome, ScanParameters};
pub use observer::{ObserverChannel, ObserverHandle, ProgressObserver, ScanObserver, ScanSummary};

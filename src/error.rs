//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`. Using the `thiserror`
//! crate, it gives one consistent way to report everything that can go wrong in a
//! scan, from rejected parameters to a stage that never reached its target.
//!
//! ## Error Hierarchy
//!
//! - **Precondition faults** (`NoAcquisitionSource`, `EmptyPlan`, `InvalidPattern`,
//!   `InvalidParameter`): rejected before the stage moves.
//! - **`Motion`** / **`Acquisition`**: fatal to the current scan. The executor stops
//!   and hands back the points collected so far; these never abort the process.
//! - **`SinkInit`** / **`SinkWrite`**: recovered inside the recorder by disabling
//!   the one sink that failed.
//! - **`Config`**, **`Io`**, **`FeatureNotEnabled`**: ambient failures from loading
//!   settings, touching the filesystem, or using a storage backend that was not
//!   compiled in.

use crate::core::Position;
use thiserror::Error;

/// Convenience alias for results using the scan error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Errors raised by the scan engine and its collaborators.
#[derive(Error, Debug)]
pub enum ScanError {
    /// No acquisition capability is bound; scanning would measure nothing.
    #[error("No acquisition source bound; refusing to scan without measurements")]
    NoAcquisitionSource,

    /// The plan has no positions.
    #[error("Scan plan is empty")]
    EmptyPlan,

    /// Pattern parameters cannot produce a plan.
    #[error("Invalid scan pattern: {0}")]
    InvalidPattern(String),

    /// A scan or configuration parameter is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The actuator did not reach a position.
    #[error("Failed to move to point {index} at {position}: {source}")]
    Motion {
        /// Plan index of the failed move
        index: usize,
        /// Target position
        position: Position,
        /// Opaque reason reported by the actuator
        source: anyhow::Error,
    },

    /// The acquisition source failed to return a reading.
    #[error("DAQ read failed at point {index} ({position}): {source}")]
    Acquisition {
        /// Plan index of the failed read
        index: usize,
        /// Position the stage was at
        position: Position,
        /// Opaque reason reported by the acquisition source
        source: anyhow::Error,
    },

    /// A persistence sink could not be opened.
    #[error("Failed to initialize {sink} sink: {source}")]
    SinkInit {
        /// Sink name (csv, tdms, ...)
        sink: String,
        /// Underlying failure
        source: anyhow::Error,
    },

    /// A persistence sink failed while appending.
    #[error("Failed to append point {index} to {sink} sink: {source}")]
    SinkWrite {
        /// Sink name (csv, tdms, ...)
        sink: String,
        /// Index of the point being written
        index: usize,
        /// Underlying failure
        source: anyhow::Error,
    },

    /// A recorder operation was called in the wrong lifecycle state.
    #[error("Recorder state error: {0}")]
    RecorderState(String),

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Filesystem failure outside of an individual sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage backend was requested but not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl ScanError {
    /// True for faults that reject a scan before any motion happens.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ScanError::NoAcquisitionSource
                | ScanError::EmptyPlan
                | ScanError::InvalidPattern(_)
                | ScanError::InvalidParameter(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Motion {
            index: 3,
            position: Position::new(1.0, 2.5),
            source: anyhow::anyhow!("limit switch"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to move to point 3 at (1.000, 2.500): limit switch"
        );
    }

    #[test]
    fn test_precondition_classification() {
        assert!(ScanError::NoAcquisitionSource.is_precondition());
        assert!(ScanError::EmptyPlan.is_precondition());
        assert!(!ScanError::RecorderState("finished".into()).is_precondition());
    }
}

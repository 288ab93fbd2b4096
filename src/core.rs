//! Core data types and hardware capability traits.
//!
//! This module defines the shared data model of a beam-mapping scan and the two
//! hardware seams the scan engine drives:
//!
//! - [`Actuator`]: an XY stage that moves to a target and blocks until settled
//! - [`AcquisitionSource`]: an analog input that returns one filtered reading
//!
//! # Data Flow
//!
//! ```text
//! pattern --[ScanPlan]--> ScanExecutor --(move, dwell, read)--> DataPoint
//!                                      |--> ScanRecorder (csv, tdms, json)
//!                                      '--> ObserverHandle (best effort)
//! ```
//!
//! Both capabilities are passed in explicitly by the caller. Nothing in the
//! crate holds a global handle to the stage or the DAQ, so tests substitute
//! fakes freely.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ScanError;

// =============================================================================
// Positions
// =============================================================================

/// Stage position in millimeters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in mm
    pub x: f64,
    /// Y coordinate in mm
    pub y: f64,
}

impl Position {
    /// Creates a new position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position in mm.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// The (0, 0) reference that generated coordinates are relative to.
///
/// Stored in stage coordinates. Patterns are expanded around it with
/// [`Origin::offset`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    /// Stage X of the reference point in mm
    pub x: f64,
    /// Stage Y of the reference point in mm
    pub y: f64,
}

impl Origin {
    /// Creates a new origin.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Absolute stage position for a displacement relative to this origin.
    pub fn offset(&self, dx: f64, dy: f64) -> Position {
        Position::new(self.x + dx, self.y + dy)
    }

    /// The origin itself as a stage position.
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

// =============================================================================
// Scan Plan
// =============================================================================

/// Ordered, immutable sequence of positions to visit.
///
/// Order is the literal visitation order. Once built, a plan cannot be
/// reordered or extended; the executor indexes points by their rank here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanPlan {
    positions: Vec<Position>,
}

impl ScanPlan {
    /// Wraps a list of positions as a plan.
    pub fn new(positions: Vec<Position>) -> Self {
        Self { positions }
    }

    /// Number of positions in the plan.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if the plan has no positions.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions in visitation order.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Iterator over positions in visitation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Position> {
        self.positions.iter()
    }

    /// Bounding box `(min, max)` of all positions, or `None` for an empty plan.
    pub fn bounds(&self) -> Option<(Position, Position)> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(lo, hi), p| {
            (
                Position::new(lo.x.min(p.x), lo.y.min(p.y)),
                Position::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        }))
    }
}

impl From<Vec<Position>> for ScanPlan {
    fn from(positions: Vec<Position>) -> Self {
        Self::new(positions)
    }
}

impl<'a> IntoIterator for &'a ScanPlan {
    type Item = &'a Position;
    type IntoIter = std::slice::Iter<'a, Position>;

    fn into_iter(self) -> Self::IntoIter {
        self.positions.iter()
    }
}

// =============================================================================
// Data Points
// =============================================================================

/// One measurement taken at one plan position.
///
/// # Fields
///
/// * `index` - 0-based rank of the position in the executed plan
/// * `position` - Stage position the reading was taken at
/// * `value` - Filtered DAQ reading in volts
/// * `acquired_at` - UTC capture time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// 0-based rank in the plan, assigned once by the executor
    pub index: usize,
    /// Stage position in mm
    pub position: Position,
    /// Measured value in volts
    pub value: f64,
    /// UTC timestamp of the reading
    pub acquired_at: DateTime<Utc>,
}

impl DataPoint {
    /// Capture time as fractional seconds since the Unix epoch.
    pub fn epoch_seconds(&self) -> f64 {
        self.acquired_at.timestamp_micros() as f64 / 1_000_000.0
    }
}

// =============================================================================
// Acquisition Filters
// =============================================================================

/// Reduction applied by the acquisition source to the samples in one window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Arithmetic mean of all samples
    #[default]
    Mean,
    /// Middle value; robust to outliers
    Median,
    /// Root mean square; useful for AC signals
    Rms,
    /// Mean of samples within two standard deviations of the mean
    StdFiltered,
}

impl FilterKind {
    /// Stable lowercase name used in metadata and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Mean => "mean",
            FilterKind::Median => "median",
            FilterKind::Rms => "rms",
            FilterKind::StdFiltered => "std_filtered",
        }
    }

    /// Reduces a window of samples to one value. Returns `None` if empty.
    pub fn apply(&self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let value = match self {
            FilterKind::Mean => mean,
            FilterKind::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            FilterKind::Rms => (samples.iter().map(|v| v * v).sum::<f64>() / n).sqrt(),
            FilterKind::StdFiltered => {
                // Population standard deviation
                let std = (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
                let kept: Vec<f64> = samples
                    .iter()
                    .copied()
                    .filter(|v| (v - mean).abs() < 2.0 * std)
                    .collect();
                if kept.is_empty() {
                    mean
                } else {
                    kept.iter().sum::<f64>() / kept.len() as f64
                }
            }
        };
        Some(value)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(FilterKind::Mean),
            "median" => Ok(FilterKind::Median),
            "rms" => Ok(FilterKind::Rms),
            "std_filtered" => Ok(FilterKind::StdFiltered),
            other => Err(ScanError::InvalidParameter(format!(
                "unknown filter '{}'; expected one of: mean, median, rms, std_filtered",
                other
            ))),
        }
    }
}

// =============================================================================
// Scan Status
// =============================================================================

/// How a scan session ended. Written to metadata as `completion_status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Every plan position was measured
    Completed,
    /// The actuator failed to reach a position
    FailedMovement,
    /// The acquisition source failed to return a reading
    FailedDaqRead,
    /// A cancel request was honoured between points
    Cancelled,
    /// The recorder was torn down without an explicit finish
    Aborted,
}

impl ScanStatus {
    /// Snake-case label as written to artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Completed => "completed",
            ScanStatus::FailedMovement => "failed_movement",
            ScanStatus::FailedDaqRead => "failed_daq_read",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability for an XY stage.
///
/// `move_to` resolves only once the stage has settled at `target`. Any error
/// means the target was not reached; the reason is opaque to the executor.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Move to an absolute stage position and wait until settled.
    async fn move_to(&self, target: Position) -> Result<()>;
}

/// Capability for an analog input that averages internally.
#[async_trait]
pub trait AcquisitionSource: Send + Sync {
    /// Acquire for `window` on `channel` and reduce the samples with `filter`.
    async fn read_filtered(
        &self,
        channel: u32,
        window: Duration,
        filter: FilterKind,
    ) -> Result<f64>;
}

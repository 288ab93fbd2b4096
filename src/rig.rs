//! The scan rig: one stage, one optional DAQ, one origin.
//!
//! `ScanRig` is the session-level entry point. It owns the injected hardware
//! capabilities, remembers the origin that patterns are centred on, and builds
//! executors for individual scans.
//!
//! ```rust,no_run
//! use beamscan::core::AcquisitionSource;
//! use beamscan::hardware::mock::{MockDaq, MockStage};
//! use beamscan::rig::ScanRig;
//! use beamscan::scan::ScanParameters;
//! use beamscan::data::{ScanRecorder, SinkFormat};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let stage = Arc::new(MockStage::new());
//! let daq: Arc<dyn AcquisitionSource> = Arc::new(MockDaq::new(stage.position_handle()));
//! let mut rig = ScanRig::new(stage, Some(daq));
//! rig.set_origin(904.0, 620.0);
//!
//! let plan = rig.rectangle(20.0, 15.0, 2.0, 2.0)?;
//! let mut recorder = ScanRecorder::new("data", "scan", &[SinkFormat::Csv, SinkFormat::Tdms]);
//! let outcome = rig
//!     .execute(&plan, ScanParameters::default(), &mut recorder, None)
//!     .await?;
//! println!("{} points, {}", outcome.points.len(), outcome.status);
//! # Ok(())
//! # }
//! ```

use crate::core::{AcquisitionSource, Actuator, Origin, ScanPlan};
use crate::data::recorder::ScanRecorder;
use crate::error::{ScanError, ScanResult};
use crate::metadata::ScanMetadata;
use crate::scan::executor::{ScanExecutor, ScanOutcome, ScanParameters};
use crate::scan::observer::ObserverChannel;
use crate::scan::pattern;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

/// Stage + DAQ + origin for one session.
pub struct ScanRig {
    actuator: Arc<dyn Actuator>,
    acquisition: Option<Arc<dyn AcquisitionSource>>,
    origin: Origin,
}

impl ScanRig {
    /// Rig over the given capabilities with the origin at stage (0, 0).
    pub fn new(
        actuator: Arc<dyn Actuator>,
        acquisition: Option<Arc<dyn AcquisitionSource>>,
    ) -> Self {
        Self {
            actuator,
            acquisition,
            origin: Origin::default(),
        }
    }

    /// Sets the reference point for every pattern generated afterwards.
    ///
    /// Takes `&mut self`, so it cannot run while a scan borrows the rig.
    pub fn set_origin(&mut self, x: f64, y: f64) {
        self.origin = Origin::new(x, y);
        info!("Origin set to ({}, {})", x, y);
    }

    /// Current origin.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Whether a DAQ is bound.
    pub fn has_acquisition(&self) -> bool {
        self.acquisition.is_some()
    }

    /// Moves the stage to the origin.
    pub async fn move_to_origin(&self) -> anyhow::Result<()> {
        self.actuator.move_to(self.origin.position()).await
    }

    /// Serpentine raster centred on the origin.
    pub fn rectangle(
        &self,
        width: f64,
        height: f64,
        step_x: f64,
        step_y: f64,
    ) -> ScanResult<ScanPlan> {
        pattern::rectangle(self.origin, width, height, step_x, step_y)
    }

    /// Filled disc centred on the origin.
    pub fn circle(&self, radius: f64, step_x: f64, step_y: f64) -> ScanResult<ScanPlan> {
        pattern::circle(self.origin, radius, step_x, step_y)
    }

    /// Visits the centre and the four edge midpoints of a `width` x `height`
    /// area, pausing at each, then returns to the origin.
    pub async fn test_boundaries(
        &self,
        width: f64,
        height: f64,
        pause: Duration,
    ) -> ScanResult<()> {
        let points = pattern::boundary_points(self.origin, width, height);
        for (index, position) in points.into_iter().enumerate() {
            info!("  Point {}: {}", index + 1, position);
            self.actuator
                .move_to(position)
                .await
                .map_err(|source| ScanError::Motion {
                    index,
                    position,
                    source,
                })?;
            sleep(pause).await;
        }
        let origin = self.origin.position();
        self.actuator
            .move_to(origin)
            .await
            .map_err(|source| ScanError::Motion {
                index: 5,
                position: origin,
                source,
            })
    }

    /// Executor bound to this rig's hardware, tagged with the origin.
    pub fn executor(&self, params: ScanParameters) -> ScanExecutor<'_> {
        let mut context = ScanMetadata::new();
        context.insert("origin_x", self.origin.x);
        context.insert("origin_y", self.origin.y);
        ScanExecutor::new(self.actuator.as_ref(), self.acquisition.as_deref(), params)
            .with_context(context)
    }

    /// Runs `plan` on this rig's hardware. Shorthand for
    /// `self.executor(params).run(..)`.
    pub async fn execute(
        &self,
        plan: &ScanPlan,
        params: ScanParameters,
        recorder: &mut ScanRecorder,
        observer: Option<&ObserverChannel>,
    ) -> ScanResult<ScanOutcome> {
        self.executor(params).run(plan, recorder, observer).await
    }
}

/// Rough scan duration: every point costs one move and one dwell.
pub fn estimate_scan_time(
    num_points: usize,
    movement_time: Duration,
    dwell_time: Duration,
) -> Duration {
    (movement_time + dwell_time).saturating_mul(u32::try_from(num_points).unwrap_or(u32::MAX))
}

/// Formats a duration as `H:MM:SS`, `M:SS` or `Ns`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}:{:02}", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

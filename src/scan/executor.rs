//! The scan execution engine.
//!
//! [`ScanExecutor::run`] walks a [`ScanPlan`] strictly in order. For every
//! position it awaits, one after another:
//!
//! 1. `Actuator::move_to` (plus a one-off settle delay after the first move)
//! 2. the dwell time
//! 3. `AcquisitionSource::read_filtered`
//!
//! and then hands the resulting [`DataPoint`] to the recorder (synchronously,
//! before the next move is commanded) and to the observer (fire and forget).
//! There is never more than one move or read in flight.
//!
//! A failed move or read ends the scan, not the program: the caller gets every
//! point collected so far and the recorder is finalized with the matching
//! [`ScanStatus`].

use crate::core::{AcquisitionSource, Actuator, DataPoint, FilterKind, ScanPlan, ScanStatus};
use crate::data::recorder::{RecorderState, ScanRecorder, SessionSummary};
use crate::error::{ScanError, ScanResult};
use crate::metadata::ScanMetadata;
use crate::scan::observer::ObserverChannel;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Timing and acquisition settings for one scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanParameters {
    /// Wait after the stage settles, before sampling
    pub dwell_time: Duration,
    /// Extra wait after the first successful move only
    pub first_move_settle: Duration,
    /// DAQ input channel
    pub channel: u32,
    /// Length of the acquisition window per point
    pub acquisition_window: Duration,
    /// Reduction applied to the window's samples
    pub filter: FilterKind,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            dwell_time: Duration::from_secs(1),
            first_move_settle: Duration::from_secs(2),
            channel: 0,
            acquisition_window: Duration::from_millis(100),
            filter: FilterKind::Mean,
        }
    }
}

impl ScanParameters {
    /// Rejects parameters that cannot produce a measurement.
    pub fn validate(&self) -> ScanResult<()> {
        if self.acquisition_window.is_zero() {
            return Err(ScanError::InvalidParameter(
                "acquisition window must be longer than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Scan parameters as metadata entries.
    pub fn to_metadata(&self) -> ScanMetadata {
        let mut metadata = ScanMetadata::new();
        metadata.insert("dwell_time", self.dwell_time.as_secs_f64());
        metadata.insert("first_move_settle", self.first_move_settle.as_secs_f64());
        metadata.insert("daq_channel", self.channel);
        metadata.insert("acquisition_time", self.acquisition_window.as_secs_f64());
        metadata.insert("filter_type", self.filter.as_str());
        metadata
    }
}

/// Cooperative stop request, checked between points only.
///
/// A move or read already in flight always completes; the scan then stops
/// before commanding the next move and finalizes as [`ScanStatus::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop before the next point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a scan that got past its preconditions.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Points in visitation order; a gapless prefix of the plan
    pub points: Vec<DataPoint>,
    /// How the scan ended
    pub status: ScanStatus,
    /// The motion or acquisition fault that ended the scan, if any
    pub fault: Option<ScanError>,
    /// Recorder summary, if this run finalized the recorder
    pub summary: Option<SessionSummary>,
}

impl ScanOutcome {
    /// True if every plan position was measured.
    pub fn is_complete(&self) -> bool {
        self.status == ScanStatus::Completed
    }
}

/// Drives an actuator and an acquisition source through a plan.
pub struct ScanExecutor<'a> {
    actuator: &'a dyn Actuator,
    acquisition: Option<&'a dyn AcquisitionSource>,
    params: ScanParameters,
    cancel: Option<CancelFlag>,
    context: ScanMetadata,
}

impl<'a> ScanExecutor<'a> {
    /// Executor over the given capabilities.
    ///
    /// `acquisition` may be absent; `run` then fails with
    /// [`ScanError::NoAcquisitionSource`] before moving anything.
    pub fn new(
        actuator: &'a dyn Actuator,
        acquisition: Option<&'a dyn AcquisitionSource>,
        params: ScanParameters,
    ) -> Self {
        Self {
            actuator,
            acquisition,
            params,
            cancel: None,
            context: ScanMetadata::new(),
        }
    }

    /// Honour `flag` between points.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Extra metadata (origin, pattern, operator notes) for the recorder.
    pub fn with_context(mut self, context: ScanMetadata) -> Self {
        self.context.merge(&context);
        self
    }

    /// Parameters this executor runs with.
    pub fn params(&self) -> &ScanParameters {
        &self.params
    }

    fn session_metadata(&self, plan: &ScanPlan) -> ScanMetadata {
        let mut metadata = self.params.to_metadata();
        metadata.insert("planned_points", plan.len());
        metadata.merge(&self.context);
        metadata
    }

    /// Runs `plan` to completion or to the first motion/acquisition fault.
    ///
    /// Precondition faults (no acquisition source, empty plan, bad parameters,
    /// a recorder that is finalized or already holds points) are returned as
    /// `Err` before any motion. Everything else comes back as a
    /// [`ScanOutcome`] holding the points measured so far. An idle `recorder`
    /// is started here; in every case it is finalized before this returns.
    pub async fn run(
        &self,
        plan: &ScanPlan,
        recorder: &mut ScanRecorder,
        observer: Option<&ObserverChannel>,
    ) -> ScanResult<ScanOutcome> {
        let Some(acquisition) = self.acquisition else {
            error!("DAQ not connected; cannot perform scan without DAQ readings");
            return Err(ScanError::NoAcquisitionSource);
        };
        if plan.is_empty() {
            return Err(ScanError::EmptyPlan);
        }
        self.params.validate()?;

        let metadata = self.session_metadata(plan);
        match recorder.state() {
            RecorderState::Idle => recorder.start(metadata.clone())?,
            RecorderState::Active if recorder.points_recorded() > 0 => {
                return Err(ScanError::RecorderState(format!(
                    "recorder already holds {} points; use a new session",
                    recorder.points_recorded()
                )))
            }
            RecorderState::Active => {}
            RecorderState::Finalized => {
                return Err(ScanError::RecorderState(
                    "recorder already finalized; use a new session".to_string(),
                ))
            }
        }

        let total = plan.len();
        info!(points = total, "Starting scan of {} points", total);

        let mut points = Vec::with_capacity(total);
        let mut status = ScanStatus::Completed;
        let mut fault = None;
        let mut first_move = true;

        for (index, &position) in plan.iter().enumerate() {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                warn!(index, "Scan cancelled before point {}", index);
                status = ScanStatus::Cancelled;
                break;
            }

            if let Err(source) = self.actuator.move_to(position).await {
                let err = ScanError::Motion {
                    index,
                    position,
                    source,
                };
                error!(index, x = position.x, y = position.y, "{:#}", err);
                status = ScanStatus::FailedMovement;
                fault = Some(err);
                break;
            }

            if first_move {
                sleep(self.params.first_move_settle).await;
                first_move = false;
            }
            sleep(self.params.dwell_time).await;

            let value = match acquisition
                .read_filtered(
                    self.params.channel,
                    self.params.acquisition_window,
                    self.params.filter,
                )
                .await
            {
                Ok(value) => value,
                Err(source) => {
                    let err = ScanError::Acquisition {
                        index,
                        position,
                        source,
                    };
                    error!(index, x = position.x, y = position.y, "{:#}", err);
                    status = ScanStatus::FailedDaqRead;
                    fault = Some(err);
                    break;
                }
            };

            let point = DataPoint {
                index,
                position,
                value,
                acquired_at: Utc::now(),
            };
            debug!(
                index,
                x = position.x,
                y = position.y,
                value,
                "Point {}/{}",
                index + 1,
                total
            );

            if let Err(err) = recorder.add_point(&point) {
                error!(index, "Recorder rejected point: {}", err);
            }
            if let Some(observer) = observer {
                observer.notify_point(&point);
            }
            points.push(point);
        }

        let summary = recorder.finish(status, &metadata).cloned();
        if let Some(observer) = observer {
            observer.notify_complete();
        }

        match status {
            ScanStatus::Completed => info!(points = points.len(), "Scan completed"),
            _ => warn!(
                status = %status,
                "Scan stopped after {}/{} points",
                points.len(),
                total
            ),
        }

        Ok(ScanOutcome {
            points,
            status,
            fault,
            summary,
        })
    }
}

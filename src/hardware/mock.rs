//! Mock Hardware Implementations
//!
//! Provides a simulated XY stage and analog DAQ for running scans without the
//! physical rig. All mock devices use async-safe waits (tokio::time::sleep, not
//! std::thread::sleep), so tests can run them on a paused clock.
//!
//! # Available Mocks
//!
//! - `MockStage` - XY stage with travel time proportional to distance
//! - `MockDaq` - analog input that samples a gaussian beam at the stage position
//!
//! Both can be told to fail on the k-th call (0-based) to exercise fault paths.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::core::{AcquisitionSource, Actuator, FilterKind, Position};

/// Live stage position shared between a stage and the DAQ that "sees" it.
pub type SharedPosition = Arc<RwLock<Position>>;

// =============================================================================
// MockStage - Simulated XY Stage
// =============================================================================

/// Mock XY stage with realistic timing
///
/// Simulates a stage with:
/// - Configurable motion speed (default 50mm/sec, both axes together)
/// - 50ms settling time after motion
/// - Thread-safe position tracking
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::new();
/// stage.move_to(Position::new(10.0, 0.0)).await?; // Takes ~200ms
/// assert_eq!(stage.position().await, Position::new(10.0, 0.0));
/// ```
pub struct MockStage {
    position: SharedPosition,
    speed_mm_per_sec: f64,
    settle: Duration,
    fail_on_move: Option<usize>,
    moves: AtomicUsize,
}

impl MockStage {
    /// Create new mock stage at (0, 0)
    pub fn new() -> Self {
        Self::with_speed(50.0)
    }

    /// Create mock stage with custom speed
    ///
    /// # Arguments
    /// * `speed_mm_per_sec` - Motion speed in mm/sec
    pub fn with_speed(speed_mm_per_sec: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new(Position::new(0.0, 0.0))),
            speed_mm_per_sec,
            settle: Duration::from_millis(50),
            fail_on_move: None,
            moves: AtomicUsize::new(0),
        }
    }

    /// Make the `move_index`-th move (0-based) report a fault.
    pub fn fail_on_move(mut self, move_index: usize) -> Self {
        self.fail_on_move = Some(move_index);
        self
    }

    /// Handle to the live position, for a [`MockDaq`].
    pub fn position_handle(&self) -> SharedPosition {
        self.position.clone()
    }

    /// Current position.
    pub async fn position(&self) -> Position {
        *self.position.read().await
    }

    /// Moves commanded so far, including failed ones.
    pub fn move_count(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for MockStage {
    async fn move_to(&self, target: Position) -> Result<()> {
        let move_index = self.moves.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_move == Some(move_index) {
            bail!("MockStage: simulated controller fault on move {}", move_index);
        }

        let current = *self.position.read().await;
        let distance = current.distance_to(&target);
        let travel = if self.speed_mm_per_sec > 0.0 {
            Duration::from_secs_f64(distance / self.speed_mm_per_sec)
        } else {
            Duration::ZERO
        };

        debug!("MockStage: Moving from {} to {} ({:?})", current, target, travel);
        sleep(travel).await;
        *self.position.write().await = target;

        sleep(self.settle).await;
        debug!("MockStage: Settled at {}", target);
        Ok(())
    }
}

// =============================================================================
// MockDaq - Simulated Analog Input
// =============================================================================

/// Gaussian beam profile seen by [`MockDaq`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeamProfile {
    /// Beam centre in stage coordinates
    pub center: Position,
    /// 1/e² radius parameter (sigma) in mm
    pub sigma_mm: f64,
    /// Signal at the centre above the offset, in volts
    pub peak_volts: f64,
    /// Background level in volts
    pub offset_volts: f64,
}

impl Default for BeamProfile {
    fn default() -> Self {
        Self {
            center: Position::new(0.0, 0.0),
            sigma_mm: 5.0,
            peak_volts: 2.0,
            offset_volts: 0.01,
        }
    }
}

impl BeamProfile {
    /// Noise-free signal at `at`.
    pub fn signal_at(&self, at: Position) -> f64 {
        let r2 = (at.x - self.center.x).powi(2) + (at.y - self.center.y).powi(2);
        let sigma2 = self.sigma_mm * self.sigma_mm;
        if sigma2 <= 0.0 {
            return self.offset_volts;
        }
        self.offset_volts + self.peak_volts * (-r2 / (2.0 * sigma2)).exp()
    }
}

/// Mock DAQ sampling a [`BeamProfile`] at the stage's live position.
///
/// Each read takes `window` of (paused-clock friendly) time, draws
/// `sample_rate * window` samples with uniform noise, and reduces them with
/// the requested [`FilterKind`].
pub struct MockDaq {
    stage_position: SharedPosition,
    profile: BeamProfile,
    noise_volts: f64,
    sample_rate_hz: f64,
    channels: u32,
    fail_on_read: Option<usize>,
    reads: AtomicUsize,
}

impl MockDaq {
    /// DAQ watching `stage_position`, 1 kHz, 8 channels, 5 mV noise.
    pub fn new(stage_position: SharedPosition) -> Self {
        Self {
            stage_position,
            profile: BeamProfile::default(),
            noise_volts: 0.005,
            sample_rate_hz: 1000.0,
            channels: 8,
            fail_on_read: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Replace the beam profile.
    pub fn with_profile(mut self, profile: BeamProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Peak-to-peak half width of the uniform noise, in volts.
    pub fn with_noise(mut self, noise_volts: f64) -> Self {
        self.noise_volts = noise_volts.abs();
        self
    }

    /// Samples per second, clamped to 1..=250 kHz.
    pub fn with_sample_rate(mut self, rate_hz: f64) -> Self {
        self.sample_rate_hz = rate_hz.clamp(1.0, 250_000.0);
        self
    }

    /// Make the `read_index`-th read (0-based) report a fault.
    pub fn fail_on_read(mut self, read_index: usize) -> Self {
        self.fail_on_read = Some(read_index);
        self
    }

    /// Reads requested so far, including failed ones.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcquisitionSource for MockDaq {
    async fn read_filtered(
        &self,
        channel: u32,
        window: Duration,
        filter: FilterKind,
    ) -> Result<f64> {
        let read_index = self.reads.fetch_add(1, Ordering::SeqCst);
        if channel >= self.channels {
            bail!(
                "MockDaq: channel ai{} out of range (0..{})",
                channel,
                self.channels
            );
        }
        if self.fail_on_read == Some(read_index) {
            bail!("MockDaq: simulated read timeout on read {}", read_index);
        }

        sleep(window).await;
        let at = *self.stage_position.read().await;
        let signal = self.profile.signal_at(at);

        let count = ((self.sample_rate_hz * window.as_secs_f64()) as usize).max(1);
        let samples: Vec<f64> = {
            let mut rng = rand::thread_rng();
            (0..count)
                .map(|_| {
                    if self.noise_volts > 0.0 {
                        signal + rng.gen_range(-self.noise_volts..=self.noise_volts)
                    } else {
                        signal
                    }
                })
                .collect()
        };

        let value = filter
            .apply(&samples)
            .ok_or_else(|| anyhow::anyhow!("MockDaq: empty acquisition window"))?;
        debug!("MockDaq: ai{} at {} -> {:.4}V ({})", channel, at, value, filter);
        Ok(value)
    }
}

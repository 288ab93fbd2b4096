//! Best-effort observer side channel.
//!
//! Visualization and progress reporting subscribe to a scan through a bounded
//! channel drained on a dedicated thread, off the async runtime, so a slow
//! observer never holds up the task driving the scan. The executor only calls
//! [`ObserverChannel::notify_point`] / [`ObserverChannel::notify_complete`],
//! which never wait: if the channel is full the message is dropped, and if the
//! observer thread has died the executor carries on without it.

use crate::core::DataPoint;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Receives scan progress. Runs on its own thread; may be slow or fail freely.
pub trait ScanObserver: Send {
    /// Called once per recorded point, in index order (minus any dropped).
    fn on_point(&mut self, point: &DataPoint) -> Result<()>;

    /// Called once when the scan ends, however it ends.
    fn on_complete(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
enum ObserverEvent {
    Point(DataPoint),
    Complete,
}

/// Non-blocking sending half handed to the executor.
pub struct ObserverChannel {
    tx: mpsc::Sender<ObserverEvent>,
    dropped: AtomicUsize,
    closed_reported: AtomicBool,
}

impl ObserverChannel {
    fn send(&self, event: ObserverEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "Observer lagging; event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                if !self.closed_reported.swap(true, Ordering::Relaxed) {
                    warn!("Observer thread is gone; continuing scan without it");
                }
            }
        }
    }

    /// Forwards a point without waiting.
    pub fn notify_point(&self, point: &DataPoint) {
        self.send(ObserverEvent::Point(point.clone()));
    }

    /// Signals the end of the scan without waiting.
    pub fn notify_complete(&self) {
        self.send(ObserverEvent::Complete);
    }

    /// Events dropped because the observer could not keep up.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// An observer running on its own thread, plus its channel.
pub struct ObserverHandle<O> {
    channel: ObserverChannel,
    done: oneshot::Receiver<O>,
}

impl<O: ScanObserver + 'static> ObserverHandle<O> {
    /// Moves `observer` onto a dedicated thread behind a channel of
    /// `capacity` events.
    pub fn spawn(mut observer: O, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let (done_tx, done) = oneshot::channel();
        let spawned = thread::Builder::new()
            .name("scan-observer".to_string())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    let result = match &event {
                        ObserverEvent::Point(point) => observer.on_point(point),
                        ObserverEvent::Complete => observer.on_complete(),
                    };
                    if let Err(err) = result {
                        warn!("Observer failed on {:?}: {:#}", event, err);
                    }
                }
                // join() may already have been abandoned
                let _ = done_tx.send(observer);
            });
        if let Err(err) = spawned {
            warn!("Could not start observer thread: {}", err);
        }

        Self {
            channel: ObserverChannel {
                tx,
                dropped: AtomicUsize::new(0),
                closed_reported: AtomicBool::new(false),
            },
            done,
        }
    }

    /// Sending half for the executor.
    pub fn channel(&self) -> &ObserverChannel {
        &self.channel
    }

    /// Closes the channel, waits for the observer to drain it, and returns it.
    ///
    /// Fails only if the observer panicked or its thread never started.
    pub async fn join(self) -> Result<O> {
        let Self { channel, done } = self;
        drop(channel);
        done.await
            .map_err(|_| anyhow!("observer thread ended without returning its observer"))
    }
}

/// Logs `Point i/N: (x, y) -> V` for each point.
pub struct ProgressObserver {
    total: usize,
    seen: usize,
}

impl ProgressObserver {
    /// Progress reporter for a plan of `total` points.
    pub fn new(total: usize) -> Self {
        Self { total, seen: 0 }
    }
}

impl ScanObserver for ProgressObserver {
    fn on_point(&mut self, point: &DataPoint) -> Result<()> {
        self.seen += 1;
        info!(
            "Point {}/{}: ({:.1}, {:.1}) -> {:.4}V",
            point.index + 1,
            self.total,
            point.position.x,
            point.position.y,
            point.value
        );
        Ok(())
    }

    fn on_complete(&mut self) -> Result<()> {
        info!("Scan stream ended after {}/{} points", self.seen, self.total);
        Ok(())
    }
}

/// Running statistics of the values seen, for live colour scaling.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanSummary {
    /// Points seen
    pub count: usize,
    /// Smallest value seen
    pub min: Option<f64>,
    /// Largest value seen
    pub max: Option<f64>,
    sum: f64,
    /// Set once `on_complete` arrives
    pub completed: bool,
    /// Most recent point
    pub last: Option<DataPoint>,
}

impl ScanSummary {
    /// Mean of the values seen.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

impl ScanObserver for ScanSummary {
    fn on_point(&mut self, point: &DataPoint) -> Result<()> {
        self.count += 1;
        self.sum += point.value;
        self.min = Some(self.min.map_or(point.value, |m| m.min(point.value)));
        self.max = Some(self.max.map_or(point.value, |m| m.max(point.value)));
        self.last = Some(point.clone());
        Ok(())
    }

    fn on_complete(&mut self) -> Result<()> {
        self.completed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;
    use chrono::Utc;

    fn point(index: usize, value: f64) -> DataPoint {
        DataPoint {
            index,
            position: Position::new(0.0, 0.0),
            value,
            acquired_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_summary_receives_points_and_completion() {
        let handle = ObserverHandle::spawn(ScanSummary::default(), 16);
        for (i, v) in [0.5, -1.0, 2.5].into_iter().enumerate() {
            handle.channel().notify_point(&point(i, v));
        }
        handle.channel().notify_complete();

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, Some(-1.0));
        assert_eq!(summary.max, Some(2.5));
        assert_eq!(summary.mean(), Some(2.0 / 3.0));
        assert!(summary.completed);
        assert_eq!(summary.last.unwrap().index, 2);
    }

    /// Parks in `on_point` until the test drops the gate.
    struct Gated {
        entered: std::sync::mpsc::Sender<()>,
        gate: std::sync::mpsc::Receiver<()>,
        seen: usize,
    }

    impl ScanObserver for Gated {
        fn on_point(&mut self, _point: &DataPoint) -> Result<()> {
            self.seen += 1;
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (entered_tx, entered) = std::sync::mpsc::channel();
        let (gate_tx, gate) = std::sync::mpsc::channel::<()>();
        let handle = ObserverHandle::spawn(
            Gated {
                entered: entered_tx,
                gate,
                seen: 0,
            },
            2,
        );

        handle.channel().notify_point(&point(0, 1.0));
        entered
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        // observer is parked with an empty channel: two fit, three are dropped
        for i in 1..6 {
            handle.channel().notify_point(&point(i, 1.0));
        }
        assert_eq!(handle.channel().dropped(), 3);

        drop(gate_tx);
        let observer = handle.join().await.unwrap();
        assert_eq!(observer.seen, 3);
    }

    struct Panicking;

    impl ScanObserver for Panicking {
        fn on_point(&mut self, _point: &DataPoint) -> Result<()> {
            panic!("plot window closed");
        }
    }

    #[tokio::test]
    async fn test_dead_observer_does_not_block_sender() {
        let handle = ObserverHandle::spawn(Panicking, 1);
        handle.channel().notify_point(&point(0, 1.0));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        for i in 1..10 {
            handle.channel().notify_point(&point(i, 1.0));
        }
        handle.channel().notify_complete();
        assert!(handle.join().await.is_err());
    }
}

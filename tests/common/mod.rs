//! Shared fakes for the integration tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use beamscan::core::{AcquisitionSource, Actuator, DataPoint, FilterKind, Position};
use beamscan::data::ScanSink;
use beamscan::metadata::ScanMetadata;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// What a fake device saw, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A completed move
    Moved(Position),
    /// A read taken while the stage stood at this position
    Read(Position),
}

/// Event log shared by a [`FakeStage`] and a [`FakeDaq`].
pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Stage that moves instantly and can fail on one move.
pub struct FakeStage {
    pub log: EventLog,
    pub at: Arc<Mutex<Position>>,
    pub fail_on_move: Option<usize>,
    moves: Mutex<usize>,
    pub move_times: Mutex<Vec<Instant>>,
}

impl FakeStage {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            at: Arc::new(Mutex::new(Position::new(0.0, 0.0))),
            fail_on_move: None,
            moves: Mutex::new(0),
            move_times: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, move_index: usize) -> Self {
        self.fail_on_move = Some(move_index);
        self
    }

    pub fn moves(&self) -> usize {
        *self.moves.lock().unwrap()
    }
}

#[async_trait]
impl Actuator for FakeStage {
    async fn move_to(&self, target: Position) -> Result<()> {
        let index = {
            let mut moves = self.moves.lock().unwrap();
            let index = *moves;
            *moves += 1;
            index
        };
        self.move_times.lock().unwrap().push(Instant::now());
        if self.fail_on_move == Some(index) {
            bail!("axis 2 following error");
        }
        *self.at.lock().unwrap() = target;
        self.log.lock().unwrap().push(Event::Moved(target));
        Ok(())
    }
}

/// DAQ returning `x + 10 y` of the stage position, optionally failing once.
pub struct FakeDaq {
    pub log: EventLog,
    pub at: Arc<Mutex<Position>>,
    pub fail_on_read: Option<usize>,
    reads: Mutex<usize>,
    pub read_times: Mutex<Vec<Instant>>,
}

impl FakeDaq {
    pub fn new(stage: &FakeStage) -> Self {
        Self {
            log: stage.log.clone(),
            at: stage.at.clone(),
            fail_on_read: None,
            reads: Mutex::new(0),
            read_times: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, read_index: usize) -> Self {
        self.fail_on_read = Some(read_index);
        self
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }
}

#[async_trait]
impl AcquisitionSource for FakeDaq {
    async fn read_filtered(
        &self,
        _channel: u32,
        window: Duration,
        _filter: FilterKind,
    ) -> Result<f64> {
        let index = {
            let mut reads = self.reads.lock().unwrap();
            let index = *reads;
            *reads += 1;
            index
        };
        self.read_times.lock().unwrap().push(Instant::now());
        if self.fail_on_read == Some(index) {
            bail!("DAQ read timed out");
        }
        tokio::time::sleep(window).await;
        let at = *self.at.lock().unwrap();
        self.log.lock().unwrap().push(Event::Read(at));
        Ok(at.x + 10.0 * at.y)
    }
}

/// In-memory sink that fails on its `fail_on_append`-th append (1-based).
pub struct FlakySink {
    pub name: &'static str,
    pub records: Arc<Mutex<Vec<usize>>>,
    pub fail_on_append: Option<usize>,
    pub fail_open: bool,
    attempts: usize,
}

impl FlakySink {
    pub fn new(name: &'static str) -> (Self, Arc<Mutex<Vec<usize>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name,
                records: records.clone(),
                fail_on_append: None,
                fail_open: false,
                attempts: 0,
            },
            records,
        )
    }
}

impl ScanSink for FlakySink {
    fn name(&self) -> &str {
        self.name
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn open(&mut self, _metadata: &ScanMetadata) -> Result<()> {
        if self.fail_open {
            bail!("permission denied");
        }
        Ok(())
    }

    fn append(&mut self, point: &DataPoint) -> Result<()> {
        self.attempts += 1;
        if self.fail_on_append == Some(self.attempts) {
            bail!("no space left on device");
        }
        self.records.lock().unwrap().push(point.index);
        Ok(())
    }

    fn finish(&mut self, _metadata: &ScanMetadata) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Fast scan timing for tests.
pub fn quick_params() -> beamscan::scan::ScanParameters {
    beamscan::scan::ScanParameters {
        dwell_time: Duration::from_millis(5),
        first_move_settle: Duration::from_millis(20),
        channel: 0,
        acquisition_window: Duration::from_millis(1),
        filter: FilterKind::Mean,
    }
}

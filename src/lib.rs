//! Core library for the beamscan application.
//!
//! This library maps a beam profile by stepping an XY stage through a 2-D
//! pattern and taking one filtered analog reading per position. It contains
//! the capability traits, the pattern generators, the scan engine and the
//! streaming persistence layer. It is used by the `beamscan` binary and by
//! front-ends that bring their own stage and DAQ drivers.

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod hardware;
pub mod metadata;
pub mod rig;
pub mod scan;

pub use crate::core::{
    AcquisitionSource, Actuator, DataPoint, FilterKind, Origin, Position, ScanPlan, ScanStatus,
};
pub use crate::error::{ScanError, ScanResult};
pub use crate::rig::ScanRig;

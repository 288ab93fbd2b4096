//! Hardware implementations of the scan capabilities.
//!
//! Real stage and DAQ drivers implement [`crate::core::Actuator`] and
//! [`crate::core::AcquisitionSource`] outside this crate; the simulated pair
//! in [`mock`] backs `beamscan simulate` and the test suite.

pub mod mock;

pub use mock::{BeamProfile, MockDaq, MockStage, SharedPosition};

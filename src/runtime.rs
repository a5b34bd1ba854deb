//! Runtime glue: configuration, the slot clock, telemetry and the runner that wires
//! the beacon client into the poll loop.

pub mod clock;
pub mod config;
pub mod runner;
pub mod telemetry;

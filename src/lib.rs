// src/lib.rs
//! Ping GPS Logger Library
//!
//! Reads position and heading from a serial NMEA GPS, triggers an acoustic
//! transponder relay at a fixed interval and logs every ping with the latest
//! fix to a fixed-width `.ping` file.

pub mod config;
pub mod display;
pub mod error;
pub mod gps;
pub mod ports;
pub mod run;
pub mod transponder;

// Re-export main types for convenience
pub use error::{Result, StartRejection, SurveyError};
pub use gps::{Fix, GpsHealth, GpsReader, GpsSettings};
pub use run::{RunController, RunParameters, RunPhase, RunState, Snapshot, StopReason};
pub use transponder::{RelayDevice, TransponderDriver, TransponderSettings};

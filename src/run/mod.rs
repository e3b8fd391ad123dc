// src/run/mod.rs
//! Ping runs: parameters, log files and the controller

pub mod controller;
pub mod logger;
pub mod params;

pub use controller::{RunController, RunPhase, RunState, Snapshot, StopReason};
pub use logger::RunLogger;
pub use params::RunParameters;

// src/error.rs
//! Error types for the ping logger

use crate::gps::nmea::NmeaError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SurveyError>;

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("NMEA error: {0}")]
    Nmea(#[from] NmeaError),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Device error: {0}")]
    Device(String),
    #[error("Run not started: {0}")]
    StartRejected(StartRejection),
    #[error("Invalid run parameters: {0}")]
    InvalidParameters(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Error: {0}")]
    Other(String),
}

/// Why `RunController::start` refused to arm a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    AlreadyRunning,
    TransponderDisconnected,
    GpsNotRunning,
}

impl fmt::Display for StartRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartRejection::AlreadyRunning => write!(f, "a run is already active"),
            StartRejection::TransponderDisconnected => write!(f, "transponder is not connected"),
            StartRejection::GpsNotRunning => write!(f, "GPS is not running and bypass is off"),
        }
    }
}

impl From<StartRejection> for SurveyError {
    fn from(rejection: StartRejection) -> Self {
        SurveyError::StartRejected(rejection)
    }
}

// src/run/params.rs
//! Per-run configuration

use crate::error::{Result, SurveyError};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Immutable parameters of one ping run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParameters {
    pub output_dir: PathBuf,
    pub ship_name: String,
    /// Kept as text so the header reproduces what the operator typed
    pub transponder_depth: String,
    /// Seconds between pings, fractions allowed
    pub ping_interval: f64,
    /// Zero or negative means unbounded
    pub number_of_pings: i64,
    pub start_delay_seconds: u32,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            ship_name: String::new(),
            transponder_depth: "0".to_string(),
            ping_interval: 1.0,
            number_of_pings: 0,
            start_delay_seconds: 0,
        }
    }
}

impl RunParameters {
    /// Ping interval as a `Duration`, or an error when the value cannot be one
    pub fn interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.ping_interval).map_err(|e| {
            SurveyError::InvalidParameters(format!(
                "ping interval {} seconds is out of range: {}",
                self.ping_interval, e
            ))
        })
    }

    /// Number of pings after which the run ends on its own
    pub fn ping_limit(&self) -> Option<u64> {
        u64::try_from(self.number_of_pings).ok().filter(|&n| n > 0)
    }

    /// Value written in the `number_of_pings` header line
    pub fn header_ping_count(&self) -> i64 {
        self.ping_limit().map_or(-1, |n| n as i64)
    }

    pub fn validate(&self) -> Result<()> {
        let ship = self.ship_name.trim();
        if ship.is_empty() {
            return Err(SurveyError::InvalidParameters("ship name is empty".to_string()));
        }
        if ship.contains(['/', '\\']) {
            return Err(SurveyError::InvalidParameters(format!(
                "ship name {:?} contains a path separator",
                self.ship_name
            )));
        }
        if !self.ping_interval.is_finite() || self.ping_interval <= 0.0 {
            return Err(SurveyError::InvalidParameters(format!(
                "ping interval must be a positive number of seconds, got {}",
                self.ping_interval
            )));
        }
        self.interval()?;
        if self.transponder_depth.trim().is_empty() {
            return Err(SurveyError::InvalidParameters(
                "transponder depth is empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunParameters {
        RunParameters {
            ship_name: "Leim".to_string(),
            transponder_depth: "1".to_string(),
            ping_interval: 0.05,
            number_of_pings: 20,
            ..RunParameters::default()
        }
    }

    #[test]
    fn test_ping_limit() {
        assert_eq!(params().ping_limit(), Some(20));

        let mut unbounded = params();
        unbounded.number_of_pings = 0;
        assert_eq!(unbounded.ping_limit(), None);
        assert_eq!(unbounded.header_ping_count(), -1);

        unbounded.number_of_pings = -5;
        assert_eq!(unbounded.ping_limit(), None);
        assert_eq!(unbounded.header_ping_count(), -1);
    }

    #[test]
    fn test_interval() {
        assert_eq!(params().interval().unwrap(), Duration::from_millis(50));

        let mut huge = params();
        huge.ping_interval = 1e20;
        assert!(matches!(huge.interval(), Err(SurveyError::InvalidParameters(_))));
    }

    #[test]
    fn test_validate() {
        assert!(params().validate().is_ok());

        let mut bad = params();
        bad.ship_name = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.ship_name = "../Leim".to_string();
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.ping_interval = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.ping_interval = f64::NAN;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.ping_interval = 1e20;
        assert!(matches!(bad.validate(), Err(SurveyError::InvalidParameters(_))));

        let mut bad = params();
        bad.transponder_depth = String::new();
        assert!(bad.validate().is_err());
    }
}

// src/gps/data.rs
//! GPS fix snapshot and reader health

use serde::{Deserialize, Serialize};

/// Last known GPS sample, kept in the text form it is logged in.
///
/// Every field is empty until the matching sentence has been seen. RMC
/// sentences refresh date, time and position; HDT sentences refresh heading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub date: String,      // YYYY-MM-DD
    pub time: String,      // HH:MM:SS+00:00
    pub latitude: String,  // ddmm.mmmm N
    pub longitude: String, // dddmm.mmmm W
    pub heading: String,   // degrees true
}

impl Fix {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no sentence has populated any field
    pub fn is_empty(&self) -> bool {
        self.date.is_empty()
            && self.time.is_empty()
            && self.latitude.is_empty()
            && self.longitude.is_empty()
            && self.heading.is_empty()
    }

    /// Check if the fix carries a position
    pub fn has_position(&self) -> bool {
        !self.latitude.is_empty() && !self.longitude.is_empty()
    }

    /// Date and time of the fix with separators and UTC offset removed,
    /// e.g. `20240424083551`. `None` until an RMC sentence with both fields arrived.
    pub fn compact_timestamp(&self) -> Option<String> {
        if self.date.is_empty() || self.time.is_empty() {
            return None;
        }

        let date: String = self.date.chars().filter(|c| c.is_ascii_digit()).collect();
        let clock = self
            .time
            .split(|c| c == '+' || c == '-' || c == '.')
            .next()
            .unwrap_or_default();
        let clock: String = clock.chars().filter(|c| c.is_ascii_digit()).collect();

        if date.is_empty() || clock.is_empty() {
            None
        } else {
            Some(format!("{}{}", date, clock))
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Health of the GPS read loop as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsHealth {
    /// No read loop is active
    Disconnected,
    /// The last read produced a complete line
    Live,
    /// Reads are timing out or failing; the fix is going stale
    Stale { consecutive_failures: u32 },
}

impl GpsHealth {
    pub fn description(&self) -> String {
        match self {
            GpsHealth::Disconnected => "Disconnected".to_string(),
            GpsHealth::Live => "Live".to_string(),
            GpsHealth::Stale { consecutive_failures } => {
                format!("Stale ({} failed reads)", consecutive_failures)
            }
        }
    }
}

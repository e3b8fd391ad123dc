// src/gps/nmea.rs
//! NMEA sentence parsing

use super::data::Fix;
use chrono::{NaiveDate, NaiveTime, Timelike};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NmeaError {
    #[error("not an NMEA sentence")]
    NotNmea,
    #[error("sentence header too short")]
    Header,
    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },
    #[error("{kind} sentence has {found} fields, expected at least {needed}")]
    TooShort {
        kind: &'static str,
        found: usize,
        needed: usize,
    },
    #[error("invalid {field} field: {value:?}")]
    Field { field: &'static str, value: String },
}

/// Position and time from an RMC (Recommended Minimum) sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rmc {
    pub date: String,
    pub time: String,
    pub latitude: String,
    pub longitude: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sentence {
    Rmc(Rmc),
    /// True heading in degrees
    Hdt(String),
    /// Any other well-formed sentence, identified by its three letter type
    Other(String),
}

impl Sentence {
    /// Merge this sentence into a fix. Returns true if a field changed.
    pub fn apply(&self, fix: &mut Fix) -> bool {
        match self {
            Sentence::Rmc(rmc) => {
                let changed = fix.date != rmc.date
                    || fix.time != rmc.time
                    || fix.latitude != rmc.latitude
                    || fix.longitude != rmc.longitude;
                fix.date.clone_from(&rmc.date);
                fix.time.clone_from(&rmc.time);
                fix.latitude.clone_from(&rmc.latitude);
                fix.longitude.clone_from(&rmc.longitude);
                changed
            }
            Sentence::Hdt(heading) => {
                let changed = fix.heading != *heading;
                fix.heading.clone_from(heading);
                changed
            }
            Sentence::Other(_) => false,
        }
    }
}

/// Parse a single NMEA sentence
pub fn parse_sentence(line: &str) -> Result<Sentence, NmeaError> {
    let line = line.trim();
    let body = line
        .strip_prefix('$')
        .or_else(|| line.strip_prefix('!'))
        .ok_or(NmeaError::NotNmea)?;

    let body = match body.rsplit_once('*') {
        Some((data, checksum)) => {
            verify_checksum(data, checksum)?;
            data
        }
        None => body,
    };

    let parts: Vec<&str> = body.split(',').collect();
    let header = parts[0];
    // Proprietary sentences ($P...) carry no standard talker prefix
    if header.starts_with('P') {
        return Ok(Sentence::Other(header.to_string()));
    }
    if header.len() < 5 || !header.is_ascii() {
        return Err(NmeaError::Header);
    }

    match &header[2..] {
        "RMC" => parse_rmc(&parts).map(Sentence::Rmc),
        "HDT" => parse_hdt(&parts).map(Sentence::Hdt),
        kind => Ok(Sentence::Other(kind.to_string())),
    }
}

fn verify_checksum(data: &str, checksum: &str) -> Result<(), NmeaError> {
    let expected = u8::from_str_radix(checksum.trim(), 16).map_err(|_| NmeaError::Field {
        field: "checksum",
        value: checksum.to_string(),
    })?;
    let computed = data.bytes().fold(0u8, |acc, b| acc ^ b);

    if expected == computed {
        Ok(())
    } else {
        Err(NmeaError::Checksum { expected, computed })
    }
}

/// Parse RMC: time(1) status(2) lat(3,4) lon(5,6) speed(7) course(8) date(9)
fn parse_rmc(parts: &[&str]) -> Result<Rmc, NmeaError> {
    if parts.len() < 10 {
        return Err(NmeaError::TooShort {
            kind: "RMC",
            found: parts.len(),
            needed: 10,
        });
    }

    Ok(Rmc {
        date: format_date(parts[9])?,
        time: format_time(parts[1])?,
        latitude: format_coordinate(parts[3], parts[4]),
        longitude: format_coordinate(parts[5], parts[6]),
    })
}

/// Parse HDT: heading(1) 'T'(2)
fn parse_hdt(parts: &[&str]) -> Result<String, NmeaError> {
    if parts.len() < 2 {
        return Err(NmeaError::TooShort {
            kind: "HDT",
            found: parts.len(),
            needed: 2,
        });
    }

    let heading = parts[1].trim();
    if !heading.is_empty() && heading.parse::<f64>().is_err() {
        return Err(NmeaError::Field {
            field: "heading",
            value: heading.to_string(),
        });
    }
    Ok(heading.to_string())
}

/// `ddmmyy` -> `YYYY-MM-DD`
fn format_date(raw: &str) -> Result<String, NmeaError> {
    if raw.is_empty() {
        return Ok(String::new());
    }

    NaiveDate::parse_from_str(raw, "%d%m%y")
        .map(|date| date.format("%Y-%m-%d").to_string())
        .map_err(|_| NmeaError::Field {
            field: "date",
            value: raw.to_string(),
        })
}

/// `hhmmss[.ss]` -> `HH:MM:SS[.ffffff]+00:00`
fn format_time(raw: &str) -> Result<String, NmeaError> {
    if raw.is_empty() {
        return Ok(String::new());
    }

    let invalid = || NmeaError::Field {
        field: "time",
        value: raw.to_string(),
    };

    let (clock, fraction) = match raw.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (raw, None),
    };
    let mut time = NaiveTime::parse_from_str(clock, "%H%M%S").map_err(|_| invalid())?;

    if let Some(fraction) = fraction.filter(|f| !f.is_empty()) {
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // Right-pad to nanoseconds, keep at most 9 digits
        let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
        let nanos = digits.parse::<u32>().map_err(|_| invalid())?;
        time = time.with_nanosecond(nanos).ok_or_else(invalid)?;
    }

    let clock = if time.nanosecond() == 0 {
        time.format("%H:%M:%S").to_string()
    } else {
        time.format("%H:%M:%S%.6f").to_string()
    };
    Ok(format!("{}+00:00", clock))
}

fn format_coordinate(value: &str, hemisphere: &str) -> String {
    match (value.is_empty(), hemisphere.is_empty()) {
        (true, _) => String::new(),
        (false, true) => value.to_string(),
        (false, false) => format!("{} {}", value, hemisphere),
    }
}

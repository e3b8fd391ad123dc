// src/run/logger.rs
//! One `.ping` log file per run

use super::params::RunParameters;
use crate::{error::Result, gps::Fix};
use chrono::{DateTime, Local, TimeZone};
use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub const FIELD_NAMES: [&str; 6] = ["timestamp", "gps_date", "gps_time", "gps_lat", "gps_lon", "heading"];
pub const FIELD_WIDTHS: [usize; 6] = [21, 11, 15, 12, 13, 8];
pub const EXTENSION: &str = "ping";

/// Right-justify each field to its column width and join with commas
pub fn format_row(fields: &[&str]) -> String {
    fields
        .iter()
        .zip(FIELD_WIDTHS)
        .map(|(field, width)| format!("{:>width$}", field, width = width))
        .collect::<Vec<_>>()
        .join(",")
}

/// Local time with UTC offset, e.g. `20240424T083551-0300`
pub fn format_timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%Y%m%dT%H%M%S%z").to_string()
}

#[derive(Debug, Clone)]
pub struct RunLogger {
    path: PathBuf,
    run_id: String,
}

impl RunLogger {
    /// Create the log file for a new run and write its header.
    ///
    /// The run id comes from the GPS date and time when the fix has them,
    /// otherwise from the local clock. An existing file is never reused.
    pub fn init_run(params: &RunParameters, fix: &Fix) -> Result<Self> {
        let base_id = fix
            .compact_timestamp()
            .unwrap_or_else(|| Local::now().format("%Y%m%dT%H%M%S").to_string());

        fs::create_dir_all(&params.output_dir)?;

        let (file, path, run_id) = create_unique(&params.output_dir, &base_id, &params.ship_name)?;
        let logger = Self { path, run_id };
        logger.write_header(file, params)?;

        info!("Ping log created at {}", logger.path.display());
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append one row stamped with the current local time
    pub fn append_row(&self, fix: &Fix) -> Result<()> {
        self.append_row_at(&Local::now(), fix)
    }

    /// Append one row. The file is opened and closed for every row so a
    /// crash never loses a logged ping.
    pub fn append_row_at<Tz: TimeZone>(&self, time: &DateTime<Tz>, fix: &Fix) -> Result<()>
    where
        Tz::Offset: std::fmt::Display,
    {
        let timestamp = format_timestamp(time);
        let line = format_row(&[
            &timestamp,
            &fix.date,
            &fix.time,
            &fix.latitude,
            &fix.longitude,
            &fix.heading,
        ]);

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;

        debug!("Data written: {}", line);
        Ok(())
    }

    fn write_header(&self, mut file: File, params: &RunParameters) -> Result<()> {
        let header = format!(
            "# datetime: {}\n\
             # ship_name: {}\n\
             # ping_interval_second: {:?}\n\
             # number_of_pings: {}\n\
             # start_delay_second: {}\n\
             # transponder_depth_meter: {}\n\
             {}\n",
            self.run_id,
            params.ship_name,
            params.ping_interval,
            params.header_ping_count(),
            params.start_delay_seconds,
            params.transponder_depth,
            format_row(&FIELD_NAMES),
        );
        file.write_all(header.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Create `<id>_<ship>.ping`, suffixing the id with `-1`, `-2`, ... while taken
fn create_unique(dir: &Path, base_id: &str, ship_name: &str) -> Result<(File, PathBuf, String)> {
    let mut attempt = 0u32;
    loop {
        let run_id = if attempt == 0 {
            base_id.to_string()
        } else {
            format!("{}-{}", base_id, attempt)
        };
        let path = dir.join(format!("{}_{}.{}", run_id, ship_name, EXTENSION));

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path, run_id)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} exists, trying next run id", path.display());
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

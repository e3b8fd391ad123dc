// src/config.rs
//! Configuration management

use crate::{
    error::{Result, SurveyError},
    gps::GpsSettings,
    run::RunParameters,
    transponder::{TransponderLink, TransponderSettings},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gps: GpsSettings,
    pub transponder: TransponderSettings,
    /// Defaults for the next run
    pub run: RunParameters,
    /// Allow runs without a live GPS
    pub bypass_gps: bool,
}

impl AppConfig {
    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| SurveyError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SurveyError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SurveyError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)?;

        std::fs::write(path, contents)
            .map_err(|e| SurveyError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// `$HOME/.config/ping-gps-logger/config.json`
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| SurveyError::Config("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("ping-gps-logger")
            .join("config.json"))
    }

    /// Update GPS serial settings
    pub fn update_gps_serial(&mut self, port: String, baud_rate: u32) {
        self.gps.port = Some(port);
        self.gps.baud_rate = baud_rate;
    }

    /// Switch the transponder to a serial relay board
    pub fn update_transponder_serial(&mut self, port: String, baud_rate: u32) {
        self.transponder.link = TransponderLink::Serial { port, baud_rate };
    }

    /// Switch the transponder to a USB HID relay board
    pub fn update_transponder_hid(&mut self, vendor_id: u16, product_id: u16) {
        self.transponder.link = TransponderLink::Hid {
            vendor_id,
            product_id,
        };
    }
}

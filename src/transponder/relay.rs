// src/transponder/relay.rs
//! Relay board transports. They only know how to set a relay level;
//! pulse timing belongs to the driver.

use crate::error::{Result, SurveyError};
use std::{io::Write, time::Duration};
use tracing::{debug, info};

/// Level-set access to a relay board
pub trait RelayDevice: Send {
    /// Acquire the device
    fn open(&mut self) -> Result<()>;

    /// Switch one relay on or off
    fn set_relay(&mut self, relay: u8, on: bool) -> Result<()>;

    /// Bit mask of relays currently on
    fn read_status(&mut self) -> Result<u8>;

    /// Release the device handle
    fn close(&mut self) -> Result<()>;

    /// Name used in log messages
    fn describe(&self) -> String;
}

/// Serial relay board (LCUS style): every command is `A0 <relay> <state> <sum>`.
pub struct SerialRelay {
    port: String,
    baud_rate: u32,
    timeout: Duration,
    serial: Option<Box<dyn tokio_serial::SerialPort>>,
    status: u8,
}

impl SerialRelay {
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            timeout: Duration::from_millis(500),
            serial: None,
            status: 0,
        }
    }

    /// Command frame for one relay level change
    pub fn command(relay: u8, on: bool) -> [u8; 4] {
        let state = u8::from(on);
        let checksum = 0xA0u8.wrapping_add(relay).wrapping_add(state);
        [0xA0, relay, state, checksum]
    }
}

impl RelayDevice for SerialRelay {
    fn open(&mut self) -> Result<()> {
        let serial = tokio_serial::new(&self.port, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| {
                SurveyError::Connection(format!("Failed to open relay port {}: {}", self.port, e))
            })?;
        self.serial = Some(serial);
        info!("Serial relay opened on {}", self.port);
        Ok(())
    }

    fn set_relay(&mut self, relay: u8, on: bool) -> Result<()> {
        let serial = self
            .serial
            .as_mut()
            .ok_or_else(|| SurveyError::Device(format!("{} is not open", self.port)))?;

        let frame = Self::command(relay, on);
        serial.write_all(&frame)?;
        serial.flush()?;
        debug!("Serial relay write: {:02X?}", frame);

        // Relays are numbered from 1 on these boards
        let mask = 1u8 << relay.saturating_sub(1).min(7);
        if on {
            self.status |= mask;
        } else {
            self.status &= !mask;
        }
        Ok(())
    }

    /// The board has no status query; this reports the last commanded levels
    fn read_status(&mut self) -> Result<u8> {
        if self.serial.is_none() {
            return Err(SurveyError::Device(format!("{} is not open", self.port)));
        }
        Ok(self.status)
    }

    fn close(&mut self) -> Result<()> {
        if self.serial.take().is_some() {
            info!("Serial relay on {} closed", self.port);
        }
        self.status = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial relay {}", self.port)
    }
}

#[cfg(feature = "hid")]
pub use hid::{list_hid_devices, HidRelay};

#[cfg(feature = "hid")]
mod hid {
    use super::RelayDevice;
    use crate::error::{Result, SurveyError};
    use hidapi::{HidApi, HidDevice};
    use tracing::info;

    const REPORT_LEN: usize = 9;
    const CMD_ON: u8 = 0xFF;
    const CMD_OFF: u8 = 0xFD;

    /// USB HID relay board (V-USB "USBRelay" family)
    pub struct HidRelay {
        vendor_id: u16,
        product_id: u16,
        device: Option<HidDevice>,
    }

    impl HidRelay {
        pub fn new(vendor_id: u16, product_id: u16) -> Self {
            Self {
                vendor_id,
                product_id,
                device: None,
            }
        }

        fn device(&self) -> Result<&HidDevice> {
            self.device
                .as_ref()
                .ok_or_else(|| SurveyError::Device("HID relay is not open".to_string()))
        }
    }

    impl RelayDevice for HidRelay {
        fn open(&mut self) -> Result<()> {
            let api = HidApi::new().map_err(|e| SurveyError::Device(e.to_string()))?;
            let device = api.open(self.vendor_id, self.product_id).map_err(|e| {
                SurveyError::Connection(format!(
                    "No HID relay {:04x}:{:04x}: {}",
                    self.vendor_id, self.product_id, e
                ))
            })?;
            self.device = Some(device);
            info!("HID relay {:04x}:{:04x} opened", self.vendor_id, self.product_id);
            Ok(())
        }

        fn set_relay(&mut self, relay: u8, on: bool) -> Result<()> {
            let mut report = [0u8; REPORT_LEN];
            report[1] = if on { CMD_ON } else { CMD_OFF };
            report[2] = relay;
            self.device()?
                .send_feature_report(&report)
                .map_err(|e| SurveyError::Device(format!("HID write failed: {}", e)))?;

            // Read back so a silently dropped report is caught
            let mask = 1u8 << relay.saturating_sub(1).min(7);
            let status = self.read_status()?;
            if (status & mask != 0) != on {
                return Err(SurveyError::Device(format!(
                    "relay {} did not switch {}",
                    relay,
                    if on { "on" } else { "off" }
                )));
            }
            Ok(())
        }

        fn read_status(&mut self) -> Result<u8> {
            let mut report = [0u8; REPORT_LEN];
            let len = self
                .device()?
                .get_feature_report(&mut report)
                .map_err(|e| SurveyError::Device(format!("HID read failed: {}", e)))?;
            if len < REPORT_LEN {
                return Err(SurveyError::Device(format!("short status report ({} bytes)", len)));
            }
            Ok(report[REPORT_LEN - 1])
        }

        fn close(&mut self) -> Result<()> {
            if self.device.take().is_some() {
                info!("HID relay closed");
            }
            Ok(())
        }

        fn describe(&self) -> String {
            format!("HID relay {:04x}:{:04x}", self.vendor_id, self.product_id)
        }
    }

    /// `(vendor_id, product_id, product name)` of every visible HID device
    pub fn list_hid_devices() -> Result<Vec<(u16, u16, String)>> {
        let api = HidApi::new().map_err(|e| SurveyError::Device(e.to_string()))?;
        Ok(api
            .device_list()
            .map(|d| {
                (
                    d.vendor_id(),
                    d.product_id(),
                    d.product_string().unwrap_or("unknown").to_string(),
                )
            })
            .collect())
    }
}

// src/transponder/driver.rs
//! Transponder trigger: one bounded relay pulse per ping

use super::relay::{RelayDevice, SerialRelay};
use crate::error::{Result, SurveyError};
use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, error, info, warn};

/// How the relay board is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransponderLink {
    Serial { port: String, baud_rate: u32 },
    Hid { vendor_id: u16, product_id: u16 },
}

impl Default for TransponderLink {
    fn default() -> Self {
        TransponderLink::Hid {
            vendor_id: 0x16c0,
            product_id: 0x05df,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransponderSettings {
    pub link: TransponderLink,
    pub relay: u8,
    /// Time the relay is held closed for one ping
    pub dwell_ms: u64,
}

impl Default for TransponderSettings {
    fn default() -> Self {
        Self {
            link: TransponderLink::default(),
            relay: 1,
            dwell_ms: 10,
        }
    }
}

impl TransponderSettings {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Build the transport described by `link`
    pub fn build_device(&self) -> Result<Box<dyn RelayDevice>> {
        match &self.link {
            TransponderLink::Serial { port, baud_rate } => {
                Ok(Box::new(SerialRelay::new(port, *baud_rate)))
            }
            #[cfg(feature = "hid")]
            TransponderLink::Hid {
                vendor_id,
                product_id,
            } => Ok(Box::new(super::relay::HidRelay::new(*vendor_id, *product_id))),
            #[cfg(not(feature = "hid"))]
            TransponderLink::Hid { .. } => Err(SurveyError::Device(
                "HID relay support requires the 'hid' feature".to_string(),
            )),
        }
    }
}

/// Drives the transponder trigger relay
pub struct TransponderDriver {
    settings: TransponderSettings,
    device: Mutex<Option<Box<dyn RelayDevice>>>,
    connected: AtomicBool,
}

impl TransponderDriver {
    pub fn new(settings: TransponderSettings) -> Self {
        Self {
            settings,
            device: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &TransponderSettings {
        &self.settings
    }

    /// Acquire the relay board described by the settings
    pub async fn connect(&self) -> Result<()> {
        let device = self.settings.build_device()?;
        self.connect_device(device).await
    }

    /// Acquire an explicit relay transport, replacing any previous one
    pub async fn connect_device(&self, mut device: Box<dyn RelayDevice>) -> Result<()> {
        let mut slot = self.device.lock().await;

        if let Some(mut old) = slot.take() {
            if let Err(e) = old.close() {
                debug!("Closing previous {} failed: {}", old.describe(), e);
            }
        }

        if let Err(e) = device.open() {
            self.connected.store(false, Ordering::Relaxed);
            warn!("Could not connect transponder: {}", e);
            return Err(e);
        }

        info!("Transponder connected via {}", device.describe());
        *slot = Some(device);
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Release the trigger and close the device. Tolerates a device that is already gone.
    pub async fn disconnect(&self) {
        let mut slot = self.device.lock().await;

        if let Some(mut device) = slot.take() {
            let relay = self.settings.relay;
            let released = tokio::task::spawn_blocking(move || {
                if let Err(e) = device.set_relay(relay, false) {
                    debug!("Releasing relay on disconnect failed: {}", e);
                }
                if let Err(e) = device.close() {
                    debug!("Closing {} failed: {}", device.describe(), e);
                }
            })
            .await;
            if let Err(e) = released {
                warn!("Transponder release task failed: {}", e);
            }
            info!("Transponder disconnected");
        }

        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Assert the trigger, hold it for the dwell time, release it.
    ///
    /// Returns true only when both level changes reached the device. Any
    /// transport error marks the transponder disconnected.
    pub async fn ping(&self) -> bool {
        let mut slot = self.device.lock().await;

        if slot.is_none() || !self.is_connected() {
            warn!("Could not ping, transponder not connected");
            return false;
        }

        let relay = self.settings.relay;
        if let Err(e) = set_level(&mut slot, relay, true).await {
            return self.mark_lost("assert", e);
        }

        sleep(self.settings.dwell()).await;

        if let Err(e) = set_level(&mut slot, relay, false).await {
            return self.mark_lost("release", e);
        }

        debug!("Ping on relay {}", relay);
        true
    }

    /// Raw relay status bits, for diagnostics
    pub async fn relay_status(&self) -> Result<u8> {
        let mut slot = self.device.lock().await;
        let device = slot
            .as_mut()
            .ok_or_else(|| SurveyError::Device("transponder not connected".to_string()))?;
        device.read_status()
    }

    fn mark_lost(&self, stage: &str, e: SurveyError) -> bool {
        error!("Transponder {} failed, device assumed lost: {}", stage, e);
        self.connected.store(false, Ordering::Relaxed);
        false
    }
}

/// Run one relay level change on the blocking pool. The device is moved out
/// of the slot for the call and put back afterwards.
async fn set_level(slot: &mut Option<Box<dyn RelayDevice>>, relay: u8, on: bool) -> Result<()> {
    let mut device = slot
        .take()
        .ok_or_else(|| SurveyError::Device("transponder not connected".to_string()))?;

    let (device, result) = tokio::task::spawn_blocking(move || {
        let result = device.set_relay(relay, on);
        (device, result)
    })
    .await
    .map_err(|e| SurveyError::Device(format!("relay task failed: {}", e)))?;

    *slot = Some(device);
    result
}

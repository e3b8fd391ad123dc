// src/ports.rs
//! Serial and HID port enumeration

use crate::error::{Result, SurveyError};
use tokio_serial::SerialPortType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| SurveyError::Other(format!("Failed to list serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            description: describe(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            format!("{} ({:04x}:{:04x})", product, usb.vid, usb.pid)
        }
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::Unknown => "Unknown".to_string(),
    }
}

/// List HID devices visible to the relay driver
#[cfg(feature = "hid")]
pub fn list_hid_devices() -> Result<Vec<PortInfo>> {
    Ok(crate::transponder::relay::list_hid_devices()?
        .into_iter()
        .map(|(vendor_id, product_id, product)| PortInfo {
            name: format!("{:04x}:{:04x}", vendor_id, product_id),
            description: product,
        })
        .collect())
}

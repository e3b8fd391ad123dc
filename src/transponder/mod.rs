// src/transponder/mod.rs
//! Acoustic transponder trigger

pub mod driver;
pub mod relay;

pub use driver::{TransponderDriver, TransponderLink, TransponderSettings};
pub use relay::{RelayDevice, SerialRelay};

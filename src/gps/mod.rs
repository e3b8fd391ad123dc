// src/gps/mod.rs
//! GPS fix tracking and NMEA parsing

pub mod data;
pub mod nmea;
pub mod reader;

pub use data::{Fix, GpsHealth};
pub use reader::{GpsReader, GpsSettings};

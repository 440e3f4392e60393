//! Hardware-independent core library for the battery button
//!
//! This crate contains all platform-agnostic logic of the battery-powered
//! push-button node: device identity, bounded WiFi acquisition, the MQTT
//! session wrapper, supply-voltage reporting and the wake-report-sleep state
//! machine, plus the optional firmware-update mode (picoserve HTTP router and mDNS
//! responder).
//!
//! Hardware is reached through small traits (`WifiLink`, `PubSubSession`,
//! `SupplyVoltage`, `Clock`, `UpdateService`, `FirmwareSink`) and the
//! `embedded-hal` digital/delay traits, so the same code runs on the ESP32-S3
//! firmware, in the desktop simulator and in host tests.

#![cfg_attr(not(test), no_std)]

pub mod clock;
pub mod config;
pub mod cycle;
pub mod identity;
pub mod mdns;
pub mod messaging;
pub mod network;
pub mod power;
pub mod setup;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

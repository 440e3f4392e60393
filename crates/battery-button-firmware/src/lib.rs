//! ESP32-S3 adapters for the battery button
//!
//! Implements the core traits on esp-hal, esp-radio and embassy-net: the
//! WiFi link, the MQTT session, the supply voltage ADC and, with the
//! `update-mode` feature, the HTTP update endpoint writing into the OTA
//! slot. Cannot compile for desktop targets.

#![no_std]

pub mod mqtt_session;
#[cfg(feature = "update-mode")]
pub mod ota;
pub mod platform;
pub mod secrets;
pub mod supply;
#[cfg(feature = "update-mode")]
pub mod update_server;
pub mod wifi_link;

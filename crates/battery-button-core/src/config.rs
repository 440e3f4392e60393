//! Static node configuration
//!
//! Everything here is compiled in (firmware) or loaded once from a scenario
//! file (simulator). Nothing is persisted or changed at runtime.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Default MQTT broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;
/// Default hostname advertised over mDNS while in update mode.
pub const DEFAULT_UPDATE_HOSTNAME: &str = "bb-webupdate";
/// Default path of the firmware update endpoint.
pub const DEFAULT_UPDATE_PATH: &str = "/firmware";
/// Default user name for the update endpoint.
pub const DEFAULT_UPDATE_USERNAME: &str = "admin";
/// Port the update endpoint listens on.
pub const DEFAULT_UPDATE_PORT: u16 = 80;

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct Config<'a> {
    pub internet: InternetConfig<'a>,
    pub broker: BrokerConfig<'a>,
    #[serde(default)]
    pub update: UpdateConfig<'a>,
    /// Slows the WiFi poll down and logs phase timings.
    #[serde(default)]
    pub debug: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// MQTT broker address and credentials.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig<'a> {
    /// IPv4 literal or DNS name
    pub host: &'a str,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub username: &'a str,
    #[serde(default)]
    pub password: &'a str,
}

impl Default for BrokerConfig<'_> {
    fn default() -> Self {
        Self {
            host: "",
            port: DEFAULT_BROKER_PORT,
            username: "",
            password: "",
        }
    }
}

/// Firmware update endpoint, only used when the update mode is built in.
///
/// An empty password disables the endpoint: every request is answered with
/// `401 Unauthorized`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct UpdateConfig<'a> {
    pub hostname: &'a str,
    pub path: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a str,
}

impl Default for UpdateConfig<'_> {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_UPDATE_HOSTNAME,
            path: DEFAULT_UPDATE_PATH,
            port: DEFAULT_UPDATE_PORT,
            username: DEFAULT_UPDATE_USERNAME,
            password: "",
        }
    }
}

const fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("WiFi SSID is empty")]
    MissingSsid,
    #[error("MQTT broker host is empty")]
    MissingBrokerHost,
    #[error("MQTT broker port must be non-zero")]
    InvalidBrokerPort,
    #[error("update path must start with '/'")]
    InvalidUpdatePath,
}

impl Config<'_> {
    /// Check for values the wake cycle cannot work with.
    ///
    /// A failed check is logged by the caller; the node still runs its cycle
    /// and sleeps, it just cannot deliver anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.internet.ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        if self.broker.host.is_empty() {
            return Err(ConfigError::MissingBrokerHost);
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidBrokerPort);
        }
        if !self.update.path.starts_with('/') {
            return Err(ConfigError::InvalidUpdatePath);
        }
        Ok(())
    }
}

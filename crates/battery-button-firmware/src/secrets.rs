//! Node configuration baked in at build time (see `build.rs`).

use battery_button_core::config::{
    BrokerConfig, Config, DEFAULT_BROKER_PORT, DEFAULT_UPDATE_HOSTNAME, DEFAULT_UPDATE_PATH,
    DEFAULT_UPDATE_PORT, DEFAULT_UPDATE_USERNAME, InternetConfig, UpdateConfig,
};

pub fn config() -> Config<'static> {
    Config {
        internet: InternetConfig {
            ssid: option_env!("WIFI_SSID").unwrap_or(""),
            password: option_env!("WIFI_PASSWORD").unwrap_or(""),
        },
        broker: BrokerConfig {
            host: option_env!("MQTT_HOST").unwrap_or(""),
            port: option_env!("MQTT_PORT")
                .and_then(|port| port.parse().ok())
                .unwrap_or(DEFAULT_BROKER_PORT),
            username: option_env!("MQTT_USERNAME").unwrap_or(""),
            password: option_env!("MQTT_PASSWORD").unwrap_or(""),
        },
        update: UpdateConfig {
            hostname: option_env!("UPDATE_HOSTNAME").unwrap_or(DEFAULT_UPDATE_HOSTNAME),
            path: option_env!("UPDATE_PATH").unwrap_or(DEFAULT_UPDATE_PATH),
            port: DEFAULT_UPDATE_PORT,
            username: option_env!("UPDATE_USERNAME").unwrap_or(DEFAULT_UPDATE_USERNAME),
            password: option_env!("UPDATE_PASSWORD").unwrap_or(""),
        },
        debug: cfg!(feature = "debug-log"),
    }
}

//! Loads node secrets from `.env` (workspace root or this crate) and exposes
//! them to the firmware as compile-time environment variables.

const KEYS: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "MQTT_HOST",
    "MQTT_PORT",
    "MQTT_USERNAME",
    "MQTT_PASSWORD",
    "UPDATE_HOSTNAME",
    "UPDATE_PATH",
    "UPDATE_USERNAME",
    "UPDATE_PASSWORD",
];

fn main() {
    match dotenvy::dotenv() {
        Ok(path) => println!("cargo:rerun-if-changed={}", path.display()),
        Err(e) if e.not_found() => {
            println!("cargo:warning=no .env file found, using the build environment only")
        }
        Err(e) => println!("cargo:warning=failed to read .env: {e}"),
    }

    for key in KEYS {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}

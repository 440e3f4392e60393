//! Station-mode WiFi through esp-radio, with the embassy-net stack providing
//! the address.

use battery_button_core::config::InternetConfig;
use battery_button_core::network::WifiLink;
use embassy_net::Stack;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiError};
use log::debug;
use thiserror_no_std::Error;

#[derive(Error, Debug)]
pub enum WifiLinkError {
    #[error("WiFi configuration rejected: {0:?}")]
    Configure(WifiError),
    #[error("WiFi start failed: {0:?}")]
    Start(WifiError),
    #[error("WiFi connect failed: {0:?}")]
    Connect(WifiError),
}

pub struct EspWifiLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl EspWifiLink {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }
}

impl WifiLink for EspWifiLink {
    type Error = WifiLinkError;

    fn begin(&mut self, credentials: &InternetConfig<'_>) -> Result<(), Self::Error> {
        let client = ClientConfig::default()
            .with_ssid(credentials.ssid.into())
            .with_password(credentials.password.into());

        self.controller
            .set_config(&ModeConfig::Client(client))
            .map_err(WifiLinkError::Configure)?;
        self.controller.start().map_err(WifiLinkError::Start)?;
        debug!("WiFi started in station mode");
        self.controller.connect().map_err(WifiLinkError::Connect)
    }

    /// Associated and holding a DHCP lease.
    fn is_connected(&mut self) -> bool {
        self.controller.is_connected().unwrap_or(false) && self.stack.is_config_up()
    }
}

//! Simulated peripherals for one wake cycle.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use battery_button_core::clock::Clock;
use battery_button_core::config::InternetConfig;
use battery_button_core::messaging::PubSubSession;
use battery_button_core::network::WifiLink;
use battery_button_core::power::SupplyVoltage;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use log::{debug, info};

/// Wall-clock milliseconds since the simulated boot.
pub struct HostClock {
    boot: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

/// Yields to the runtime so the update endpoint is served while the cycle
/// waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

impl DelayNs for TokioDelay {
    async fn delay_ns(&mut self, ns: u32) {
        tokio::time::sleep(Duration::from_nanos(u64::from(ns))).await;
    }
}

/// Access point that associates after a fixed number of status polls.
pub struct SimWifi {
    polls_to_connect: Option<u8>,
    polls: u8,
}

impl SimWifi {
    /// `None` never connects.
    pub fn new(polls_to_connect: Option<u8>) -> Self {
        Self {
            polls_to_connect,
            polls: 0,
        }
    }

    pub fn connected(&self) -> bool {
        self.polls_to_connect.is_some_and(|after| self.polls > after)
    }
}

impl WifiLink for SimWifi {
    type Error = Infallible;

    fn begin(&mut self, credentials: &InternetConfig<'_>) -> Result<(), Self::Error> {
        debug!("Simulated AP '{}' asked to associate", credentials.ssid);
        self.polls = 0;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.polls = self.polls.saturating_add(1);
        self.connected()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    Unreachable,
    Refused,
    NotConnected,
}

/// Broker that refuses a configurable number of connects, then accepts.
pub struct SimBroker {
    client_id: String,
    reachable: bool,
    refusals_left: u8,
    connected: bool,
    published: Vec<(String, String)>,
}

impl SimBroker {
    pub fn new(client_id: &str, reachable: bool, refusals: u8) -> Self {
        Self {
            client_id: client_id.to_owned(),
            reachable,
            refusals_left: refusals,
            connected: false,
            published: Vec::new(),
        }
    }

    /// Every message the broker received, in order, as `(topic, payload)`.
    pub fn published(&self) -> &[(String, String)] {
        &self.published
    }
}

impl PubSubSession for SimBroker {
    type Error = BrokerError;

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if !self.reachable {
            return Err(BrokerError::Unreachable);
        }
        if self.refusals_left > 0 {
            self.refusals_left -= 1;
            return Err(BrokerError::Refused);
        }
        info!("Broker: session opened for {}", self.client_id);
        self.connected = true;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        let payload = String::from_utf8_lossy(payload).into_owned();
        info!("Broker: {} = {:?}", topic, payload);
        self.published.push((topic.to_owned(), payload));
        Ok(())
    }

    async fn poll(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Supply rail at a constant voltage.
pub struct SimSupply(pub u16);

impl SupplyVoltage for SimSupply {
    fn read_millivolts(&mut self) -> u16 {
        self.0
    }
}

/// Setup button held in one position for the whole run.
pub struct SimButton {
    pressed: bool,
}

impl SimButton {
    pub fn new(pressed: bool) -> Self {
        Self { pressed }
    }
}

impl ErrorType for SimButton {
    type Error = Infallible;
}

impl InputPin for SimButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pressed)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pressed)
    }
}

/// Status LED that logs its level changes.
#[derive(Default)]
pub struct LogLed;

impl ErrorType for LogLed {
    type Error = Infallible;
}

impl OutputPin for LogLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        debug!("LED off");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        debug!("LED on");
        Ok(())
    }
}

//! Desktop simulator for the battery button wake cycle.
//!
//! Runs one wake, from WiFi join to the sleep request, against simulated
//! peripherals described by a JSON scenario:
//!
//! ```text
//! battery-button-simulator [scenario.json]
//! ```
//!
//! Without an argument the crate's `scenarios/default.json` is used.
//! `update_mode` and `status_led` select the same variants as the firmware's
//! cargo features. With update mode on and `"setup_pressed": true` the node
//! stays awake serving the update endpoint on `update_listen` until an image
//! is uploaded or `max_passes` is reached.
//!
//! Set `RUST_LOG=debug` for per-pass detail.

mod devices;
mod http;

use std::error::Error;
use std::fs;

use battery_button_core::clock::{Clock, PhaseTimer};
use battery_button_core::config::Config;
use battery_button_core::cycle::{PassOutcome, SleepRequest, WakeCycle, WakeState};
use battery_button_core::identity::DeviceIdentity;
use battery_button_core::messaging::MessagingClient;
use battery_button_core::network::{PollSchedule, acquire_network};
use battery_button_core::power::PowerReporter;
use battery_button_core::setup::{NoSetupMode, SetupMode, StatusLed, UpdateMode};
use battery_button_core::update::{self, UpdateEndpoint};
use log::{info, warn};
use serde::Deserialize;

use devices::{HostClock, LogLed, SimBroker, SimButton, SimSupply, SimWifi, TokioDelay};
use http::{ImageBuffer, serve_updates};

const DEFAULT_SCENARIO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios/default.json");

#[derive(Deserialize, Debug)]
struct Scenario<'a> {
    #[serde(borrow)]
    config: Config<'a>,
    mac: [u8; 6],
    supply_millivolts: u16,
    /// Status polls before the AP accepts; absent means it never does.
    wifi_polls_to_connect: Option<u8>,
    #[serde(default = "default_true")]
    broker_reachable: bool,
    #[serde(default)]
    broker_refusals: u8,
    /// Adds the setup decision and the update endpoint.
    #[serde(default)]
    update_mode: bool,
    /// Blinks the status LED while waiting in update mode.
    #[serde(default)]
    status_led: bool,
    #[serde(default)]
    setup_pressed: bool,
    #[serde(default = "default_update_listen")]
    update_listen: &'a str,
    #[serde(default = "default_max_passes")]
    max_passes: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_update_listen() -> &'static str {
    "127.0.0.1:8080"
}

const fn default_max_passes() -> u32 {
    3_000
}

/// How a simulated wake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Slept(SleepRequest),
    /// An image was uploaded; the node would restart into it.
    Updated(usize),
    /// `max_passes` ran out in this state.
    Stopped(WakeState),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SCENARIO.to_owned());
    let text = fs::read_to_string(&path).map_err(|e| format!("reading {}: {}", path, e))?;
    // The update router needs its path for the rest of the run
    let text: &'static str = text.leak();
    let scenario: Scenario<'static> = serde_json::from_str(text)?;
    info!("Starting battery button simulator with {}", path);

    if let Err(e) = scenario.config.validate() {
        warn!("Configuration incomplete: {}", e);
    }

    match run(&scenario).await {
        Ending::Slept(request) => info!("Node sleeps: {:?}", request),
        Ending::Updated(bytes) => {
            info!("Firmware image of {} bytes received, node would restart", bytes)
        }
        Ending::Stopped(state) => warn!(
            "Stopped after {} passes in state {:?}",
            scenario.max_passes, state
        ),
    }
    info!("Simulator exiting");
    Ok(())
}

async fn run(scenario: &Scenario<'static>) -> Ending {
    let config = &scenario.config;
    let identity = DeviceIdentity::from_mac(&scenario.mac);
    info!("Battery button {}", identity);

    let clock = HostClock::new();
    let mut timer = PhaseTimer::new(config.debug, clock.now_ms());
    let mut wifi = SimWifi::new(scenario.wifi_polls_to_connect);
    let schedule = PollSchedule::new(config.debug);
    if let Err(e) = acquire_network(&mut wifi, &config.internet, schedule, &mut TokioDelay).await {
        warn!("{}", e);
    }
    timer.lap("WiFi", clock.now_ms());

    // Without a network the broker is as good as gone
    let broker = SimBroker::new(
        identity.as_str(),
        scenario.broker_reachable && wifi.connected(),
        scenario.broker_refusals,
    );
    let node = Node {
        scenario,
        identity: &identity,
        broker,
        clock,
        timer,
    };

    if !scenario.update_mode {
        return node.run(NoSetupMode).await;
    }

    let endpoint = UpdateEndpoint::new(config.update, ImageBuffer::default());
    let app = update::router(config.update.path);
    let button = SimButton::new(scenario.setup_pressed);
    let cycle = async {
        if scenario.status_led {
            node.run(UpdateMode::with_led(button, StatusLed::new(LogLed), &endpoint))
                .await
        } else {
            node.run(UpdateMode::without_led(button, &endpoint)).await
        }
    };

    tokio::select! {
        ending = cycle => ending,
        bytes = serve_updates(scenario.update_listen, &app, &endpoint) => Ending::Updated(bytes),
    }
}

/// Everything the wake cycle needs apart from its setup mode.
struct Node<'s> {
    scenario: &'s Scenario<'static>,
    identity: &'s DeviceIdentity,
    broker: SimBroker,
    clock: HostClock,
    timer: PhaseTimer,
}

impl Node<'_> {
    async fn run<M: SetupMode>(self, setup: M) -> Ending {
        let mut cycle = WakeCycle::new(
            self.identity,
            MessagingClient::new(self.broker, self.identity),
            PowerReporter::new(SimSupply(self.scenario.supply_millivolts)),
            setup,
            TokioDelay,
            self.clock,
            self.timer,
        );

        let mut passes: u32 = 0;
        let ending = loop {
            if let PassOutcome::Sleep(request) = cycle.pass().await {
                break Ending::Slept(request);
            }
            passes += 1;
            if passes >= self.scenario.max_passes {
                break Ending::Stopped(cycle.state());
            }
        };

        for (topic, payload) in cycle.messaging().session().published() {
            info!("Delivered {} = {}", topic, payload);
        }
        ending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "config": {
            "internet": { "ssid": "home", "password": "secret" },
            "broker": { "host": "10.0.0.2" },
            "update": { "password": "BigButt" }
        },
        "mac": [1, 2, 3, 4, 5, 6],
        "supply_millivolts": 3000,
        "wifi_polls_to_connect": 0,
        "update_listen": "127.0.0.1:0",
        "max_passes": 3
    }"#;

    fn scenario(update_mode: bool, setup_pressed: bool) -> Scenario<'static> {
        let mut scenario: Scenario<'static> = serde_json::from_str(MINIMAL).unwrap();
        scenario.update_mode = update_mode;
        scenario.setup_pressed = setup_pressed;
        scenario
    }

    #[test]
    fn test_scenario_defaults() {
        let json = r#"{
            "config": {
                "internet": { "ssid": "home", "password": "secret" },
                "broker": { "host": "10.0.0.2" }
            },
            "mac": [1, 2, 3, 4, 5, 6],
            "supply_millivolts": 3000
        }"#;
        let scenario: Scenario<'_> = serde_json::from_str(json).unwrap();

        assert_eq!(scenario.wifi_polls_to_connect, None);
        assert!(scenario.broker_reachable);
        assert_eq!(scenario.broker_refusals, 0);
        assert!(!scenario.update_mode);
        assert!(!scenario.status_led);
        assert!(!scenario.setup_pressed);
        assert_eq!(scenario.update_listen, "127.0.0.1:8080");
        assert_eq!(scenario.max_passes, 3_000);
    }

    #[test]
    fn test_bundled_scenarios_parse() {
        let default: Scenario<'_> =
            serde_json::from_str(include_str!("../scenarios/default.json")).unwrap();
        assert_eq!(default.config.validate(), Ok(()));
        assert!(!default.update_mode);

        let update: Scenario<'_> =
            serde_json::from_str(include_str!("../scenarios/update.json")).unwrap();
        assert_eq!(update.config.validate(), Ok(()));
        assert!(update.update_mode);
        assert!(update.status_led);
        assert!(update.setup_pressed);
    }

    #[tokio::test]
    async fn test_button_is_ignored_without_update_mode() {
        let ending = run(&scenario(false, true)).await;

        assert_eq!(ending, Ending::Slept(SleepRequest::default()));
    }

    #[tokio::test]
    async fn test_update_mode_holds_pressed_node_awake() {
        let ending = run(&scenario(true, true)).await;

        assert_eq!(ending, Ending::Stopped(WakeState::AwaitingSetupDecision));
    }

    #[tokio::test]
    async fn test_update_mode_with_released_button_reports() {
        let mut scenario = scenario(true, false);
        scenario.status_led = true;

        let ending = run(&scenario).await;

        assert_eq!(ending, Ending::Slept(SleepRequest::default()));
    }
}

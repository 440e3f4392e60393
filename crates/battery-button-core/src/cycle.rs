//! Wake cycle controller
//!
//! Everything the node does between reset and deep sleep. The controller runs
//! in short passes, each ending with a fixed pause, and moves through three
//! states:
//!
//! ```text
//! AwaitingSetupDecision --(button released)--> ReadyToSend --> Quiescing --> sleep
//!          ^      |
//!          +------+ (button pressed once: latched until reset)
//! ```
//!
//! Builds without update mode start directly in `ReadyToSend`.

use core::time::Duration;

use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

use crate::clock::{Clock, PhaseTimer};
use crate::identity::{DeviceIdentity, Topic};
use crate::messaging::{MessagingClient, PubSubSession};
use crate::power::{PowerReporter, SupplyVoltage};
use crate::setup::SetupMode;

/// Pause at the end of every pass that does not end the cycle.
pub const PASS_DELAY_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    AwaitingSetupDecision,
    ReadyToSend,
    Quiescing,
}

/// Handed to the platform when the cycle is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepRequest {
    /// `None`: no timer wake source, only a reset wakes the node.
    pub wake_after: Option<Duration>,
    /// Ask for a full radio calibration on the next boot.
    pub calibrate_radio: bool,
}

impl Default for SleepRequest {
    fn default() -> Self {
        Self {
            wake_after: None,
            calibrate_radio: true,
        }
    }
}

/// Phase lengths measured this wake, in milliseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimes {
    /// From the end of the WiFi phase to the end of the MQTT connect.
    pub connect_ms: Option<u64>,
    /// From boot to the sleep request.
    pub awake_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Continue,
    Sleep(SleepRequest),
}

pub struct WakeCycle<S, V, M, D, C> {
    messaging: MessagingClient<S>,
    reporter: PowerReporter<V>,
    setup: M,
    delay: D,
    clock: C,
    topic: Topic,
    state: WakeState,
    update_requested: bool,
    timer: PhaseTimer,
    phases: PhaseTimes,
}

impl<S, V, M, D, C> WakeCycle<S, V, M, D, C>
where
    S: PubSubSession,
    V: SupplyVoltage,
    M: SetupMode,
    D: DelayNs,
    C: Clock,
{
    pub fn new(
        identity: &DeviceIdentity,
        messaging: MessagingClient<S>,
        reporter: PowerReporter<V>,
        setup: M,
        delay: D,
        clock: C,
        timer: PhaseTimer,
    ) -> Self {
        let state = if setup.is_enabled() {
            WakeState::AwaitingSetupDecision
        } else {
            WakeState::ReadyToSend
        };
        Self {
            messaging,
            reporter,
            setup,
            delay,
            clock,
            topic: Topic::for_device(identity),
            state,
            update_requested: false,
            timer,
            phases: PhaseTimes::default(),
        }
    }

    pub fn state(&self) -> WakeState {
        self.state
    }

    /// Whether the setup button was seen pressed this boot.
    pub fn update_requested(&self) -> bool {
        self.update_requested
    }

    pub fn phases(&self) -> PhaseTimes {
        self.phases
    }

    pub fn messaging(&self) -> &MessagingClient<S> {
        &self.messaging
    }

    pub fn setup(&self) -> &M {
        &self.setup
    }

    /// One iteration of the control loop.
    pub async fn pass(&mut self) -> PassOutcome {
        if self.state == WakeState::AwaitingSetupDecision {
            self.setup.service(self.clock.now_ms()).await;
        }

        if let Err(e) = self.messaging.service().await {
            warn!("MQTT keep-alive failed: {:?}", e);
        }

        match self.state {
            WakeState::AwaitingSetupDecision => {
                // Latched: the pin is not read again until reset
                if !self.update_requested && self.setup.button_pressed() {
                    info!("Setup button pressed, waiting for firmware update");
                    self.update_requested = true;
                }
                if !self.update_requested {
                    self.state = WakeState::ReadyToSend;
                }
            }
            WakeState::ReadyToSend => {
                self.report().await;
                self.state = WakeState::Quiescing;
            }
            WakeState::Quiescing => {
                let awake_ms = self.timer.since_boot(self.clock.now_ms());
                self.phases.awake_ms = Some(awake_ms);
                if self.timer.enabled() {
                    info!("Send time: {} ms", awake_ms);
                    info!("Good Night");
                }
                return PassOutcome::Sleep(SleepRequest::default());
            }
        }

        self.delay.delay_ms(PASS_DELAY_MS).await;
        PassOutcome::Continue
    }

    /// Run passes until the cycle asks to sleep.
    ///
    /// Never returns while an update request is latched.
    pub async fn run(&mut self) -> SleepRequest {
        loop {
            if let PassOutcome::Sleep(request) = self.pass().await {
                return request;
            }
        }
    }

    /// Sample, connect and publish once. Failures are logged only.
    async fn report(&mut self) {
        let reading = self.reporter.sample();
        let payload = reading.format();
        debug!("Supply voltage: {} V", payload);

        let outcome = self.messaging.ensure_connected(&mut self.delay).await;
        self.phases.connect_ms = Some(self.timer.lap("MQTT", self.clock.now_ms()));
        match self
            .messaging
            .publish(self.topic.as_str(), payload.as_bytes())
            .await
        {
            Ok(()) => info!("{} <- {}", self.topic, payload),
            Err(e) => warn!("Report not delivered ({:?}): {:?}", outcome, e),
        }
    }
}

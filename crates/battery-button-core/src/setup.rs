//! Setup (firmware update) mode
//!
//! When built in, the wake cycle starts by reading a dedicated button. A
//! press keeps the node awake serving the update endpoint until it is reset;
//! otherwise the cycle moves straight on to its report.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};
use log::warn;

use crate::update::UpdateService;

/// Blink period of the status LED while waiting in setup mode.
pub const LED_BLINK_INTERVAL_MS: u64 = 500;

/// Hooks the wake cycle calls while in its setup-decision state.
pub trait SetupMode {
    /// Whether the setup-decision state exists at all.
    fn is_enabled(&self) -> bool;

    /// Read the setup button once. `true` means pressed.
    fn button_pressed(&mut self) -> bool;

    /// Per-pass work while the cycle waits in setup mode.
    fn service(&mut self, now_ms: u64) -> impl Future<Output = ()>;
}

/// Build without update mode: the cycle starts at the report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSetupMode;

impl SetupMode for NoSetupMode {
    fn is_enabled(&self) -> bool {
        false
    }

    fn button_pressed(&mut self) -> bool {
        false
    }

    async fn service(&mut self, _now_ms: u64) {}
}

/// Toggles an LED on a fixed interval.
pub struct StatusLed<L> {
    pin: L,
    level: PinState,
    last_toggle_ms: u64,
    interval_ms: u64,
}

impl<L: OutputPin> StatusLed<L> {
    /// The LED starts logically high but is not driven until the first toggle.
    pub fn new(pin: L) -> Self {
        Self {
            pin,
            level: PinState::High,
            last_toggle_ms: 0,
            interval_ms: LED_BLINK_INTERVAL_MS,
        }
    }

    pub fn level(&self) -> PinState {
        self.level
    }

    /// Toggle if at least one interval passed since the last toggle.
    pub fn update(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_toggle_ms) < self.interval_ms {
            return;
        }
        self.last_toggle_ms = now_ms;
        self.level = !self.level;
        if self.pin.set_state(self.level).is_err() {
            warn!("Status LED write failed");
        }
    }
}

/// Placeholder pin for builds with update mode but without a status LED.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLed;

impl ErrorType for NoLed {
    type Error = Infallible;
}

impl OutputPin for NoLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Update mode: active-low setup button, optional status LED and the
/// update endpoint.
pub struct UpdateMode<B, L, U> {
    button: B,
    led: Option<StatusLed<L>>,
    server: U,
}

impl<B, U> UpdateMode<B, NoLed, U>
where
    B: InputPin,
    U: UpdateService,
{
    pub fn without_led(button: B, server: U) -> Self {
        Self {
            button,
            led: None,
            server,
        }
    }
}

impl<B, L, U> UpdateMode<B, L, U>
where
    B: InputPin,
    L: OutputPin,
    U: UpdateService,
{
    pub fn with_led(button: B, led: StatusLed<L>, server: U) -> Self {
        Self {
            button,
            led: Some(led),
            server,
        }
    }

    pub fn led(&self) -> Option<&StatusLed<L>> {
        self.led.as_ref()
    }

    pub fn server(&self) -> &U {
        &self.server
    }
}

impl<B, L, U> SetupMode for UpdateMode<B, L, U>
where
    B: InputPin,
    L: OutputPin,
    U: UpdateService,
{
    fn is_enabled(&self) -> bool {
        true
    }

    fn button_pressed(&mut self) -> bool {
        match self.button.is_low() {
            Ok(pressed) => pressed,
            Err(_) => {
                warn!("Setup button read failed, assuming released");
                false
            }
        }
    }

    async fn service(&mut self, now_ms: u64) {
        if let Some(led) = self.led.as_mut() {
            led.update(now_ms);
        }
        self.server.service().await;
    }
}

//! Supply voltage from a resistor divider on an ADC1 pin.
//!
//! The ESP32-S3 has no internal VCC channel, so the battery is measured
//! through a divider of two equal resistors on GPIO1.

use battery_button_core::power::SupplyVoltage;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::peripherals::{ADC1, GPIO1};
use log::warn;

pub type SupplyAdc = Adc<'static, ADC1<'static>, Blocking>;
pub type SupplyPin = AdcPin<GPIO1<'static>, ADC1<'static>>;

/// Input voltage at full scale with 11 dB attenuation.
pub const FULL_SCALE_MV: u32 = 3100;
/// Battery voltage over divider output.
pub const DIVIDER_RATIO: u32 = 2;
const ADC_MAX: u32 = 4095;
/// Polls of a conversion before giving up on it.
const READ_ATTEMPTS: u32 = 10_000;

pub struct AdcSupply {
    adc: SupplyAdc,
    pin: SupplyPin,
}

impl AdcSupply {
    pub fn new(adc: SupplyAdc, pin: SupplyPin) -> Self {
        Self { adc, pin }
    }
}

impl SupplyVoltage for AdcSupply {
    fn read_millivolts(&mut self) -> u16 {
        for _ in 0..READ_ATTEMPTS {
            if let Ok(raw) = self.adc.read_oneshot(&mut self.pin) {
                return raw_to_millivolts(raw);
            }
        }
        warn!("ADC conversion did not complete, reporting 0 mV");
        0
    }
}

/// Linear conversion of a 12-bit sample to battery millivolts.
pub fn raw_to_millivolts(raw: u16) -> u16 {
    let millivolts = u32::from(raw).min(ADC_MAX) * FULL_SCALE_MV * DIVIDER_RATIO / ADC_MAX;
    millivolts as u16
}

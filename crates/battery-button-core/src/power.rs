//! Supply voltage reporting
//!
//! One sample per wake, converted to volts and corrected by a fixed offset
//! that was measured against a reference meter.

use core::fmt::Write;

use heapless::String;

/// Subtracted from every reading to remove the systematic measurement bias.
pub const CALIBRATION_OFFSET_VOLTS: f32 = 0.12;

/// Minimum width of the formatted reading.
pub const PAYLOAD_WIDTH: usize = 4;
/// Digits after the decimal point.
pub const PAYLOAD_PRECISION: usize = 2;
/// Capacity of the payload buffer.
pub const PAYLOAD_CAPACITY: usize = 10;

/// Instantaneous supply voltage measurement.
///
/// There is no error path: a platform that cannot measure its supply must
/// substitute another source and re-calibrate the offset.
pub trait SupplyVoltage {
    fn read_millivolts(&mut self) -> u16;
}

/// A calibrated supply voltage in volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageReading {
    volts: f32,
}

impl VoltageReading {
    pub fn from_millivolts(millivolts: u16) -> Self {
        Self {
            volts: Self::uncalibrated(millivolts) - CALIBRATION_OFFSET_VOLTS,
        }
    }

    /// Raw sample in volts, before the offset is applied.
    pub fn uncalibrated(millivolts: u16) -> f32 {
        f32::from(millivolts) / 1000.0
    }

    pub fn volts(&self) -> f32 {
        self.volts
    }

    /// Fixed-width decimal rendering used as the MQTT payload, e.g. `"3.18"`.
    pub fn format(&self) -> String<PAYLOAD_CAPACITY> {
        let mut payload = String::new();
        // Any f32 a u16 millivolt count produces fits in ten characters
        let _ = write!(
            payload,
            "{:>width$.prec$}",
            self.volts,
            width = PAYLOAD_WIDTH,
            prec = PAYLOAD_PRECISION
        );
        payload
    }
}

pub struct PowerReporter<V> {
    source: V,
}

impl<V: SupplyVoltage> PowerReporter<V> {
    pub fn new(source: V) -> Self {
        Self { source }
    }

    /// Take one sample. Not retried.
    pub fn sample(&mut self) -> VoltageReading {
        VoltageReading::from_millivolts(self.source.read_millivolts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedSupply;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_reference_sample() {
        assert!(close(VoltageReading::uncalibrated(3300), 3.300));

        let reading = VoltageReading::from_millivolts(3300);
        assert!(close(reading.volts(), 3.180));
        assert_eq!(reading.format().as_str(), "3.18");
    }

    #[test]
    fn test_format_rounds_to_two_decimals() {
        assert_eq!(VoltageReading::from_millivolts(3004).format().as_str(), "2.88");
        assert_eq!(VoltageReading::from_millivolts(2999).format().as_str(), "2.88");
        assert_eq!(VoltageReading::from_millivolts(4200).format().as_str(), "4.08");
    }

    #[test]
    fn test_format_extremes_fit_buffer() {
        assert_eq!(VoltageReading::from_millivolts(0).format().as_str(), "-0.12");
        assert_eq!(VoltageReading::from_millivolts(60_000).format().as_str(), "59.88");
    }

    #[test]
    fn test_reporter_takes_one_sample_per_call() {
        let mut reporter = PowerReporter::new(FixedSupply::new(3300));
        let reading = reporter.sample();
        assert!(close(reading.volts(), 3.18));
        assert_eq!(reporter.source.reads, 1);
    }
}

//! Clock and deep sleep.

use battery_button_core::clock::Clock;
use battery_button_core::cycle::SleepRequest;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use log::info;

/// Milliseconds since boot from the embassy time driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }
}

/// Enter deep sleep as requested. Waking is a full restart.
///
/// esp-radio does not persist RF calibration data, so every boot already
/// runs a full calibration and `calibrate_radio` needs no action here.
pub fn deep_sleep(rtc: &mut Rtc<'_>, request: SleepRequest) -> ! {
    match request.wake_after {
        Some(after) => {
            info!("Sleeping for {} ms", after.as_millis());
            let timer = TimerWakeupSource::new(after);
            rtc.sleep_deep(&[&timer])
        }
        None => {
            info!("Sleeping until reset");
            rtc.sleep_deep(&[])
        }
    }
}

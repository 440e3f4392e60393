//! Bounded WiFi acquisition
//!
//! The node must never block on a missing network: the join is polled a
//! fixed number of times and then given up on. The caller carries on either
//! way; a missing network simply shows up later as a failed MQTT connect.

use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::config::InternetConfig;

/// Maximum number of status polls before giving up.
pub const POLL_LIMIT: u8 = 50;
/// Delay between status polls.
pub const POLL_INTERVAL_MS: u32 = 50;
/// Extra delay per poll in debug configurations, so the log is readable.
pub const DEBUG_POLL_EXTRA_MS: u32 = 450;
/// Settle time before starting the join.
pub const PRE_JOIN_DELAY_MS: u32 = 10;

/// Station-mode WiFi as seen by the acquirer.
pub trait WifiLink {
    type Error: Debug;

    /// Start joining the network. Must not wait for the join to finish.
    fn begin(&mut self, credentials: &InternetConfig<'_>) -> Result<(), Self::Error>;

    /// `true` once the link is associated and has an address.
    fn is_connected(&mut self) -> bool;
}

/// How often and how long the acquirer polls the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub limit: u8,
    pub interval_ms: u32,
}

impl PollSchedule {
    /// Schedule for the given build flavour. Debug slows each poll down to
    /// 500 ms but keeps the same poll count.
    pub const fn new(debug: bool) -> Self {
        Self {
            limit: POLL_LIMIT,
            interval_ms: if debug {
                POLL_INTERVAL_MS + DEBUG_POLL_EXTRA_MS
            } else {
                POLL_INTERVAL_MS
            },
        }
    }

    /// Longest time spent polling.
    pub const fn budget_ms(&self) -> u32 {
        self.limit as u32 * self.interval_ms
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new(false)
    }
}

/// The link reported "connected" after `polls` waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    pub polls: u8,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NetworkError<E: Debug> {
    #[error("failed to start WiFi join: {0:?}")]
    Begin(E),
    #[error("WiFi not connected after {polls} polls")]
    Timeout { polls: u8 },
}

/// Join the configured network within the poll budget.
///
/// Returns as soon as the link reports "connected". Both error cases are
/// informational: the wake cycle proceeds regardless.
pub async fn acquire_network<L, D>(
    link: &mut L,
    credentials: &InternetConfig<'_>,
    schedule: PollSchedule,
    delay: &mut D,
) -> Result<Joined, NetworkError<L::Error>>
where
    L: WifiLink,
    D: DelayNs,
{
    delay.delay_ms(PRE_JOIN_DELAY_MS).await;

    info!("Connecting to {}", credentials.ssid);
    link.begin(credentials).map_err(NetworkError::Begin)?;

    let mut polls: u8 = 0;
    loop {
        if link.is_connected() {
            info!("WiFi connected after {} polls", polls);
            return Ok(Joined { polls });
        }
        if polls >= schedule.limit {
            warn!("WiFi not connected after {} polls, continuing", polls);
            return Err(NetworkError::Timeout { polls });
        }
        delay.delay_ms(schedule.interval_ms).await;
        polls += 1;
        debug!(".");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClock, RecordingDelay, ScriptedLink};
    use embassy_futures::block_on;

    const CREDENTIALS: InternetConfig<'static> = InternetConfig {
        ssid: "home",
        password: "secret",
    };

    #[test]
    fn test_returns_immediately_when_connected() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut link = ScriptedLink::connects_after(0);

        let result = block_on(acquire_network(
            &mut link,
            &CREDENTIALS,
            PollSchedule::default(),
            &mut delay,
        ));

        assert_eq!(result, Ok(Joined { polls: 0 }));
        assert_eq!(link.status_checks, 1);
        assert_eq!(delay.delays_ms(), [PRE_JOIN_DELAY_MS]);
        assert_eq!(link.joined_ssid.as_deref(), Some("home"));
    }

    #[test]
    fn test_stops_polling_once_connected() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut link = ScriptedLink::connects_after(7);

        let result = block_on(acquire_network(
            &mut link,
            &CREDENTIALS,
            PollSchedule::default(),
            &mut delay,
        ));

        assert_eq!(result, Ok(Joined { polls: 7 }));
        assert_eq!(link.status_checks, 8);
        assert_eq!(clock.now(), u64::from(PRE_JOIN_DELAY_MS) + 7 * 50);
    }

    #[test]
    fn test_gives_up_after_poll_limit() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut link = ScriptedLink::never_connects();

        let result = block_on(acquire_network(
            &mut link,
            &CREDENTIALS,
            PollSchedule::default(),
            &mut delay,
        ));

        assert_eq!(result, Err(NetworkError::Timeout { polls: 50 }));
        // One delay for the settle time, then exactly one per poll
        assert_eq!(delay.delays_ms().len(), 1 + POLL_LIMIT as usize);
        assert_eq!(clock.now(), u64::from(PRE_JOIN_DELAY_MS) + 2_500);
    }

    #[test]
    fn test_debug_schedule_keeps_poll_cap() {
        let schedule = PollSchedule::new(true);
        assert_eq!(schedule.limit, 50);
        assert_eq!(schedule.interval_ms, 500);
        assert_eq!(schedule.budget_ms(), 25_000);
        assert_eq!(PollSchedule::new(false).budget_ms(), 2_500);

        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut link = ScriptedLink::never_connects();
        let result = block_on(acquire_network(&mut link, &CREDENTIALS, schedule, &mut delay));

        assert_eq!(result, Err(NetworkError::Timeout { polls: 50 }));
        assert_eq!(link.status_checks, 51);
    }

    #[test]
    fn test_begin_failure_skips_polling() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut link = ScriptedLink::rejects_begin();

        let result = block_on(acquire_network(
            &mut link,
            &CREDENTIALS,
            PollSchedule::default(),
            &mut delay,
        ));

        assert_eq!(result, Err(NetworkError::Begin(())));
        assert_eq!(link.status_checks, 0);
    }
}

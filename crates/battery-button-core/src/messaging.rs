//! MQTT session wrapper with bounded reconnect
//!
//! Delivery is best effort. Connects are retried a fixed number of times with
//! a fixed pause, publishes are QoS 0 and never acknowledged. Every outcome is
//! returned as a value so callers (and tests) can see what happened, but the
//! wake cycle does not act on failures: the node sleeps either way.

use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};
use thiserror_no_std::Error;

use crate::config::BrokerConfig;
use crate::identity::DeviceIdentity;

/// Maximum connect attempts per call to [`MessagingClient::ensure_connected`].
pub const CONNECT_ATTEMPTS: u8 = 10;
/// Pause after a failed connect attempt. Does not grow.
pub const CONNECT_RETRY_DELAY_MS: u32 = 500;
/// Literal topic of the liveness announcement (not the per-device topic).
pub const ANNOUNCE_TOPIC: &str = "outTopic";
/// Payload of the liveness announcement.
pub const ANNOUNCE_PAYLOAD: &[u8] = b"connected";

/// Values presented to the broker when opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCredentials<'a> {
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl<'a> SessionCredentials<'a> {
    /// The client id is the device identity; user and password come from the
    /// broker configuration.
    pub fn new(identity: &'a DeviceIdentity, broker: &BrokerConfig<'a>) -> Self {
        Self {
            client_id: identity.as_str(),
            username: broker.username,
            password: broker.password,
        }
    }
}

/// A publish/subscribe session to one broker.
///
/// Implementations are created with their [`SessionCredentials`] and broker
/// address; each `connect` call is a single, independent attempt.
pub trait PubSubSession {
    type Error: Debug;

    fn is_connected(&self) -> bool;

    /// One connect attempt, including the transport connection.
    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// QoS 0 publish. Success only means the packet was handed to the transport.
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Keep-alive housekeeping for an open session.
    fn poll(&mut self) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Result of [`MessagingClient::ensure_connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    AlreadyConnected,
    Connected { attempts: u8 },
    Exhausted { attempts: u8 },
}

impl ConnectOutcome {
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Exhausted { .. })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessagingError<E: Debug> {
    #[error("MQTT session is not connected")]
    NotConnected,
    #[error("MQTT transport error: {0:?}")]
    Transport(E),
}

pub struct MessagingClient<S> {
    session: S,
    client_id: DeviceIdentity,
}

impl<S: PubSubSession> MessagingClient<S> {
    pub fn new(session: S, identity: &DeviceIdentity) -> Self {
        Self {
            session,
            client_id: identity.clone(),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Connect if needed, trying at most [`CONNECT_ATTEMPTS`] times.
    ///
    /// Each successful connect is followed by the liveness announcement on
    /// [`ANNOUNCE_TOPIC`]. Never fails; an exhausted budget is reported in the
    /// returned outcome.
    pub async fn ensure_connected<D: DelayNs>(&mut self, delay: &mut D) -> ConnectOutcome {
        if self.session.is_connected() {
            return ConnectOutcome::AlreadyConnected;
        }

        let mut attempts = 0;
        while attempts < CONNECT_ATTEMPTS {
            attempts += 1;
            info!("Attempting MQTT connection...");

            match self.session.connect().await {
                Ok(()) => {
                    info!("{} connected", self.client_id);
                    if let Err(e) = self.session.publish(ANNOUNCE_TOPIC, ANNOUNCE_PAYLOAD).await {
                        warn!("Announcement publish failed: {:?}", e);
                    }
                    return ConnectOutcome::Connected { attempts };
                }
                Err(e) => {
                    warn!(
                        "failed, rc={:?} try again in {} ms",
                        e, CONNECT_RETRY_DELAY_MS
                    );
                    delay.delay_ms(CONNECT_RETRY_DELAY_MS).await;
                }
            }
        }

        warn!("MQTT connect gave up after {} attempts", attempts);
        ConnectOutcome::Exhausted { attempts }
    }

    /// Fire-and-forget publish. A disconnected session is a no-op error.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), MessagingError<S::Error>> {
        if !self.session.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        self.session
            .publish(topic, payload)
            .await
            .map_err(MessagingError::Transport)
    }

    /// Service an open session; nothing to do while disconnected.
    pub async fn service(&mut self) -> Result<(), MessagingError<S::Error>> {
        if !self.session.is_connected() {
            return Ok(());
        }
        self.session.poll().await.map_err(MessagingError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClock, RecordingDelay, ScriptedSession};
    use embassy_futures::block_on;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_mac(&[0, 0, 0, 0xAB, 0xCD, 0xEF])
    }

    #[test]
    fn test_credentials_use_identity_as_client_id() {
        let id = identity();
        let broker = BrokerConfig {
            host: "192.168.10.5",
            username: "mqtt",
            password: "pw",
            ..BrokerConfig::default()
        };
        let credentials = SessionCredentials::new(&id, &broker);
        assert_eq!(credentials.client_id, "ABCDEF");
        assert_eq!(credentials.username, "mqtt");
        assert_eq!(credentials.password, "pw");
    }

    #[test]
    fn test_connects_first_try_and_announces() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut client = MessagingClient::new(ScriptedSession::accepting_after(0), &identity());

        let outcome = block_on(client.ensure_connected(&mut delay));

        assert_eq!(outcome, ConnectOutcome::Connected { attempts: 1 });
        assert_eq!(client.session().connect_calls, 1);
        assert_eq!(
            client.session().published,
            [(ANNOUNCE_TOPIC.to_string(), b"connected".to_vec())]
        );
        assert!(delay.delays_ms().is_empty());
    }

    #[test]
    fn test_retries_with_fixed_delay() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut client = MessagingClient::new(ScriptedSession::accepting_after(3), &identity());

        let outcome = block_on(client.ensure_connected(&mut delay));

        assert_eq!(outcome, ConnectOutcome::Connected { attempts: 4 });
        assert_eq!(delay.delays_ms(), [500, 500, 500]);
    }

    #[test]
    fn test_gives_up_after_ten_attempts_without_error() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut client = MessagingClient::new(ScriptedSession::refusing(), &identity());

        let outcome = block_on(client.ensure_connected(&mut delay));

        assert_eq!(outcome, ConnectOutcome::Exhausted { attempts: 10 });
        assert!(!outcome.is_connected());
        assert_eq!(client.session().connect_calls, 10);
        assert!(delay.delays_ms().iter().all(|&ms| ms == CONNECT_RETRY_DELAY_MS));
        assert_eq!(clock.now(), 10 * 500);
        assert!(client.session().published.is_empty());
    }

    #[test]
    fn test_already_connected_skips_connect() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut client = MessagingClient::new(ScriptedSession::accepting_after(0), &identity());

        block_on(client.ensure_connected(&mut delay));
        let outcome = block_on(client.ensure_connected(&mut delay));

        assert_eq!(outcome, ConnectOutcome::AlreadyConnected);
        assert_eq!(client.session().connect_calls, 1);
        // Announced once, for the one successful connect
        assert_eq!(client.session().published.len(), 1);
    }

    #[test]
    fn test_publish_on_disconnected_session_is_noop() {
        let mut client = MessagingClient::new(ScriptedSession::refusing(), &identity());

        let result = block_on(client.publish("/BatteryButton/ABCDEF", b"3.18"));

        assert_eq!(result, Err(MessagingError::NotConnected));
        assert!(client.session().published.is_empty());
    }

    #[test]
    fn test_publish_failure_is_reported_not_retried() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut session = ScriptedSession::accepting_after(0);
        session.fail_publishes = true;
        let mut client = MessagingClient::new(session, &identity());
        block_on(client.ensure_connected(&mut delay));

        let result = block_on(client.publish("/BatteryButton/ABCDEF", b"3.18"));

        assert_eq!(result, Err(MessagingError::Transport(())));
        assert_eq!(client.session().publish_calls, 2);
    }

    #[test]
    fn test_service_only_polls_open_session() {
        let clock = FakeClock::new();
        let mut delay = RecordingDelay::new(&clock);
        let mut client = MessagingClient::new(ScriptedSession::accepting_after(0), &identity());

        assert_eq!(block_on(client.service()), Ok(()));
        assert_eq!(client.session().poll_calls, 0);

        block_on(client.ensure_connected(&mut delay));
        assert_eq!(block_on(client.service()), Ok(()));
        assert_eq!(client.session().poll_calls, 1);
    }
}

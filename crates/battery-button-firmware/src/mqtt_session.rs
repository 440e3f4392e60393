//! rust-mqtt session over an embassy-net TCP socket.

use battery_button_core::messaging::{PubSubSession, SessionCredentials};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{self, State, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Address, Stack};
use embassy_time::{Duration, Instant};
use embedded_io_async::{ErrorType, Read, Write};
use log::{debug, info, warn};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

/// Keep-alive announced to the broker.
pub const KEEP_ALIVE_SECS: u16 = 15;
/// Timeout for TCP connect and for any single read or write.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(3);
/// Maximum number of MQTT v5 properties the client keeps.
const MAX_PROPERTIES: usize = 5;

/// Where the broker lives. The address is resolved again on every reopen,
/// so a late DHCP lease or DNS answer is picked up.
#[derive(Debug, Clone, Copy)]
pub struct BrokerEndpoint {
    pub host: &'static str,
    pub port: u16,
}

/// Transport handed to rust-mqtt. It reopens the TCP connection by itself
/// when the client writes on a socket that is not established, which is
/// what happens at the start of every CONNECT.
pub struct EmbassyNetTransport {
    socket: TcpSocket<'static>,
    stack: Stack<'static>,
    broker: BrokerEndpoint,
}

impl EmbassyNetTransport {
    pub fn new(
        stack: Stack<'static>,
        rx_buffer: &'static mut [u8],
        tx_buffer: &'static mut [u8],
        broker: BrokerEndpoint,
    ) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        Self {
            socket,
            stack,
            broker,
        }
    }

    async fn resolve(&self) -> Option<IpEndpoint> {
        if let Ok(address) = self.broker.host.parse::<Ipv4Address>() {
            return Some(IpEndpoint::new(IpAddress::Ipv4(address), self.broker.port));
        }

        match self.stack.dns_query(self.broker.host, DnsQueryType::A).await {
            Ok(addresses) => addresses
                .first()
                .map(|address| IpEndpoint::new(*address, self.broker.port)),
            Err(e) => {
                warn!("DNS lookup of {} failed: {:?}", self.broker.host, e);
                None
            }
        }
    }

    async fn reopen(&mut self) -> Result<(), tcp::Error> {
        self.socket.abort();
        let _ = self.socket.flush().await;

        let endpoint = self.resolve().await.ok_or(tcp::Error::ConnectionReset)?;
        debug!("Opening TCP connection to {}", endpoint);
        self.socket.connect(endpoint).await.map_err(|e| {
            warn!("TCP connect to {} failed: {:?}", endpoint, e);
            tcp::Error::ConnectionReset
        })
    }
}

impl ErrorType for EmbassyNetTransport {
    type Error = tcp::Error;
}

impl Read for EmbassyNetTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf).await
    }
}

impl Write for EmbassyNetTransport {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.socket.state() != State::Established {
            self.reopen().await?;
        }
        self.socket.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await
    }
}

pub struct MqttSession {
    client: MqttClient<'static, EmbassyNetTransport, MAX_PROPERTIES, CountingRng>,
    connected: bool,
    last_activity: Instant,
}

impl MqttSession {
    pub fn new(
        transport: EmbassyNetTransport,
        credentials: SessionCredentials<'static>,
        write_buffer: &'static mut [u8],
        read_buffer: &'static mut [u8],
    ) -> Self {
        let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
        config.add_client_id(credentials.client_id);
        config.keep_alive = KEEP_ALIVE_SECS;
        if !credentials.username.is_empty() {
            config.add_username(credentials.username);
            if !credentials.password.is_empty() {
                config.add_password(credentials.password);
            }
        }

        let write_len = write_buffer.len();
        let read_len = read_buffer.len();
        let client = MqttClient::<_, MAX_PROPERTIES, _>::new(
            transport,
            write_buffer,
            write_len,
            read_buffer,
            read_len,
            config,
        );

        Self {
            client,
            connected: false,
            last_activity: Instant::now(),
        }
    }

    fn lost(&mut self, e: ReasonCode) -> ReasonCode {
        self.connected = false;
        e
    }
}

impl PubSubSession for MqttSession {
    type Error = ReasonCode;

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Self::Error> {
        match self.client.connect_to_broker().await {
            Ok(()) => {
                info!("MQTT session open");
                self.connected = true;
                self.last_activity = Instant::now();
                Ok(())
            }
            Err(e) => Err(self.lost(e)),
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        match self
            .client
            .send_message(topic, payload, QualityOfService::QoS0, false)
            .await
        {
            Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => {
                self.last_activity = Instant::now();
                Ok(())
            }
            Err(e) => Err(self.lost(e)),
        }
    }

    /// Ping once half the keep-alive passed without traffic.
    async fn poll(&mut self) -> Result<(), Self::Error> {
        let idle = Instant::now() - self.last_activity;
        if idle < Duration::from_secs(u64::from(KEEP_ALIVE_SECS) / 2) {
            return Ok(());
        }
        match self.client.send_ping().await {
            Ok(()) => {
                self.last_activity = Instant::now();
                Ok(())
            }
            Err(e) => Err(self.lost(e)),
        }
    }
}

//! Update endpoint and mDNS responder on the embassy-net stack.
//!
//! [`UpdateServer`] is the wake cycle's side: every pass it opens the
//! endpoint and answers pending mDNS questions. [`serve_updates`] runs next
//! to the cycle, waits until the endpoint is opened and then serves the
//! update router on port 80 until an image has been activated.

use core::convert::Infallible;

use battery_button_core::mdns::{MDNS_GROUP, MDNS_PORT, MdnsResponder};
use battery_button_core::update::{UpdateEndpoint, UpdateService};
use embassy_net::tcp::TcpSocket;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Ipv4Address, Stack};
use embassy_time::{Duration, Timer, with_timeout};
use log::{debug, info, warn};
use picoserve::routing::PathRouter;

use crate::ota::OtaSink;

/// How long one pass waits for an mDNS question.
const MDNS_WINDOW: Duration = Duration::from_millis(5);
/// Lets the success page reach the browser before the restart.
const RESTART_DELAY: Duration = Duration::from_millis(500);

const SERVER_CONFIG: picoserve::Config<Duration> = picoserve::Config::new(picoserve::Timeouts {
    start_read_request: Some(Duration::from_secs(5)),
    persistent_start_read_request: Some(Duration::from_secs(1)),
    read_request: Some(Duration::from_secs(5)),
    write: Some(Duration::from_secs(5)),
});

pub const TCP_BUFFER_LEN: usize = 1536;
pub const HTTP_BUFFER_LEN: usize = 2048;
pub const MDNS_BUFFER_LEN: usize = 512;

pub type Endpoint = UpdateEndpoint<'static, OtaSink>;

pub struct HttpBuffers {
    pub tcp_rx: [u8; TCP_BUFFER_LEN],
    pub tcp_tx: [u8; TCP_BUFFER_LEN],
    pub http: [u8; HTTP_BUFFER_LEN],
}

pub struct MdnsBuffers {
    pub rx_meta: [PacketMetadata; 4],
    pub rx: [u8; MDNS_BUFFER_LEN],
    pub tx_meta: [PacketMetadata; 4],
    pub tx: [u8; MDNS_BUFFER_LEN],
}

/// Buffers the update mode needs for the rest of the boot.
pub struct UpdateBuffers {
    pub http: HttpBuffers,
    pub mdns: MdnsBuffers,
}

impl UpdateBuffers {
    pub const fn new() -> Self {
        Self {
            http: HttpBuffers {
                tcp_rx: [0; TCP_BUFFER_LEN],
                tcp_tx: [0; TCP_BUFFER_LEN],
                http: [0; HTTP_BUFFER_LEN],
            },
            mdns: MdnsBuffers {
                rx_meta: [PacketMetadata::EMPTY; 4],
                rx: [0; MDNS_BUFFER_LEN],
                tx_meta: [PacketMetadata::EMPTY; 4],
                tx: [0; MDNS_BUFFER_LEN],
            },
        }
    }
}

impl Default for UpdateBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `app` on the endpoint's port, one connection at a time, and restart
/// once an uploaded image has been activated.
pub async fn serve_updates<P>(
    stack: Stack<'static>,
    app: &picoserve::Router<P, Endpoint>,
    endpoint: &Endpoint,
    buffers: &mut HttpBuffers,
) -> Infallible
where
    P: PathRouter<Endpoint>,
{
    endpoint.wait_opened().await;
    let port = endpoint.config().port;

    loop {
        let mut socket = TcpSocket::new(stack, &mut buffers.tcp_rx, &mut buffers.tcp_tx);

        info!("Listening on TCP:{}...", port);
        if let Err(e) = socket.accept(port).await {
            warn!("HTTP accept failed: {:?}", e);
            continue;
        }
        debug!("Received connection from {:?}", socket.remote_endpoint());

        match picoserve::serve_with_state(app, &SERVER_CONFIG, &mut buffers.http, socket, endpoint)
            .await
        {
            Ok(handled) => debug!("{} requests handled", handled),
            Err(e) => debug!("HTTP connection ended: {:?}", e),
        }

        if let Some(bytes) = endpoint.updated() {
            info!("Firmware update of {} bytes complete, restarting", bytes);
            Timer::after(RESTART_DELAY).await;
            esp_hal::system::software_reset();
        }
    }
}

/// The wake cycle's view of update mode: opens the endpoint and keeps the
/// node discoverable over mDNS.
pub struct UpdateServer {
    stack: Stack<'static>,
    endpoint: &'static Endpoint,
    udp: UdpSocket<'static>,
    mdns: Option<MdnsResponder>,
    mdns_started: bool,
}

impl UpdateServer {
    pub fn new(
        stack: Stack<'static>,
        endpoint: &'static Endpoint,
        buffers: &'static mut MdnsBuffers,
    ) -> Self {
        let udp = UdpSocket::new(
            stack,
            &mut buffers.rx_meta,
            &mut buffers.rx,
            &mut buffers.tx_meta,
            &mut buffers.tx,
        );

        Self {
            stack,
            endpoint,
            udp,
            mdns: None,
            mdns_started: false,
        }
    }

    /// Join the mDNS group once the stack has an address. Returns `false`
    /// when it should be tried again on a later pass.
    fn start_mdns(&mut self) -> bool {
        let Some(v4) = self.stack.config_v4() else {
            return false;
        };
        let address = v4.address.address();
        let config = self.endpoint.config();

        let [a, b, c, d] = MDNS_GROUP;
        if let Err(e) = self.stack.join_multicast_group(Ipv4Address::new(a, b, c, d)) {
            warn!("Joining the mDNS group failed: {:?}", e);
            return false;
        }
        if !self.udp.is_open() {
            if let Err(e) = self.udp.bind(MDNS_PORT) {
                warn!("Binding mDNS port failed: {:?}", e);
                return false;
            }
        }

        match MdnsResponder::new(config.hostname, address.octets(), config.port) {
            Ok(responder) => {
                info!(
                    "Update endpoint at http://{}{} ({})",
                    responder.host_name(),
                    config.path,
                    address
                );
                self.mdns = Some(responder);
            }
            Err(e) => warn!("mDNS disabled: {}", e),
        }
        true
    }

    async fn answer_mdns(&mut self) {
        let Some(responder) = self.mdns.as_ref() else {
            return;
        };

        let mut query = [0u8; MDNS_BUFFER_LEN];
        let Ok(Ok((len, _meta))) = with_timeout(MDNS_WINDOW, self.udp.recv_from(&mut query)).await
        else {
            return;
        };

        let mut response = [0u8; MDNS_BUFFER_LEN];
        match responder.respond(&query[..len], &mut response) {
            Ok(Some(n)) => {
                let [a, b, c, d] = MDNS_GROUP;
                let group = IpEndpoint::new(Ipv4Address::new(a, b, c, d).into(), MDNS_PORT);
                if let Err(e) = self.udp.send_to(&response[..n], group).await {
                    debug!("mDNS answer not sent: {:?}", e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Ignoring mDNS packet: {}", e),
        }
    }
}

impl UpdateService for UpdateServer {
    async fn service(&mut self) {
        self.endpoint.open();
        if !self.stack.is_config_up() {
            return;
        }
        if !self.mdns_started {
            self.mdns_started = self.start_mdns();
        }
        self.answer_mdns().await;
    }
}

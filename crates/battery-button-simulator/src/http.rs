//! Update endpoint on a host TCP port.
//!
//! Serves the same router as the firmware, so uploads can be tried with
//! `curl -u admin:<password> --data-binary @image.bin`.

use std::time::Duration;

use battery_button_core::update::{FirmwareSink, UpdateEndpoint};
use log::{debug, info, warn};
use picoserve::routing::PathRouter;
use tokio::net::TcpListener;

const SERVER_CONFIG: picoserve::Config<Duration> = picoserve::Config::new(picoserve::Timeouts {
    start_read_request: Some(Duration::from_secs(5)),
    persistent_start_read_request: Some(Duration::from_secs(1)),
    read_request: Some(Duration::from_secs(5)),
    write: Some(Duration::from_secs(5)),
});

const HTTP_BUFFER_LEN: usize = 2048;

pub type Endpoint<'a> = UpdateEndpoint<'a, ImageBuffer>;

/// Keeps an uploaded image in memory.
#[derive(Default)]
pub struct ImageBuffer {
    data: Vec<u8>,
    expected: usize,
}

impl FirmwareSink for ImageBuffer {
    type Error = &'static str;

    fn begin(&mut self, image_len: usize) -> Result<(), Self::Error> {
        self.data = Vec::with_capacity(image_len);
        self.expected = image_len;
        Ok(())
    }

    fn write(&mut self, offset: usize, chunk: &[u8]) -> Result<(), Self::Error> {
        if offset != self.data.len() {
            return Err("chunk out of order");
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        if self.data.len() != self.expected {
            return Err("image incomplete");
        }
        Ok(())
    }
}

/// Serve `app` on `address` once the wake cycle opens the endpoint. Returns
/// the image size after an upload; a bind failure leaves the node waiting.
pub async fn serve_updates<'a, P>(
    address: &str,
    app: &picoserve::Router<P, Endpoint<'a>>,
    endpoint: &Endpoint<'a>,
) -> usize
where
    P: PathRouter<Endpoint<'a>>,
{
    endpoint.wait_opened().await;

    let listener = match TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Update endpoint disabled, cannot listen on {}: {}", address, e);
            return std::future::pending().await;
        }
    };
    match listener.local_addr() {
        Ok(local) => info!("Update endpoint at http://{}{}", local, endpoint.config().path),
        Err(_) => info!("Update endpoint at http://{}{}", address, endpoint.config().path),
    }

    let mut buffer = [0u8; HTTP_BUFFER_LEN];
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("HTTP accept failed: {}", e);
                continue;
            }
        };
        debug!("HTTP client {}", peer);

        match picoserve::serve_with_state(app, &SERVER_CONFIG, &mut buffer, stream, endpoint).await {
            Ok(handled) => debug!("{} requests handled from {}", handled, peer),
            Err(e) => debug!("HTTP connection from {} ended: {:?}", peer, e),
        }

        if let Some(bytes) = endpoint.updated() {
            info!("Received firmware image of {} bytes", bytes);
            return bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_buffer_accepts_complete_image() {
        let mut sink = ImageBuffer::default();

        assert_eq!(sink.begin(6), Ok(()));
        assert_eq!(sink.write(0, b"\xE9\x01\x02"), Ok(()));
        assert_eq!(sink.write(3, b"\x03\x04\x05"), Ok(()));
        assert_eq!(sink.finish(), Ok(()));
    }

    #[test]
    fn test_image_buffer_rejects_gaps_and_short_images() {
        let mut sink = ImageBuffer::default();
        sink.begin(6).unwrap();

        assert_eq!(sink.write(2, b"\xE9"), Err("chunk out of order"));
        sink.write(0, b"\xE9\x01").unwrap();
        assert_eq!(sink.finish(), Err("image incomplete"));
    }
}

//! Firmware update endpoint
//!
//! A [`picoserve`] router with one route: `GET <path>` serves an upload page
//! that posts the selected file as the raw request body, `POST <path>`
//! streams that body into a [`FirmwareSink`]. Both require HTTP Basic
//! authentication. Other paths answer 404 and other methods 405.
//! `curl -u admin:<password> --data-binary @image.bin` works too.
//!
//! The platform owns the listening socket. It waits for
//! [`UpdateEndpoint::wait_opened`], serves [`router`] with the endpoint as
//! state, and restarts once [`UpdateEndpoint::updated`] reports an image.

use core::cell::Cell;
use core::fmt::Debug;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_io_async::Read;
use log::{debug, info, warn};
use picoserve::request::Request;
use picoserve::response::{File, IntoResponse, Response, ResponseWriter, StatusCode};
use picoserve::ResponseSent;
use picoserve::routing::{PathRouter, RequestHandlerService, get_service};
use thiserror_no_std::Error;

use crate::config::UpdateConfig;

/// Size of the chunks the body is read in.
pub const BODY_CHUNK_LEN: usize = 1024;
/// Longest decoded `user:password` pair accepted.
const MAX_CREDENTIALS_LEN: usize = 128;

const UPLOAD_FORM: &str = "<!DOCTYPE html><html><head><title>Battery Button</title></head><body>\
<h1>Firmware update</h1>\
<input type=\"file\" id=\"image\"> <button onclick=\"upload()\">Update</button>\
<p id=\"status\"></p>\
<script>function upload(){var f=document.getElementById('image').files[0];if(!f)return;\
var s=document.getElementById('status');s.textContent='Uploading...';\
fetch(location.pathname,{method:'POST',body:f}).then(r=>r.text()).then(t=>s.textContent=t)\
.catch(e=>s.textContent='Upload failed: '+e);}</script>\
</body></html>";

const UPDATE_SUCCESS: &str = "Update Success! Rebooting...";
const AUTHENTICATE: &str = "Basic realm=\"Login Required\"";

/// Side effects of update mode, run once per wake-cycle pass.
pub trait UpdateService {
    fn service(&mut self) -> impl Future<Output = ()>;
}

/// Destination of an uploaded firmware image.
pub trait FirmwareSink {
    type Error: Debug;

    /// Prepare for an image of `image_len` bytes.
    fn begin(&mut self, image_len: usize) -> Result<(), Self::Error>;

    fn write(&mut self, offset: usize, chunk: &[u8]) -> Result<(), Self::Error>;

    /// Validate and activate the image. The caller restarts afterwards.
    fn finish(&mut self) -> Result<(), Self::Error>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    #[error("an image was already installed")]
    AlreadyUpdated,
    #[error("connection error")]
    Connection,
    #[error("connection closed after {received} of {expected} body bytes")]
    BodyTruncated { received: usize, expected: usize },
    #[error("firmware image rejected")]
    Sink,
}

/// Check an `Authorization` header value against the configured credentials.
///
/// An empty configured password never authorizes.
pub fn is_authorized(authorization: Option<&str>, config: &UpdateConfig<'_>) -> bool {
    if config.password.is_empty() {
        return false;
    }
    let Some((scheme, token)) = authorization.and_then(|value| value.split_once(' ')) else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return false;
    }

    let mut decoded = [0u8; MAX_CREDENTIALS_LEN];
    let Ok(len) = STANDARD.decode_slice(token.trim(), &mut decoded) else {
        return false;
    };
    let Ok(pair) = core::str::from_utf8(&decoded[..len]) else {
        return false;
    };
    pair.split_once(':')
        .is_some_and(|(user, password)| user == config.username && password == config.password)
}

/// Stream `length` body bytes from `body` into `sink` and activate the image.
pub async fn receive_image<R, F>(
    body: &mut R,
    sink: &mut F,
    length: usize,
) -> Result<usize, UpdateError>
where
    R: Read,
    F: FirmwareSink,
{
    info!("Receiving firmware image of {} bytes", length);
    sink.begin(length).map_err(|e| {
        warn!("Firmware sink not ready: {:?}", e);
        UpdateError::Sink
    })?;

    let mut chunk = [0u8; BODY_CHUNK_LEN];
    let mut received = 0;
    while received < length {
        let want = (length - received).min(chunk.len());
        let n = body.read(&mut chunk[..want]).await.map_err(|e| {
            debug!("Upload read failed: {:?}", e);
            UpdateError::Connection
        })?;
        if n == 0 {
            warn!("Upload ended after {} of {} bytes", received, length);
            return Err(UpdateError::BodyTruncated {
                received,
                expected: length,
            });
        }
        sink.write(received, &chunk[..n]).map_err(|e| {
            warn!("Firmware write failed at offset {}: {:?}", received, e);
            UpdateError::Sink
        })?;
        received += n;
    }

    sink.finish().map_err(|e| {
        warn!("Firmware image not activated: {:?}", e);
        UpdateError::Sink
    })?;
    info!("Firmware image written ({} bytes)", received);
    Ok(received)
}

/// Router state shared by the update handlers and the platform's serve loop.
pub struct UpdateEndpoint<'a, F> {
    config: UpdateConfig<'a>,
    sink: Mutex<NoopRawMutex, F>,
    opened: Signal<NoopRawMutex, ()>,
    updated: Cell<Option<usize>>,
}

impl<'a, F: FirmwareSink> UpdateEndpoint<'a, F> {
    pub fn new(config: UpdateConfig<'a>, sink: F) -> Self {
        Self {
            config,
            sink: Mutex::new(sink),
            opened: Signal::new(),
            updated: Cell::new(None),
        }
    }

    pub fn config(&self) -> &UpdateConfig<'a> {
        &self.config
    }

    /// Ask the platform to start serving. Repeated calls are harmless.
    pub fn open(&self) {
        self.opened.signal(());
    }

    pub async fn wait_opened(&self) {
        self.opened.wait().await;
    }

    /// Size of the activated image, once one has been installed.
    pub fn updated(&self) -> Option<usize> {
        self.updated.get()
    }

    pub fn is_authorized(&self, authorization: Option<&str>) -> bool {
        is_authorized(authorization, &self.config)
    }

    /// Write one uploaded image into the sink. Only the first complete image
    /// is accepted; the node restarts right after it.
    pub async fn install<R: Read>(
        &self,
        body: &mut R,
        length: usize,
    ) -> Result<usize, UpdateError> {
        if self.updated.get().is_some() {
            return Err(UpdateError::AlreadyUpdated);
        }
        let mut sink = self.sink.lock().await;
        let bytes = receive_image(body, &mut *sink, length).await?;
        self.updated.set(Some(bytes));
        Ok(bytes)
    }
}

/// The wake cycle only opens the endpoint; the platform's serve loop does
/// the rest.
impl<F: FirmwareSink> UpdateService for &UpdateEndpoint<'_, F> {
    async fn service(&mut self) {
        self.open();
    }
}

/// `GET` handler serving the upload page.
pub struct UploadForm;

/// `POST` handler streaming the body into the firmware sink.
pub struct FirmwareUpload;

fn authorizes<F: FirmwareSink, R: Read>(
    endpoint: &UpdateEndpoint<'_, F>,
    request: &Request<'_, R>,
) -> bool {
    let header = request.parts.headers().get("Authorization");
    endpoint.is_authorized(header.as_ref().and_then(|value| value.as_str().ok()))
}

impl<F: FirmwareSink> RequestHandlerService<UpdateEndpoint<'_, F>> for UploadForm {
    async fn call_request_handler_service<R: Read, W: ResponseWriter<Error = R::Error>>(
        &self,
        endpoint: &UpdateEndpoint<'_, F>,
        _path_parameters: (),
        request: Request<'_, R>,
        response_writer: W,
    ) -> Result<ResponseSent, W::Error> {
        let authorized = authorizes(endpoint, &request);
        if !authorized {
            let connection = request.body_connection.finalize().await?;
            debug!("Upload form requested without valid credentials");
            return Response::new(StatusCode::UNAUTHORIZED, "Unauthorized")
                .with_header("WWW-Authenticate", AUTHENTICATE)
                .write_to(connection, response_writer)
                .await;
        }
        File::html(UPLOAD_FORM)
            .call_request_handler_service(endpoint, (), request, response_writer)
            .await
    }
}

impl<F: FirmwareSink> RequestHandlerService<UpdateEndpoint<'_, F>> for FirmwareUpload {
    async fn call_request_handler_service<R: Read, W: ResponseWriter<Error = R::Error>>(
        &self,
        endpoint: &UpdateEndpoint<'_, F>,
        _path_parameters: (),
        mut request: Request<'_, R>,
        response_writer: W,
    ) -> Result<ResponseSent, W::Error> {
        if !authorizes(endpoint, &request) {
            debug!("Upload without valid credentials");
            let connection = request.body_connection.finalize().await?;
            return Response::new(StatusCode::UNAUTHORIZED, "Unauthorized")
                .with_header("WWW-Authenticate", AUTHENTICATE)
                .write_to(connection, response_writer)
                .await;
        }

        let length = request.body_connection.content_length();
        if length == 0 {
            let connection = request.body_connection.finalize().await?;
            return Response::new(StatusCode::new(411), "Length Required")
                .write_to(connection, response_writer)
                .await;
        }

        let result = {
            let mut body = request.body_connection.body().reader();
            endpoint.install(&mut body, length).await
        };
        let (status, message) = match result {
            Ok(_) => (StatusCode::OK, UPDATE_SUCCESS),
            Err(e @ (UpdateError::BodyTruncated { .. } | UpdateError::Connection)) => {
                debug!("Upload aborted: {}", e);
                (StatusCode::BAD_REQUEST, "Upload incomplete")
            }
            Err(e) => {
                debug!("Upload refused: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Update failed")
            }
        };
        let connection = request.body_connection.finalize().await?;
        Response::new(status, message)
            .write_to(connection, response_writer)
            .await
    }
}

/// The update router: the upload form and the upload itself on `path`.
pub fn router<'a, F: FirmwareSink>(
    path: &'static str,
) -> picoserve::Router<impl PathRouter<UpdateEndpoint<'a, F>>, UpdateEndpoint<'a, F>> {
    picoserve::Router::new().route(path, get_service(UploadForm).post_service(FirmwareUpload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChunkedBody, MemorySink};
    use embassy_futures::block_on;

    // "admin:BigButt"
    const AUTH: &str = "Basic YWRtaW46QmlnQnV0dA==";

    fn config() -> UpdateConfig<'static> {
        UpdateConfig {
            password: "BigButt",
            ..UpdateConfig::default()
        }
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_basic_auth() {
        assert!(is_authorized(Some(AUTH), &config()));
        assert!(is_authorized(Some("basic YWRtaW46QmlnQnV0dA=="), &config()));
        // "admin:wrong"
        assert!(!is_authorized(Some("Basic YWRtaW46d3Jvbmc="), &config()));
        assert!(!is_authorized(Some("Bearer YWRtaW46QmlnQnV0dA=="), &config()));
        assert!(!is_authorized(Some("Basic !!!"), &config()));
        assert!(!is_authorized(None, &config()));

        // No configured password disables the endpoint
        assert!(!is_authorized(Some(AUTH), &UpdateConfig::default()));
    }

    #[test]
    fn test_image_streams_into_sink() {
        let image = image(3000);
        let mut body = ChunkedBody::new(&image);
        let mut sink = MemorySink::default();

        let result = block_on(receive_image(&mut body, &mut sink, image.len()));

        assert_eq!(result, Ok(3000));
        assert_eq!(sink.expected_len, Some(3000));
        assert_eq!(sink.image, image);
        assert!(sink.finished);
    }

    #[test]
    fn test_truncated_upload_is_not_activated() {
        let mut body = ChunkedBody::new(&[0xE9; 40]);
        let mut sink = MemorySink::default();

        let result = block_on(receive_image(&mut body, &mut sink, 100));

        assert_eq!(
            result,
            Err(UpdateError::BodyTruncated {
                received: 40,
                expected: 100
            })
        );
        assert!(sink.began);
        assert!(!sink.finished);
    }

    #[test]
    fn test_rejected_image_is_reported() {
        let mut body = ChunkedBody::new(b"\xE9\x00\x00\x00");
        let mut sink = MemorySink {
            reject_finish: true,
            ..MemorySink::default()
        };

        let result = block_on(receive_image(&mut body, &mut sink, 4));

        assert_eq!(result, Err(UpdateError::Sink));
        assert_eq!(sink.image.len(), 4);
    }

    #[test]
    fn test_endpoint_installs_one_image() {
        let endpoint = UpdateEndpoint::new(config(), MemorySink::default());
        assert_eq!(endpoint.updated(), None);

        let first = image(1500);
        let result = block_on(endpoint.install(&mut ChunkedBody::new(&first), first.len()));
        assert_eq!(result, Ok(1500));
        assert_eq!(endpoint.updated(), Some(1500));

        let again = block_on(endpoint.install(&mut ChunkedBody::new(&first), first.len()));
        assert_eq!(again, Err(UpdateError::AlreadyUpdated));
        assert_eq!(endpoint.updated(), Some(1500));
    }

    #[test]
    fn test_failed_install_leaves_endpoint_open() {
        let endpoint = UpdateEndpoint::new(config(), MemorySink::default());

        let short = block_on(endpoint.install(&mut ChunkedBody::new(&[0xE9; 10]), 20));
        assert!(matches!(short, Err(UpdateError::BodyTruncated { .. })));
        assert_eq!(endpoint.updated(), None);
    }

    #[test]
    fn test_servicing_opens_endpoint() {
        let endpoint = UpdateEndpoint::new(config(), MemorySink::default());
        let mut service = &endpoint;

        block_on(service.service());
        block_on(service.service());

        block_on(endpoint.wait_opened());
        assert_eq!(endpoint.updated(), None);
    }

    #[test]
    fn test_router_builds_for_configured_path() {
        let _app = router::<MemorySink>("/firmware");
        let endpoint = UpdateEndpoint::new(config(), MemorySink::default());
        assert_eq!(endpoint.config().path, "/firmware");
        assert!(endpoint.is_authorized(Some(AUTH)));
    }
}

//! Session handling: decode one inbound session, execute its commands, arm its monitors.
//!
//! The handler holds no per-session state; every collaborator is passed in at construction
//! and shared between concurrent sessions.

use alloc::sync::Arc;

use autobridge_common::{DeviceRequest, ServiceRequest};
use tracing::{debug, info, warn};

use crate::{
    decoder::{RawSession, RequestDecoder},
    error::{MonitorError, RouterError},
    monitor::MonitorEngine,
    notifier::Notifier,
    registry::DeviceRegistry,
    router::{Ack, CommandRouter},
    sampler::{AmplitudeSource, full_scale_decibels},
};

/// Path of the route returning notifications queued for polling.
pub const NOTIFICATIONS_PATH: &str = "/notifications";

/// Literal body of an accepted session.
pub const ACCEPTED_BODY: &str = "OK";

/// Response written back to the session's peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    const fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            _ => "Internal Server Error",
        }
    }

    /// Serializes the response as a complete HTTP/1.1 message; the connection closes after it.
    pub fn render(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// Outcome of one `DeviceRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub device_id: String,
    /// Set when the device is not registered; nothing else ran for this entry.
    pub error: Option<RouterError>,
    /// One result per command, in request order.
    pub commands: Vec<Result<Ack, RouterError>>,
    /// One result per monitor, in request order.
    pub monitors: Vec<Result<(), MonitorError>>,
}

impl DeviceReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self.commands.iter().all(Result::is_ok)
            && self.monitors.iter().all(Result::is_ok)
    }
}

/// Per-device outcomes of a decoded session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub devices: Vec<DeviceReport>,
}

/// Stateless per-session handler.
#[derive(Clone)]
pub struct SessionHandler {
    decoder: Arc<RequestDecoder>,
    router: CommandRouter,
    engine: Arc<MonitorEngine>,
    notifier: Arc<Notifier>,
    registry: Arc<DeviceRegistry>,
    amplitude: Option<Arc<dyn AmplitudeSource>>,
}

impl SessionHandler {
    pub fn new(
        decoder: Arc<RequestDecoder>,
        registry: Arc<DeviceRegistry>,
        engine: Arc<MonitorEngine>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            decoder,
            router: CommandRouter::new(Arc::clone(&registry)),
            engine,
            notifier,
            registry,
            amplitude: None,
        }
    }

    /// Source of the informational full-scale loudness figure logged per session.
    #[must_use]
    pub fn with_amplitude_source(mut self, amplitude: Arc<dyn AmplitudeSource>) -> Self {
        self.amplitude = Some(amplitude);
        self
    }

    /// Handles one session's raw bytes and produces the response to send back.
    pub async fn handle(&self, raw: &[u8]) -> Response {
        let session = RawSession::parse(raw);
        if session.route() == Some(("GET", NOTIFICATIONS_PATH)) {
            return self.poll_notifications().await;
        }

        if let Some(dbfs) = self
            .amplitude
            .as_ref()
            .and_then(|source| source.current_peak_amplitude())
            .and_then(full_scale_decibels)
        {
            debug!("Current peak level: {dbfs:.1} dBFS");
        }

        match self.decoder.decode_session(&session) {
            Ok(request) => {
                let report = self.process(&request).await;
                let failed = report.devices.iter().filter(|d| !d.is_success()).count();
                info!(
                    "Processed {} device request(s), {failed} with failures",
                    report.devices.len()
                );
                Response::text(200, ACCEPTED_BODY)
            }
            Err(e) => {
                warn!("Rejected session: {e}");
                Response::text(400, format!("ERROR: {e}"))
            }
        }
    }

    /// Executes every `DeviceRequest` of a decoded request. One entry's failures never stop
    /// its siblings.
    pub async fn process(&self, request: &ServiceRequest) -> SessionReport {
        let mut devices = Vec::with_capacity(request.device_requests.len());
        for device_request in &request.device_requests {
            devices.push(
                self.process_device(device_request, request.response_url.as_deref())
                    .await,
            );
        }
        SessionReport { devices }
    }

    async fn process_device(
        &self,
        request: &DeviceRequest,
        response_url: Option<&str>,
    ) -> DeviceReport {
        let device_id = &request.device_id;
        if self.registry.get(device_id).is_none() {
            let error = RouterError::UnknownDevice(device_id.clone());
            warn!("{error}");
            return DeviceReport {
                device_id: device_id.clone(),
                error: Some(error),
                commands: Vec::new(),
                monitors: Vec::new(),
            };
        }

        // Handlers run before any monitor lock is taken.
        let commands = self
            .router
            .execute_all(device_id, &request.commands_to_execute);

        let mut monitors = Vec::with_capacity(request.properties_to_monitor.len());
        for spec in &request.properties_to_monitor {
            let result = self.engine.arm(device_id, spec, response_url).await;
            if let Err(ref e) = result {
                warn!("{e}");
            }
            monitors.push(result);
        }

        DeviceReport {
            device_id: device_id.clone(),
            error: None,
            commands,
            monitors,
        }
    }

    async fn poll_notifications(&self) -> Response {
        let pending = self.notifier.drain().await;
        debug!("Returning {} queued notification(s)", pending.len());
        match serde_json::to_string(&pending) {
            Ok(body) => Response {
                status: 200,
                content_type: "application/json",
                body,
            },
            Err(e) => {
                warn!("Failed to serialize notifications: {e}");
                Response::text(500, format!("ERROR: {e}"))
            }
        }
    }
}

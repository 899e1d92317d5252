//! Server module: assembles the agent from its config and serves control sessions over TCP.

use alloc::sync::Arc;
use core::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use std::{
    io,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::de::IgnoredAny;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
    signal,
    time::timeout,
};
use tracing::{Instrument as _, debug, error, info, info_span, warn};

use crate::{
    LogFormat,
    config::{self, AgentConfig, DeviceConfig, PropertyConfig},
    decoder::{RequestDecoder, find_head_end},
    handler::SessionHandler,
    monitor::MonitorEngine,
    notifier::Notifier,
    registry::{Device, DeviceRegistry, SET_COMMAND, SetHandler},
    runtime::run_sampling_loop,
    sampler::{AmplitudeSource, ConfiguredSampler, FileAmplitude, PropertySource},
    speech::QueuedSpeech,
};

/// Largest session accepted; anything beyond is cut off.
const MAX_SESSION_BYTES: usize = 64 * 1024;

/// How long a peer may stay silent before its session is processed as-is.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration options for running the agent service.
#[derive(Debug, Parser, Clone)]
pub struct ServiceOptions {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "autobridge.toml", env = "AUTOBRIDGE_CONFIG")]
    pub config: PathBuf,

    /// Optional override for the listen port (overrides port in config).
    #[arg(long)]
    pub port: Option<u16>,

    /// Optional override for the bind address (overrides bind in config).
    #[arg(long)]
    pub bind: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Everything a running agent shares between the listener and the sampling loop.
pub struct AgentState {
    pub config: AgentConfig,
    pub handler: SessionHandler,
    pub registry: Arc<DeviceRegistry>,
    pub engine: Arc<MonitorEngine>,
    pub notifier: Arc<Notifier>,
    /// Holds pushed values of `manual` properties, fed through each sensor's `set` command.
    pub sampler: Arc<ConfiguredSampler>,
}

/// Builds the device registry and its collaborators from `config`.
///
/// Speech workers are spawned onto the current runtime.
///
/// # Errors
///
/// Returns an error if a device is declared twice or the HTTP client cannot be built.
pub fn initialize_state(config: AgentConfig) -> eyre::Result<AgentState> {
    let mut sampler = ConfiguredSampler::new();
    let mut amplitude: Option<Arc<dyn AmplitudeSource>> = None;
    for (device_id, device) in &config.devices {
        let DeviceConfig::Sensor { ref properties } = *device else {
            continue;
        };
        for (property, source) in properties {
            let source = match *source {
                PropertyConfig::File { ref path, scale } => PropertySource::File {
                    path: PathBuf::from(path),
                    scale,
                },
                PropertyConfig::AmplitudeFile { ref path } => {
                    let source: Arc<dyn AmplitudeSource> = Arc::new(FileAmplitude {
                        path: PathBuf::from(path),
                    });
                    amplitude.get_or_insert_with(|| Arc::clone(&source));
                    PropertySource::SoundLevel(source)
                }
                PropertyConfig::Manual => PropertySource::Manual,
            };
            sampler.add_source(device_id, property, source);
        }
    }
    let sampler = Arc::new(sampler);

    let mut registry = DeviceRegistry::new();
    for (device_id, device) in &config.devices {
        let device = match *device {
            DeviceConfig::Speech { ref command } => {
                let speech = Arc::new(QueuedSpeech::spawn(command.clone()));
                Device::speech_actuator(device_id.clone(), speech)
            }
            DeviceConfig::Sensor { ref properties } => {
                let sensor =
                    Device::sensor(device_id.clone(), properties.keys().cloned(), sampler.clone());
                if sampler.manual_properties(device_id).is_empty() {
                    sensor
                } else {
                    let set = SetHandler::new(device_id.clone(), Arc::clone(&sampler));
                    sensor.with_command(SET_COMMAND, Arc::new(set))
                }
            }
        };
        debug!("Registering device {device:?}");
        let kind = device.kind();
        registry.register(device)?;
        info!("Registered {kind:?} '{device_id}'");
    }
    if registry.is_empty() {
        warn!("No devices configured; every device request will be rejected");
    }
    if registry.get(&config.server.default_device).is_none() {
        warn!(
            "Default device '{}' is not configured; legacy requests will be rejected per device",
            config.server.default_device
        );
    }
    info!("Registered {} device(s)", registry.len());

    let registry = Arc::new(registry);
    let engine = Arc::new(
        MonitorEngine::new(&registry).with_monitor_limit(config.server.max_monitors_per_device),
    );
    let notifier = Arc::new(Notifier::new(
        Duration::from_millis(config.server.notification_timeout_ms),
        config.server.pending_notification_limit,
    )?);
    let decoder = Arc::new(RequestDecoder::new(config.server.default_device.clone()));
    let mut handler = SessionHandler::new(
        decoder,
        Arc::clone(&registry),
        Arc::clone(&engine),
        Arc::clone(&notifier),
    );
    if let Some(amplitude) = amplitude {
        handler = handler.with_amplitude_source(amplitude);
    }

    Ok(AgentState {
        config,
        handler,
        registry,
        engine,
        notifier,
        sampler,
    })
}

/// Creates a future that resolves when a shutdown signal is received.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                error!("Failed to create SIGTERM signal handler: {e}");
                drop(signal::ctrl_c().await);
            }
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Serves sessions from `listener` until a shutdown signal arrives.
///
/// Each session runs on its own task; a failing session never stops the listener.
pub async fn serve(listener: TcpListener, handler: SessionHandler) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handler = handler.clone();
                    tokio::spawn(
                        handle_connection(stream, handler).instrument(info_span!("session", %peer)),
                    );
                }
                Err(e) => warn!("Connection failed: {e}"),
            },
            () = &mut shutdown => {
                info!("Received shutdown, shutting down");
                break;
            }
        }
    }
}

/// Loads the config, starts the sampling loop and serves the control endpoint.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the devices cannot be assembled,
/// or the listener cannot bind.
pub async fn start(
    config_path: &Path,
    port_override: Option<u16>,
    bind_override: Option<&str>,
) -> eyre::Result<()> {
    let config = config::load(config_path).await?;
    let state = initialize_state(config)?;

    let listen_port = port_override.unwrap_or(state.config.server.port);
    let listen_ip: IpAddr = bind_override
        .unwrap_or(&state.config.server.bind)
        .parse()?;
    let addr = SocketAddr::from((listen_ip, listen_port));

    tokio::spawn(
        run_sampling_loop(
            state.sampler.clone(),
            Arc::clone(&state.engine),
            Arc::clone(&state.notifier),
            Duration::from_millis(state.config.server.sample_interval_ms.max(1)),
        )
        .in_current_span(),
    );

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {addr}");
    serve(listener, state.handler).await;
    Ok(())
}

/// Reads one session, answers it, and closes the connection.
async fn handle_connection(mut stream: TcpStream, handler: SessionHandler) {
    let raw = match read_session(&mut stream).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read from stream: {e}");
            return;
        }
    };
    if raw.is_empty() {
        debug!("Peer closed without sending a session");
        return;
    }
    debug!("Read {} byte(s)", raw.len());
    let response = handler.handle(&raw).await;
    if let Err(e) = stream.write_all(&response.render()).await {
        warn!("Failed to write response to stream: {e}");
        return;
    }
    if let Err(e) = stream.shutdown().await {
        debug!("Failed to close stream: {e}");
    }
}

/// Reads until the session is complete, the peer closes, or the peer goes quiet.
async fn read_session(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    while !session_complete(&raw) && raw.len() < MAX_SESSION_BYTES {
        match timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => raw.extend_from_slice(chunk.get(..n).unwrap_or_default()),
            Ok(Err(e)) => return Err(e),
            Err(_) if raw.is_empty() => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data received"));
            }
            Err(_) => break,
        }
    }
    raw.truncate(MAX_SESSION_BYTES);
    Ok(raw)
}

/// Whether `raw` holds a full session: a complete bare JSON document, or an HTTP head plus
/// as many body bytes as its `Content-Length` announces.
fn session_complete(raw: &[u8]) -> bool {
    let trimmed = raw.trim_ascii_start();
    if trimmed.starts_with(b"{") {
        return serde_json::from_slice::<IgnoredAny>(trimmed).is_ok();
    }
    let Some((head_len, body_start)) = find_head_end(raw) else {
        return false;
    };
    let head = String::from_utf8_lossy(raw.get(..head_len).unwrap_or_default());
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|&(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    raw.len().saturating_sub(body_start) >= content_length
}

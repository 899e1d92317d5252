//! Agent configuration: listener settings and the devices to expose.

use std::{collections::BTreeMap, path::Path};

use autobridge_common::DEFAULT_PORT;
use eyre::WrapErr as _;
use serde::Deserialize;
use tokio::fs;

use crate::monitor::DEFAULT_MONITOR_LIMIT;

/// Top-level configuration file.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Devices keyed by device ID.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

/// Listener and runtime settings. Every key has a default.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Device addressed by the legacy request forms.
    #[serde(default = "default_device")]
    pub default_device: String,
    /// Cadence of the monitor sampling loop.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Upper bound for a single notification callback.
    #[serde(default = "default_notification_timeout_ms")]
    pub notification_timeout_ms: u64,
    /// Notifications kept for polling when a request carried no callback.
    #[serde(default = "default_pending_notification_limit")]
    pub pending_notification_limit: usize,
    /// Monitors one device may hold; arming beyond it fails for that entry.
    #[serde(default = "default_max_monitors_per_device")]
    pub max_monitors_per_device: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            default_device: default_device(),
            sample_interval_ms: default_sample_interval_ms(),
            notification_timeout_ms: default_notification_timeout_ms(),
            pending_notification_limit: default_pending_notification_limit(),
            max_monitors_per_device: default_max_monitors_per_device(),
        }
    }
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_device() -> String {
    "speechSynthesizer".to_string()
}

const fn default_sample_interval_ms() -> u64 {
    250
}

const fn default_notification_timeout_ms() -> u64 {
    2000
}

const fn default_pending_notification_limit() -> usize {
    256
}

const fn default_max_monitors_per_device() -> usize {
    DEFAULT_MONITOR_LIMIT
}

/// A configured device.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceConfig {
    /// Speaks text through an external command, run via `sh -c` with the text as `$1`.
    Speech { command: String },
    Sensor {
        #[serde(default)]
        properties: BTreeMap<String, PropertyConfig>,
    },
}

/// Where a sensor property's value comes from.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PropertyConfig {
    /// A file holding a single number, such as a sysfs sensor node.
    File {
        path: String,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// A file holding the current peak microphone amplitude, reported as a sound level.
    AmplitudeFile { path: String },
    /// Values pushed through the sensor's `set` command.
    Manual,
}

const fn default_scale() -> f64 {
    1.0
}

/// Reads and parses the agent config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<AgentConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: AgentConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}

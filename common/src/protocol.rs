//! Protocol types for caller-to-agent communication.
//!
//! Field names are camelCase on the wire (`deviceID` keeps its capitalised suffix).
//! Both directions use serde, so the same types decode requests and build them in clients and
//! tests.

use serde::{Deserialize, Serialize};

/// Top-level document of a structured control session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    /// Callback target for monitor notifications; absent means notifications are queued for
    /// polling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
    pub device_requests: Vec<DeviceRequest>,
}

impl ServiceRequest {
    /// Wraps a single command for one device, without a callback target.
    pub fn single_command(device_id: impl Into<String>, command: DeviceCommand) -> Self {
        Self {
            response_url: None,
            device_requests: vec![DeviceRequest {
                device_id: device_id.into(),
                commands_to_execute: vec![command],
                properties_to_monitor: Vec::new(),
            }],
        }
    }
}

/// Work addressed to a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(default)]
    pub commands_to_execute: Vec<DeviceCommand>,
    #[serde(default)]
    pub properties_to_monitor: Vec<MonitorSpec>,
}

/// A named command invocation with positional string arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl DeviceCommand {
    /// Builds the single-argument `speak` command the legacy encodings map to.
    pub fn speak(message: impl Into<String>) -> Self {
        Self {
            name: crate::SPEAK_COMMAND.to_owned(),
            arguments: vec![message.into()],
        }
    }
}

/// One entry of `propertiesToMonitor`.
///
/// A bare string names a property to report on every change; objects carry a full monitor
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MonitorSpec {
    Property(String),
    Derived(DerivedPropertyMonitor),
    Threshold(PropertyMonitor),
}

impl MonitorSpec {
    /// The property this monitor watches.
    pub fn property_name(&self) -> &str {
        match *self {
            Self::Property(ref name) => name,
            Self::Derived(ref monitor) => &monitor.name,
            Self::Threshold(ref monitor) => &monitor.name,
        }
    }
}

/// Reports a property when it moved far enough from the last reported value.
///
/// A threshold of `0` disables that criterion; at least one must be enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PropertyMonitor {
    pub name: String,
    /// Absolute delta that triggers a report.
    #[serde(default)]
    pub report_changed_by_value: f64,
    /// Relative delta, as a fraction of the last reported value, that triggers a report.
    #[serde(default)]
    pub report_changed_by_percent: f64,
}

/// Reports a property based on a comparison or on accumulated change over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DerivedPropertyMonitor {
    pub name: String,
    pub derived_property_type: DerivedPropertyType,
    /// Comparison reference for the `*ThanValue` types, change threshold for the
    /// `*OverDuration` types.
    pub derived_from_value: f64,
    /// Hold-off after a comparison report, or the window length of a change-over-duration.
    /// Fractions of a millisecond round up.
    pub change_duration_milliseconds: f64,
}

/// Comparison applied by a [`DerivedPropertyMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivedPropertyType {
    GreaterThanValue,
    LessThanValue,
    ChangeByPercentageOverDuration,
    ChangeByValueOverDuration,
}

/// Body posted to a `responseUrl` (or returned from the poll route) when a monitor triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub property_name: String,
    pub old_value: f64,
    pub new_value: f64,
    /// Milliseconds since the Unix epoch at which the triggering sample was taken.
    pub timestamp: i64,
}

//! Error taxonomy of the control endpoint.
//!
//! Each stage of a session has its own error type, so a failure can be reported
//! against the request entry that caused it without aborting its siblings.

use thiserror::Error as ThisError;

/// Inbound bytes could not be turned into a `ServiceRequest`.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum DecodeError {
    /// A structured document was present but violates the request schema.
    #[error("Malformed request: {0}")]
    Malformed(String),
    /// Neither the structured form nor a legacy form was recognised.
    #[error("Unrecognized request")]
    Unrecognized,
}

/// A command could not be executed against a device.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RouterError {
    #[error("Unknown device '{0}'")]
    UnknownDevice(String),
    #[error("Unknown command '{command}' for device '{device_id}'")]
    UnknownCommand { device_id: String, command: String },
    #[error("Bad arguments for '{command}': {reason}")]
    BadArguments { command: String, reason: String },
    #[error("Command '{command}' failed: {reason}")]
    HandlerFailure { command: String, reason: String },
}

/// A monitor could not be armed.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum MonitorError {
    #[error("Device '{device_id}' has no property '{property}'")]
    UnknownProperty { device_id: String, property: String },
    #[error("Invalid threshold for property '{property}': {reason}")]
    InvalidThreshold { property: String, reason: String },
    #[error("Device '{device_id}' already has {limit} monitors armed")]
    TooManyMonitors { device_id: String, limit: usize },
}

/// The registry could not be assembled at startup.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RegistryError {
    #[error("Device '{0}' is registered twice")]
    DuplicateDevice(String),
}

/// Failure reported by a command handler; the router attaches the command name.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum HandlerError {
    /// Arguments passed the signature check but were rejected by the handler itself.
    #[error("{0}")]
    BadArguments(String),
    #[error("{0}")]
    Failed(String),
}

//! Command routing: resolves a device and command, checks arguments, and invokes the handler.

use alloc::sync::Arc;

use autobridge_common::DeviceCommand;
use tracing::{debug, info, warn};

use crate::{
    error::{HandlerError, RouterError},
    registry::{ArgKind, Device, DeviceRegistry},
};

/// Successful command execution, with the value produced by the handler if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub command: String,
    pub value: Option<String>,
}

/// Dispatches decoded commands to registered devices.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    registry: Arc<DeviceRegistry>,
}

impl CommandRouter {
    pub const fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Executes a single command synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the device or command is unknown, the arguments do not match
    /// the handler's signature, or the handler fails.
    pub fn execute(&self, device_id: &str, command: &DeviceCommand) -> Result<Ack, RouterError> {
        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| RouterError::UnknownDevice(device_id.to_string()))?;
        let handler = device
            .command(&command.name)
            .ok_or_else(|| RouterError::UnknownCommand {
                device_id: device_id.to_string(),
                command: command.name.clone(),
            })?;

        check_arguments(device, handler.signature(), &command.arguments).map_err(|reason| {
            RouterError::BadArguments {
                command: command.name.clone(),
                reason,
            }
        })?;

        debug!("Invoking '{}' on '{device_id}'", command.name);
        let value = handler.invoke(&command.arguments).map_err(|e| match e {
            HandlerError::BadArguments(reason) => RouterError::BadArguments {
                command: command.name.clone(),
                reason,
            },
            HandlerError::Failed(reason) => RouterError::HandlerFailure {
                command: command.name.clone(),
                reason,
            },
        })?;
        Ok(Ack {
            command: command.name.clone(),
            value,
        })
    }

    /// Executes `commands` in order; a failing command does not stop the ones after it.
    pub fn execute_all(
        &self,
        device_id: &str,
        commands: &[DeviceCommand],
    ) -> Vec<Result<Ack, RouterError>> {
        commands
            .iter()
            .map(|command| {
                let result = self.execute(device_id, command);
                match result {
                    Ok(ref ack) => info!("Executed '{}' on '{device_id}'", ack.command),
                    Err(ref e) => warn!("{e}"),
                }
                result
            })
            .collect()
    }
}

/// Validates positional arguments against a handler signature.
fn check_arguments(
    device: &Device,
    signature: &[ArgKind],
    arguments: &[String],
) -> Result<(), String> {
    if signature.len() != arguments.len() {
        return Err(format!(
            "expected {} argument(s), got {}",
            signature.len(),
            arguments.len()
        ));
    }
    for (position, (kind, argument)) in signature.iter().zip(arguments).enumerate() {
        match *kind {
            ArgKind::Text => {}
            ArgKind::Number => {
                let parsed = argument.trim().parse::<f64>();
                if !parsed.is_ok_and(f64::is_finite) {
                    return Err(format!("argument {position} is not a number: '{argument}'"));
                }
            }
            ArgKind::Property => {
                if !device.has_property(argument) {
                    return Err(format!(
                        "argument {position} is not a property of '{}': '{argument}'",
                        device.id()
                    ));
                }
            }
        }
    }
    Ok(())
}

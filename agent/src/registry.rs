//! Device registry: the static set of addressable devices and their capabilities.
//!
//! The registry is assembled once at startup and shared read-only afterwards.

use alloc::sync::Arc;
use std::collections::{BTreeSet, HashMap};

use autobridge_common::SPEAK_COMMAND;

use crate::{
    error::{HandlerError, RegistryError},
    sampler::{ConfiguredSampler, PropertySampler},
    speech::SpeechHandler,
};

/// Command that returns the current value of a sensor property.
pub const READ_COMMAND: &str = "read";

/// Command that pushes a value for a manually fed sensor property.
pub const SET_COMMAND: &str = "set";

/// Kind of a positional command argument, checked before a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Any text.
    Text,
    /// A decimal number.
    Number,
    /// The name of a property exposed by the same device.
    Property,
}

/// A named command a device can execute.
pub trait CommandHandler: Send + Sync {
    /// Argument kinds, one per expected positional argument.
    fn signature(&self) -> &[ArgKind];

    /// Runs the command; the returned value is carried back in the acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the arguments or fails to act.
    fn invoke(&self, arguments: &[String]) -> Result<Option<String>, HandlerError>;
}

/// Capability family of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    SpeechActuator,
    Sensor,
}

/// An addressable unit with invocable commands and readable properties.
pub struct Device {
    id: String,
    kind: DeviceKind,
    commands: HashMap<String, Arc<dyn CommandHandler>>,
    properties: BTreeSet<String>,
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("commands", &self.commands.keys().collect::<BTreeSet<_>>())
            .field("properties", &self.properties)
            .finish()
    }
}

impl Device {
    /// A device that speaks the text passed to its `speak` command.
    pub fn speech_actuator(id: impl Into<String>, speech: Arc<dyn SpeechHandler>) -> Self {
        let mut commands: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
        commands.insert(SPEAK_COMMAND.to_string(), Arc::new(SpeakHandler { speech }));
        Self {
            id: id.into(),
            kind: DeviceKind::SpeechActuator,
            commands,
            properties: BTreeSet::new(),
        }
    }

    /// A device exposing sampled properties, readable through its `read` command.
    pub fn sensor<I, S>(
        id: impl Into<String>,
        properties: I,
        sampler: Arc<dyn PropertySampler>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let mut commands: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
        commands.insert(
            READ_COMMAND.to_string(),
            Arc::new(ReadHandler {
                device_id: id.clone(),
                sampler,
            }),
        );
        Self {
            id,
            kind: DeviceKind::Sensor,
            commands,
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds or replaces a command handler.
    #[must_use]
    pub fn with_command(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        self.commands.insert(name.into(), handler);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn command(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.commands.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(String::as_str)
    }
}

/// Devices keyed by ID.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device.
    ///
    /// # Errors
    ///
    /// Returns an error if a device with the same ID is already registered.
    pub fn register(&mut self, device: Device) -> Result<(), RegistryError> {
        if self.devices.contains_key(device.id()) {
            return Err(RegistryError::DuplicateDevice(device.id.clone()));
        }
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

struct SpeakHandler {
    speech: Arc<dyn SpeechHandler>,
}

impl CommandHandler for SpeakHandler {
    fn signature(&self) -> &[ArgKind] {
        &[ArgKind::Text]
    }

    fn invoke(&self, arguments: &[String]) -> Result<Option<String>, HandlerError> {
        let [text] = arguments else {
            return Err(HandlerError::BadArguments("expected the text to speak".to_string()));
        };
        self.speech
            .speak(text)
            .map_err(|e| HandlerError::Failed(e.to_string()))?;
        Ok(Some(text.clone()))
    }
}

struct ReadHandler {
    device_id: String,
    sampler: Arc<dyn PropertySampler>,
}

impl CommandHandler for ReadHandler {
    fn signature(&self) -> &[ArgKind] {
        &[ArgKind::Property]
    }

    fn invoke(&self, arguments: &[String]) -> Result<Option<String>, HandlerError> {
        let [property] = arguments else {
            return Err(HandlerError::BadArguments("expected a property name".to_string()));
        };
        self.sampler
            .current_value(&self.device_id, property)
            .map(|value| Some(value.to_string()))
            .ok_or_else(|| HandlerError::Failed(format!("No sample available for '{property}'")))
    }
}

/// Stores the value of a `manual` property, to be sampled like any other source.
pub struct SetHandler {
    device_id: String,
    sampler: Arc<ConfiguredSampler>,
}

impl SetHandler {
    pub fn new(device_id: impl Into<String>, sampler: Arc<ConfiguredSampler>) -> Self {
        Self {
            device_id: device_id.into(),
            sampler,
        }
    }
}

impl CommandHandler for SetHandler {
    fn signature(&self) -> &[ArgKind] {
        &[ArgKind::Property, ArgKind::Number]
    }

    fn invoke(&self, arguments: &[String]) -> Result<Option<String>, HandlerError> {
        let [property, value] = arguments else {
            return Err(HandlerError::BadArguments(
                "expected a property name and a value".to_string(),
            ));
        };
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| HandlerError::BadArguments(format!("'{value}' is not a number")))?;
        if !self.sampler.record(&self.device_id, property, value) {
            return Err(HandlerError::BadArguments(format!(
                "'{property}' does not accept pushed values"
            )));
        }
        Ok(Some(value.to_string()))
    }
}

//! Property sampling: where the current value of a device property comes from.
//!
//! Acquisition itself belongs to the platform (sysfs nodes, audio capture, a host application
//! pushing values); the agent only pulls the latest scalar through [`PropertySampler`].

use alloc::sync::Arc;
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use tracing::debug;

/// Peak amplitude that maps to the reference sound pressure in [`sound_pressure_level`].
const AMPLITUDE_PER_PASCAL: f64 = 51_805.533_6;
/// Reference sound pressure (20 µPa) for dB SPL.
const REFERENCE_PRESSURE: f64 = 0.000_02;
/// Full-scale value of a signed 16 bit sample.
const FULL_SCALE_AMPLITUDE: f64 = 32_767.0;

/// Pull source for the current value of device properties.
///
/// Implementations may block on IO.
pub trait PropertySampler: Send + Sync {
    /// Latest value of `property` on `device_id`, or `None` when it is not available.
    fn current_value(&self, device_id: &str, property: &str) -> Option<f64>;
}

/// Source of the current peak microphone amplitude.
pub trait AmplitudeSource: Send + Sync {
    fn current_peak_amplitude(&self) -> Option<f64>;
}

/// Converts a peak amplitude into a rounded sound pressure level in dB.
///
/// Returns `None` for silence, which has no finite level.
pub fn sound_pressure_level(amplitude: f64) -> Option<f64> {
    (amplitude > 0.0)
        .then(|| (20.0 * ((amplitude / AMPLITUDE_PER_PASCAL) / REFERENCE_PRESSURE).log10()).round())
}

/// Converts a peak amplitude into dB relative to full scale (`0` is the loudest sample).
pub fn full_scale_decibels(amplitude: f64) -> Option<f64> {
    (amplitude > 0.0).then(|| 20.0 * (amplitude / FULL_SCALE_AMPLITUDE).log10())
}

/// Reads a single floating point number from a text file, as exposed by sysfs sensor nodes.
///
/// Blocks on file IO; async callers go through `spawn_blocking`.
fn read_number(path: &PathBuf) -> Option<f64> {
    match fs::read_to_string(path) {
        Ok(content) => match content.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Some(value),
            Ok(value) => {
                debug!("Non-finite sample in {}: {value}", path.display());
                None
            }
            Err(e) => {
                debug!("Unparseable sample in {}: {e}", path.display());
                None
            }
        },
        Err(e) => {
            debug!("Failed to read sample from {}: {e}", path.display());
            None
        }
    }
}

/// Peak amplitude published by an audio capture process into a file.
#[derive(Debug, Clone)]
pub struct FileAmplitude {
    pub path: PathBuf,
}

impl AmplitudeSource for FileAmplitude {
    fn current_peak_amplitude(&self) -> Option<f64> {
        read_number(&self.path)
    }
}

/// Where one property's value is read from.
#[derive(Clone)]
pub enum PropertySource {
    /// A number in a file, multiplied by `scale`.
    File { path: PathBuf, scale: f64 },
    /// Sound pressure level derived from a peak amplitude.
    SoundLevel(Arc<dyn AmplitudeSource>),
    /// Values pushed through [`ConfiguredSampler::record`], e.g. by a sensor's `set` command.
    Manual,
}

impl core::fmt::Debug for PropertySource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::File { ref path, scale } => f
                .debug_struct("File")
                .field("path", path)
                .field("scale", &scale)
                .finish(),
            Self::SoundLevel(_) => f.write_str("SoundLevel"),
            Self::Manual => f.write_str("Manual"),
        }
    }
}

/// `device_id` => `property` => source
type SourceMap = HashMap<String, HashMap<String, PropertySource>>;

/// Sampler assembled from configuration.
///
/// Sources are fixed at startup. Manual values live behind a lock, since the host
/// application may push them while the monitor loop reads.
#[derive(Debug, Default)]
pub struct ConfiguredSampler {
    sources: SourceMap,
    manual: RwLock<HashMap<(String, String), f64>>,
}

impl ConfiguredSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares where `property` of `device_id` is read from.
    pub fn add_source(&mut self, device_id: &str, property: &str, source: PropertySource) {
        self.sources
            .entry(device_id.to_string())
            .or_default()
            .insert(property.to_string(), source);
    }

    /// Stores the latest value of a manually fed property.
    ///
    /// Returns `false`, storing nothing, if the property is not declared as
    /// [`PropertySource::Manual`] or the value is not finite.
    #[must_use]
    pub fn record(&self, device_id: &str, property: &str, value: f64) -> bool {
        if !value.is_finite() || !self.is_manual(device_id, property) {
            return false;
        }
        let mut manual = self.manual.write().unwrap_or_else(PoisonError::into_inner);
        manual.insert((device_id.to_string(), property.to_string()), value);
        true
    }

    fn is_manual(&self, device_id: &str, property: &str) -> bool {
        self.sources
            .get(device_id)
            .and_then(|sources| sources.get(property))
            .is_some_and(|source| matches!(*source, PropertySource::Manual))
    }

    /// Properties of `device_id` whose values are pushed rather than read.
    pub fn manual_properties(&self, device_id: &str) -> Vec<&str> {
        let mut properties: Vec<_> = self
            .sources
            .get(device_id)
            .into_iter()
            .flatten()
            .filter(|&(_, source)| matches!(*source, PropertySource::Manual))
            .map(|(property, _)| property.as_str())
            .collect();
        properties.sort_unstable();
        properties
    }
}

impl PropertySampler for ConfiguredSampler {
    fn current_value(&self, device_id: &str, property: &str) -> Option<f64> {
        match *self.sources.get(device_id)?.get(property)? {
            PropertySource::File { ref path, scale } => {
                read_number(path).map(|value| value * scale)
            }
            PropertySource::SoundLevel(ref amplitude) => amplitude
                .current_peak_amplitude()
                .and_then(sound_pressure_level),
            PropertySource::Manual => self
                .manual
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&(device_id.to_string(), property.to_string()))
                .copied(),
        }
    }
}

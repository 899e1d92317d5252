//! Property monitor engine: change detection over sampled property values.
//!
//! Monitors are grouped per device, each group behind its own lock, so sampling one device
//! never waits on arming or sampling another. Every monitor keeps its own state and is
//! re-armed right after it triggers.

use std::collections::{BTreeSet, HashMap, VecDeque};

use autobridge_common::{
    DerivedPropertyMonitor, DerivedPropertyType, MonitorSpec, Notification, PropertyMonitor,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{error::MonitorError, registry::DeviceRegistry};

/// A monitor fired; the notification goes to `response_url` or to the poll queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub notification: Notification,
    pub response_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp_ms: i64,
    value: f64,
}

/// Per-monitor evaluation state.
#[derive(Debug)]
enum Rule {
    /// Reports every change of the value.
    OnChange { baseline: Option<f64> },
    /// Reports when the value moved `by_value` or `by_fraction` away from the last report.
    Threshold {
        by_value: f64,
        by_fraction: f64,
        baseline: Option<f64>,
    },
    /// Compares against a fixed reference, holding off for `duration_ms` after each report.
    Compare {
        greater: bool,
        reference: f64,
        duration_ms: i64,
        hold_until: Option<i64>,
    },
    /// Reports change accumulated over `duration_ms`.
    ChangeOverDuration {
        relative: bool,
        threshold: f64,
        duration_ms: i64,
        window: VecDeque<Sample>,
    },
}

fn invalid(property: &str, reason: impl Into<String>) -> MonitorError {
    MonitorError::InvalidThreshold {
        property: property.to_string(),
        reason: reason.into(),
    }
}

/// Rounds a positive duration up to whole milliseconds, saturating at `i64::MAX`.
#[expect(clippy::cast_possible_truncation, reason = "float to int `as` casts saturate")]
fn whole_milliseconds(duration: f64) -> i64 {
    duration.ceil() as i64
}

impl Rule {
    fn from_spec(spec: &MonitorSpec) -> Result<Self, MonitorError> {
        match *spec {
            MonitorSpec::Property(_) => Ok(Self::OnChange { baseline: None }),
            MonitorSpec::Threshold(PropertyMonitor {
                ref name,
                report_changed_by_value,
                report_changed_by_percent,
            }) => {
                for threshold in [report_changed_by_value, report_changed_by_percent] {
                    if !threshold.is_finite() || threshold < 0.0 {
                        let reason = format!("{threshold} is not a non-negative number");
                        return Err(invalid(name, reason));
                    }
                }
                if report_changed_by_value == 0.0 && report_changed_by_percent == 0.0 {
                    return Err(invalid(name, "both thresholds are zero"));
                }
                Ok(Self::Threshold {
                    by_value: report_changed_by_value,
                    by_fraction: report_changed_by_percent,
                    baseline: None,
                })
            }
            MonitorSpec::Derived(DerivedPropertyMonitor {
                ref name,
                derived_property_type,
                derived_from_value,
                change_duration_milliseconds,
            }) => {
                let duration = change_duration_milliseconds;
                if !duration.is_finite() || duration <= 0.0 {
                    return Err(invalid(name, "changeDurationMilliseconds must be positive"));
                }
                let duration_ms = whole_milliseconds(duration);
                if !derived_from_value.is_finite() {
                    return Err(invalid(name, "derivedFromValue must be finite"));
                }
                use DerivedPropertyType as T;
                match derived_property_type {
                    T::GreaterThanValue | T::LessThanValue => Ok(Self::Compare {
                        greater: derived_property_type == T::GreaterThanValue,
                        reference: derived_from_value,
                        duration_ms,
                        hold_until: None,
                    }),
                    T::ChangeByValueOverDuration | T::ChangeByPercentageOverDuration => {
                        if derived_from_value <= 0.0 {
                            return Err(invalid(name, "change threshold must be positive"));
                        }
                        Ok(Self::ChangeOverDuration {
                            relative: derived_property_type == T::ChangeByPercentageOverDuration,
                            threshold: derived_from_value,
                            duration_ms,
                            window: VecDeque::new(),
                        })
                    }
                }
            }
        }
    }

    /// Feeds one sample; returns `(old_value, new_value)` if the monitor triggered.
    fn evaluate(&mut self, sample: Sample) -> Option<(f64, f64)> {
        let value = sample.value;
        match *self {
            Self::OnChange { ref mut baseline } => {
                let Some(old) = baseline.replace(value) else {
                    return None;
                };
                ((value - old).abs() > 0.0).then_some((old, value))
            }
            Self::Threshold {
                by_value,
                by_fraction,
                ref mut baseline,
            } => {
                let Some(old) = *baseline else {
                    *baseline = Some(value);
                    return None;
                };
                let delta = (value - old).abs();
                let by_value_hit = by_value > 0.0 && delta >= by_value;
                let by_fraction_hit =
                    by_fraction > 0.0 && old != 0.0 && delta / old.abs() >= by_fraction;
                if by_value_hit || by_fraction_hit {
                    *baseline = Some(value);
                    Some((old, value))
                } else {
                    None
                }
            }
            Self::Compare {
                greater,
                reference,
                duration_ms,
                ref mut hold_until,
            } => {
                if hold_until.is_some_and(|until| sample.timestamp_ms < until) {
                    return None;
                }
                let hit = if greater {
                    value > reference
                } else {
                    value < reference
                };
                if hit {
                    *hold_until = Some(sample.timestamp_ms.saturating_add(duration_ms));
                    Some((reference, value))
                } else {
                    None
                }
            }
            Self::ChangeOverDuration {
                relative,
                threshold,
                duration_ms,
                ref mut window,
            } => {
                window.push_back(sample);
                let cutoff = sample.timestamp_ms.saturating_sub(duration_ms);
                // Keep the newest sample at or before the cutoff as the window reference.
                while window.get(1).is_some_and(|next| next.timestamp_ms <= cutoff) {
                    window.pop_front();
                }
                let reference = window.front().filter(|first| first.timestamp_ms <= cutoff)?.value;
                let delta = (value - reference).abs();
                let hit = if relative {
                    reference != 0.0 && delta / reference.abs() >= threshold
                } else {
                    delta >= threshold
                };
                if hit {
                    window.clear();
                    window.push_back(sample);
                    Some((reference, value))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug)]
struct ArmedMonitor {
    spec: MonitorSpec,
    response_url: Option<String>,
    rule: Rule,
}

#[derive(Debug, Default)]
struct DeviceMonitors {
    monitors: Vec<ArmedMonitor>,
}

/// Monitors a single device holds unless configured otherwise.
pub const DEFAULT_MONITOR_LIMIT: usize = 64;

/// All armed monitors, grouped by device.
#[derive(Debug)]
pub struct MonitorEngine {
    properties: HashMap<String, BTreeSet<String>>,
    devices: HashMap<String, Mutex<DeviceMonitors>>,
    limit: usize,
}

impl MonitorEngine {
    /// Creates an engine with an empty monitor set for every registered device.
    ///
    /// Each device holds at most [`DEFAULT_MONITOR_LIMIT`] monitors, see
    /// [`MonitorEngine::with_monitor_limit`].
    pub fn new(registry: &DeviceRegistry) -> Self {
        let properties: HashMap<_, BTreeSet<_>> = registry
            .devices()
            .map(|device| {
                (
                    device.id().to_string(),
                    device.properties().map(str::to_string).collect(),
                )
            })
            .collect();
        let devices = properties
            .keys()
            .map(|id| (id.clone(), Mutex::new(DeviceMonitors::default())))
            .collect();
        Self {
            properties,
            devices,
            limit: DEFAULT_MONITOR_LIMIT,
        }
    }

    /// Caps the number of monitors armed on any one device.
    #[must_use]
    pub const fn with_monitor_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Arms a monitor on `device_id`. An identical monitor with the same callback is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not exposed by the device, the thresholds are
    /// degenerate, or the device already holds as many monitors as the engine allows.
    pub async fn arm(
        &self,
        device_id: &str,
        spec: &MonitorSpec,
        response_url: Option<&str>,
    ) -> Result<(), MonitorError> {
        let property = spec.property_name();
        let (Some(properties), Some(monitors)) =
            (self.properties.get(device_id), self.devices.get(device_id))
        else {
            return Err(MonitorError::UnknownProperty {
                device_id: device_id.to_string(),
                property: property.to_string(),
            });
        };
        if !properties.contains(property) {
            return Err(MonitorError::UnknownProperty {
                device_id: device_id.to_string(),
                property: property.to_string(),
            });
        }
        let rule = Rule::from_spec(spec)?;

        let mut guard = monitors.lock().await;
        guard
            .monitors
            .retain(|armed| armed.spec != *spec || armed.response_url.as_deref() != response_url);
        if guard.monitors.len() >= self.limit {
            return Err(MonitorError::TooManyMonitors {
                device_id: device_id.to_string(),
                limit: self.limit,
            });
        }
        guard.monitors.push(ArmedMonitor {
            spec: spec.clone(),
            response_url: response_url.map(str::to_string),
            rule,
        });
        info!(
            "Armed monitor on '{device_id}.{property}' ({} active on device)",
            guard.monitors.len()
        );
        Ok(())
    }

    /// Feeds a sample of `property` to every monitor watching it and returns the ones that
    /// triggered. Non-finite samples are dropped before any monitor sees them.
    pub async fn observe(
        &self,
        device_id: &str,
        property: &str,
        value: f64,
        timestamp_ms: i64,
    ) -> Vec<Trigger> {
        let Some(monitors) = self.devices.get(device_id) else {
            return Vec::new();
        };
        if !value.is_finite() {
            debug!("Dropping non-finite sample {value} of '{device_id}.{property}'");
            return Vec::new();
        }
        let sample = Sample {
            timestamp_ms,
            value,
        };
        let mut guard = monitors.lock().await;
        guard
            .monitors
            .iter_mut()
            .filter(|armed| armed.spec.property_name() == property)
            .filter_map(|armed| {
                let (old_value, new_value) = armed.rule.evaluate(sample)?;
                debug!("Monitor on '{device_id}.{property}' triggered, re-armed");
                Some(Trigger {
                    notification: Notification {
                        device_id: device_id.to_string(),
                        property_name: property.to_string(),
                        old_value,
                        new_value,
                        timestamp: timestamp_ms,
                    },
                    response_url: armed.response_url.clone(),
                })
            })
            .collect()
    }

    /// Properties of `device_id` with at least one armed monitor.
    pub async fn watched_properties(&self, device_id: &str) -> BTreeSet<String> {
        let Some(monitors) = self.devices.get(device_id) else {
            return BTreeSet::new();
        };
        monitors
            .lock()
            .await
            .monitors
            .iter()
            .map(|armed| armed.spec.property_name().to_string())
            .collect()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }
}

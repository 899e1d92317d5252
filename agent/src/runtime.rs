//! Background sampling loop feeding the monitor engine.

use alloc::sync::Arc;
use core::time::Duration;

use tokio::{
    task,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{monitor::MonitorEngine, notifier::Notifier, sampler::PropertySampler};

/// Samples every watched property once and dispatches whatever triggered.
///
/// Reads run on the blocking pool, since samplers may touch the filesystem.
/// Properties without a current value are skipped for this round.
pub async fn sample_once(
    sampler: &Arc<dyn PropertySampler>,
    engine: &MonitorEngine,
    notifier: &Notifier,
    timestamp_ms: i64,
) {
    let mut watched = Vec::new();
    for device_id in engine.device_ids() {
        for property in engine.watched_properties(device_id).await {
            watched.push((device_id.to_string(), property));
        }
    }
    if watched.is_empty() {
        return;
    }

    let reader = Arc::clone(sampler);
    let samples = match task::spawn_blocking(move || {
        watched
            .into_iter()
            .map(|(device_id, property)| {
                let value = reader.current_value(&device_id, &property);
                (device_id, property, value)
            })
            .collect::<Vec<_>>()
    })
    .await
    {
        Ok(samples) => samples,
        Err(e) => {
            warn!("Sampling task failed: {e}");
            return;
        }
    };

    for (device_id, property, value) in samples {
        let Some(value) = value else {
            debug!("No sample for '{device_id}.{property}'");
            continue;
        };
        for trigger in engine
            .observe(&device_id, &property, value, timestamp_ms)
            .await
        {
            notifier.dispatch(trigger).await;
        }
    }
}

/// Runs the sampling loop forever at `period`.
pub async fn run_sampling_loop(
    sampler: Arc<dyn PropertySampler>,
    engine: Arc<MonitorEngine>,
    notifier: Arc<Notifier>,
    period: Duration,
) {
    info!("Sampling watched properties every {period:?}");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let now = chrono::Utc::now().timestamp_millis();
        sample_once(&sampler, &engine, &notifier, now).await;
    }
}

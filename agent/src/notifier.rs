//! Notification delivery.
//!
//! Notifications with a callback are posted out-of-band on their own task with a bounded
//! timeout. Failures are logged and dropped, never retried. Notifications without a callback
//! wait in a bounded queue until a caller polls them.

use core::time::Duration;
use std::collections::VecDeque;

use autobridge_common::Notification;
use tokio::{sync::Mutex, time::timeout};
use tracing::{Instrument as _, debug, info, warn};

use crate::monitor::Trigger;

/// Delivers monitor notifications to callbacks or the poll queue.
#[derive(Debug)]
pub struct Notifier {
    client: reqwest::Client,
    timeout: Duration,
    limit: usize,
    pending: Mutex<VecDeque<Notification>>,
}

impl Notifier {
    /// Creates a notifier whose callbacks give up after `timeout` and which keeps at most
    /// `limit` queued notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration, limit: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout,
            limit,
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Routes a triggered notification. Never waits on the callback.
    pub async fn dispatch(&self, trigger: Trigger) {
        let Trigger {
            notification,
            response_url,
        } = trigger;
        info!(
            "Property '{}.{}' changed {} -> {}",
            notification.device_id,
            notification.property_name,
            notification.old_value,
            notification.new_value
        );
        match response_url {
            Some(url) => {
                let client = self.client.clone();
                let limit = self.timeout;
                tokio::spawn(
                    async move { deliver(&client, &url, &notification, limit).await }
                        .in_current_span(),
                );
            }
            None => self.enqueue(notification).await,
        }
    }

    async fn enqueue(&self, notification: Notification) {
        let mut pending = self.pending.lock().await;
        if self.limit == 0 {
            warn!("Notification queue disabled, dropping notification");
            return;
        }
        while pending.len() >= self.limit {
            if let Some(dropped) = pending.pop_front() {
                warn!(
                    "Notification queue full, dropping oldest for '{}.{}'",
                    dropped.device_id, dropped.property_name
                );
            }
        }
        pending.push_back(notification);
    }

    /// Removes and returns every queued notification, oldest first.
    pub async fn drain(&self) -> Vec<Notification> {
        self.pending.lock().await.drain(..).collect()
    }
}

/// Posts one notification; the outcome is only logged.
async fn deliver(
    client: &reqwest::Client,
    url: &str,
    notification: &Notification,
    limit: Duration,
) {
    match timeout(limit, client.post(url).json(notification).send()).await {
        Ok(Ok(resp)) if resp.status().is_success() => {
            debug!("Delivered notification to {url}");
        }
        Ok(Ok(resp)) => {
            warn!("Callback {url} rejected notification: status {}", resp.status());
        }
        Ok(Err(e)) => {
            warn!("Failed to deliver notification to {url}: {e}");
        }
        Err(_) => {
            warn!("Delivering notification to {url} timed out after {limit:?}");
        }
    }
}

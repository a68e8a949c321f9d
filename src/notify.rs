//! Operator alerts
//!
//! Alerts are always logged. When a webhook is configured they are also
//! queued to a background task that POSTs them as JSON; a full queue or a
//! failed delivery never blocks or fails the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NotifyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Cheap-to-clone handle for raising alerts
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Alert>>,
}

impl Notifier {
    /// Log-only notifier
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Notifier whose alerts are delivered to the returned receiver
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Start the webhook delivery task when a URL is configured
    pub fn spawn(config: &NotifyConfig) -> (Self, Option<JoinHandle<()>>) {
        let Some(url) = config.webhook_url.clone() else {
            return (Self::disabled(), None);
        };
        let (notifier, rx) = Self::channel(config.queue_capacity);
        let handle = tokio::spawn(deliver(url, rx));
        (notifier, Some(handle))
    }

    pub fn notify(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Info => info!(title = %alert.title, body = %alert.body, "Alert"),
            AlertLevel::Warning => warn!(title = %alert.title, body = %alert.body, "Alert"),
            AlertLevel::Error => error!(title = %alert.title, body = %alert.body, "Alert"),
        }

        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(alert) {
                warn!(error = %e, "Alert queue unavailable, dropping alert");
            }
        }
    }

    pub fn info(&self, title: impl Into<String>, body: impl Into<String>) {
        self.notify(Alert::new(AlertLevel::Info, title, body));
    }

    pub fn warning(&self, title: impl Into<String>, body: impl Into<String>) {
        self.notify(Alert::new(AlertLevel::Warning, title, body));
    }

    pub fn error(&self, title: impl Into<String>, body: impl Into<String>) {
        self.notify(Alert::new(AlertLevel::Error, title, body));
    }
}

async fn deliver(url: String, mut rx: mpsc::Receiver<Alert>) {
    let client = reqwest::Client::new();
    while let Some(alert) = rx.recv().await {
        match client.post(&url).json(&alert).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(title = %alert.title, "Alert delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), title = %alert.title, "Webhook rejected alert");
            }
            Err(e) => {
                warn!(error = %e, title = %alert.title, "Webhook delivery failed");
            }
        }
    }
    debug!("Alert queue closed");
}

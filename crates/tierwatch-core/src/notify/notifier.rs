use std::time::Duration;

use tracing::info;

use crate::config::NotificationConfig;
use crate::error::{Result, TierwatchError};

use super::request::Notification;

/// Delivery channel for rendered notifications. Implementations block.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes each notification to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, n: &Notification) -> Result<()> {
        info!(
            ticket = n.ticket_id,
            role = %n.role,
            recipient = %n.recipient,
            to = %n.to,
            "{}",
            n.subject
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TierwatchError::Notify(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, n: &Notification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(n)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| TierwatchError::Notify(format!("{} for ticket #{}: {e}", n.role, n.ticket_id)))?;
        Ok(())
    }
}

/// Webhook when a URL is configured, log output otherwise.
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Box<dyn Notifier>> {
    match config.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Box::new(WebhookNotifier::new(
            url,
            Duration::from_secs(config.timeout_seconds),
        )?)),
        _ => Ok(Box::new(LogNotifier)),
    }
}

//! Delivery of the run summary.
//!
//! The orchestrator hands the finished [`RunSummary`] to a single
//! [`Notifier`] exactly once. [`Notifiers`] fans that out to several
//! channels; a failing channel is logged and does not affect the others.

use crate::summary::RunSummary;
use crate::utils::errors::{CopyError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, summary: &RunSummary) -> Result<()>;
}

/// Writes the rendered summary to the log.
pub struct LogNotifier {
    subject: String,
}

impl LogNotifier {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let subject = summary.subject(&self.subject);
        let text = summary.render_text();
        if summary.has_errors() {
            warn!(exit_code = summary.exit_code, "{}\n{}", subject, text);
        } else {
            info!(exit_code = summary.exit_code, "{}\n{}", subject, text);
        }
        Ok(())
    }
}

/// POSTs the summary as JSON to a configured URL.
pub struct WebhookNotifier {
    url: String,
    subject: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, subject: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("backup-copy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            url: url.into(),
            subject: subject.into(),
            client,
        })
    }

    fn payload(&self, summary: &RunSummary) -> Result<Value> {
        Ok(json!({
            "subject": summary.subject(&self.subject),
            "host": summary.host,
            "has_errors": summary.has_errors(),
            "text": summary.render_text(),
            "summary": serde_json::to_value(summary)?,
        }))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let body = self.payload(summary)?;
        let resp = self.client.post(&self.url).json(&body).send().await?;

        if !resp.status().is_success() {
            return Err(CopyError::Notification(format!(
                "webhook {} answered with status {}",
                self.url,
                resp.status()
            )));
        }

        info!(url = %self.url, "Summary delivered to webhook");
        Ok(())
    }
}

/// Delivers to every configured channel.
#[derive(Default)]
pub struct Notifiers {
    channels: Vec<Box<dyn Notifier>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.channels.push(Box::new(notifier));
        self
    }
}

#[async_trait]
impl Notifier for Notifiers {
    fn name(&self) -> &'static str {
        "fan-out"
    }

    /// Fails only when every channel failed.
    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let mut failures = Vec::new();
        for channel in &self.channels {
            if let Err(e) = channel.notify(summary).await {
                error!(channel = channel.name(), error = %e, "Failed to deliver run summary");
                failures.push(format!("{}: {}", channel.name(), e));
            }
        }

        if !self.channels.is_empty() && failures.len() == self.channels.len() {
            return Err(CopyError::Notification(failures.join("; ")));
        }
        Ok(())
    }
}

//! Completion publishers for the `screenshots-completed` topic

use crate::domain::ScreenshotsCompleted;
use crate::error::{CollaboratorError, Result};
use crate::services::collaborators::{CollaboratorResult, CompletionPublisher};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Fans completions out to in-process subscribers
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ScreenshotsCompleted>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScreenshotsCompleted> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl CompletionPublisher for BroadcastPublisher {
    async fn publish(&self, event: &ScreenshotsCompleted) -> CollaboratorResult<()> {
        // No subscribers is not a failure: nobody is listening yet
        match self.tx.send(event.clone()) {
            Ok(receivers) => debug!(receivers, "Completion broadcast"),
            Err(_) => debug!("Completion broadcast with no subscribers"),
        }
        Ok(())
    }
}

/// POSTs each completion as JSON to a webhook
#[derive(Clone)]
pub struct WebhookPublisher {
    client: Client,
    url: String,
    timeout_ms: u64,
}

const WEBHOOK: &str = "completion-webhook";

impl WebhookPublisher {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl CompletionPublisher for WebhookPublisher {
    async fn publish(&self, event: &ScreenshotsCompleted) -> CollaboratorResult<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(WEBHOOK, self.timeout_ms, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::UnexpectedStatus {
                service: WEBHOOK,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Writes completions to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl CompletionPublisher for LoggingPublisher {
    async fn publish(&self, event: &ScreenshotsCompleted) -> CollaboratorResult<()> {
        info!(
            catalog_id = %event.catalog_id,
            request_id = %event.request_id,
            urls = event.screenshot_urls.len(),
            "screenshots-completed"
        );
        Ok(())
    }
}

/// Publishes to every inner publisher; fails if any of them failed
pub struct FanoutPublisher {
    publishers: Vec<std::sync::Arc<dyn CompletionPublisher>>,
}

impl FanoutPublisher {
    pub fn new(publishers: Vec<std::sync::Arc<dyn CompletionPublisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl CompletionPublisher for FanoutPublisher {
    async fn publish(&self, event: &ScreenshotsCompleted) -> CollaboratorResult<()> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(event).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

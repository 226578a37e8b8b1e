//! Outbound notifications about generated work.
//!
//! Delivery is fire-and-forget: the scheduler spawns each send on the
//! runtime and never waits for it. Failures end up in the log and the
//! event table, never in the caller's result.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{AssetId, PlanId, Priority, WorkOrderId};

/// Message sent when a preventive work order is opened.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub work_order_id: WorkOrderId,
    pub work_order_number: i64,
    pub asset_id: AssetId,
    pub asset_name: String,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub milestone_threshold: f64,
    pub priority: Priority,
    pub subject: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name for logs and metric labels.
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            work_order = notification.work_order_number,
            asset = %notification.asset_name,
            plan = %notification.plan_name,
            "{}",
            notification.subject
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to build webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| Error::Other(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Other(format!("webhook returned {status}")));
        }
        Ok(())
    }
}

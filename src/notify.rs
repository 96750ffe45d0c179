//! Outbound notifications. Delivery belongs to external channels; the engine
//! only composes messages and hands them to a [`NotificationChannel`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    /// Channel-level category, e.g. "approval_requested", "reminder", "email".
    pub kind: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Channel that emits each notification as a structured log event.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<()> {
        info!(
            recipient = %n.recipient,
            kind = %n.kind,
            instance_id = n.instance_id.as_deref().unwrap_or("-"),
            node_id = n.node_id.as_deref().unwrap_or("-"),
            subject = %n.subject,
            "{}",
            n.body
        );
        Ok(())
    }
}

/// Send and swallow failures; returns whether delivery succeeded.
pub async fn send_best_effort(channel: &dyn NotificationChannel, notification: &Notification) -> bool {
    match channel.send(notification).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                channel = channel.name(),
                recipient = %notification.recipient,
                kind = %notification.kind,
                error = %format!("{:#}", e),
                "Notification dispatch failed"
            );
            false
        }
    }
}

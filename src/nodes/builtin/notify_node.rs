use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::engine::definition::{NodeKind, NodeType};
use crate::engine::types::Variables;
use crate::notify::{Notification, NotificationChannel, send_best_effort};
use crate::nodes::{ExecutionResult, NodeContext, NodeExecutor};
use crate::template::interpolate_vars;

pub struct NotifyNode {
    channel: Option<Arc<dyn NotificationChannel>>,
}

impl NotifyNode {
    pub fn new(channel: Option<Arc<dyn NotificationChannel>>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NodeExecutor for NotifyNode {
    fn node_type(&self) -> NodeType {
        NodeType::Notify
    }

    fn description(&self) -> &str {
        "Send a templated notification and continue"
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        let NodeKind::Notify(config) = &ctx.node.kind else {
            bail!("node '{}' is not a notify node", ctx.node.id);
        };
        let next = ctx.definition.successors(&ctx.node.id);

        let Some(config) = config else {
            return Ok(ExecutionResult::advance(next, "nothing to send"));
        };

        let vars = &ctx.instance.variables;
        let body = config
            .template
            .as_deref()
            .map(|t| interpolate_vars(t, vars))
            .unwrap_or_default();
        let subject = config
            .subject
            .as_deref()
            .map(|s| interpolate_vars(s, vars))
            .unwrap_or_else(|| ctx.node.name.clone());

        let mut sent = 0usize;
        if let Some(channel) = &self.channel {
            for recipient in &config.recipients {
                let notification = Notification {
                    recipient: interpolate_vars(recipient, vars),
                    kind: config.notification_type.clone(),
                    subject: subject.clone(),
                    body: body.clone(),
                    instance_id: Some(ctx.instance.id.clone()),
                    node_id: Some(ctx.node.id.clone()),
                };
                if send_best_effort(channel.as_ref(), &notification).await {
                    sent += 1;
                }
            }
        }

        let mut out = Variables::new();
        out.insert(format!("{}_sent", ctx.node.id), serde_json::Value::from(sent));

        Ok(ExecutionResult::advance(
            next,
            format!("notified {}/{} recipients", sent, config.recipients.len()),
        )
        .with_variables(out))
    }
}

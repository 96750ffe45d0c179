use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;

use crate::engine::definition::{ApprovalConfig, NodeKind, NodeType};
use crate::engine::types::{ApprovalAction, PendingApproval, Variables};
use crate::error::WorkflowError;
use crate::notify::Notification;
use crate::nodes::approvers::resolve_assignees;
use crate::nodes::business::BusinessContext;
use crate::nodes::{ExecutionResult, ExecutorDeps, NodeContext, NodeExecutor};
use crate::template::display_value;

const DEFAULT_PRIORITY: &str = "normal";

/// Human approval step. Resolves approvers, builds their pending approvals
/// and parks the instance on this node until someone acts.
pub struct ApprovalNode {
    deps: ExecutorDeps,
    business: Arc<dyn BusinessContext>,
}

impl ApprovalNode {
    pub fn new(deps: ExecutorDeps, business: Arc<dyn BusinessContext>) -> Self {
        Self { deps, business }
    }

    fn priority(config: &ApprovalConfig, vars: &Variables) -> String {
        config
            .priority
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| {
                vars.get("priority")
                    .map(display_value)
                    .filter(|p| !p.is_empty())
            })
            .unwrap_or_else(|| DEFAULT_PRIORITY.to_string())
    }

    /// Starter and stakeholder-variable users who are not already approvers.
    fn watchers(&self, ctx: &NodeContext<'_>, approvers: &[String]) -> Vec<String> {
        let instance = ctx.instance;
        let mut watchers: Vec<String> = Vec::new();
        let candidates = std::iter::once(instance.started_by.clone()).chain(
            self.business
                .stakeholder_keys()
                .iter()
                .filter_map(|key| instance.variables.get(*key).map(display_value)),
        );
        for user in candidates {
            if !user.is_empty() && !approvers.contains(&user) && !watchers.contains(&user) {
                watchers.push(user);
            }
        }
        watchers
    }
}

#[async_trait]
impl NodeExecutor for ApprovalNode {
    fn node_type(&self) -> NodeType {
        NodeType::Approval
    }

    fn description(&self) -> &str {
        "Wait for a human decision from the resolved approvers"
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        let NodeKind::Approval(config) = &ctx.node.kind else {
            bail!("node '{}' is not an approval node", ctx.node.id);
        };
        let instance = ctx.instance;
        let node = ctx.node;

        let resolution = resolve_assignees(
            &config.assignees,
            instance,
            self.deps.directory.as_ref(),
            self.business.as_ref(),
        )
        .await;

        if resolution.users.is_empty() {
            let reasons = if resolution.skipped.is_empty() {
                "no assignees configured".to_string()
            } else {
                resolution.skipped.join("; ")
            };
            return Err(WorkflowError::NoApprovers {
                node_id: node.id.clone(),
                reasons,
            }
            .into());
        }

        let approvers = resolution.users;
        let mut vars = Variables::new();
        vars.insert(
            format!("{}_approvers", node.id),
            serde_json::Value::from(approvers.clone()),
        );

        if config.auto_approve {
            vars.insert(
                format!("{}_result", node.id),
                serde_json::Value::String("auto_approved".to_string()),
            );
            let next = ctx.definition.targets_for_action(&node.id, ApprovalAction::Approve);
            return Ok(ExecutionResult::advance(next, "auto-approved").with_variables(vars));
        }

        let now = Utc::now();
        let deadline = config
            .timeout
            .and_then(|h| Duration::try_hours(i64::from(h)))
            .and_then(|d| now.checked_add_signed(d));
        let priority = Self::priority(config, &instance.variables);
        let business_data = self.business.snapshot(instance);

        let mut actions = vec![ApprovalAction::Approve, ApprovalAction::Reject];
        if config.can_delegate {
            actions.push(ApprovalAction::Delegate);
        }

        let row = |user: &str, required_actions: Vec<ApprovalAction>| PendingApproval {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance.id.clone(),
            workflow_id: instance.workflow_id.clone(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            assigned_to: user.to_string(),
            business_id: instance.business_id.clone(),
            business_type: instance.business_type.clone(),
            business_data: business_data.clone(),
            priority: priority.clone(),
            deadline,
            can_delegate: config.can_delegate,
            required_actions,
            created_at: now,
        };

        let watchers = self.watchers(ctx, &approvers);
        let rows: Vec<PendingApproval> = approvers
            .iter()
            .map(|user| row(user, actions.clone()))
            .chain(watchers.iter().map(|user| row(user, vec![ApprovalAction::View])))
            .collect();

        let subject = self.business.title(instance);
        let notifications: Vec<Notification> = approvers
            .iter()
            .map(|user| Notification {
                recipient: user.clone(),
                kind: "approval_requested".to_string(),
                subject: subject.clone(),
                body: format!("'{}' is waiting for your approval", node.name),
                instance_id: Some(instance.id.clone()),
                node_id: Some(node.id.clone()),
            })
            .collect();

        info!(
            instance_id = %instance.id,
            node_id = %node.id,
            approvers = approvers.len(),
            watchers = watchers.len(),
            "Approval requested"
        );

        Ok(ExecutionResult::wait(format!(
            "waiting for {} approver(s)",
            approvers.len()
        ))
        .with_variables(vars)
        .with_pending(rows)
        .with_notifications(notifications))
    }
}

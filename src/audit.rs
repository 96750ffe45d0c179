//! Audit reports derived from an instance's execution history.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::types::{ExecutionHistory, InstanceStatus};
use crate::error::{WorkflowError, WorkflowResult};
use crate::storage::InstanceStore;

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub instance_id: String,
    pub workflow_id: String,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Start to completion, or to now while still running.
    pub elapsed_ms: i64,
    pub entries: usize,
    pub total_duration_ms: i64,
    pub average_duration_ms: f64,
    pub by_node: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
    pub by_actor: BTreeMap<String, usize>,
}

/// Recomputes every report from history; nothing is cached.
pub struct AuditService {
    store: Arc<dyn InstanceStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }

    pub async fn report(&self, instance_id: &str) -> WorkflowResult<AuditReport> {
        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.to_string()))?;

        let mut by_node = BTreeMap::new();
        let mut by_action = BTreeMap::new();
        let mut by_actor = BTreeMap::new();
        let mut total_duration_ms = 0i64;

        for entry in &instance.history {
            if !entry.node_id.is_empty() {
                *by_node.entry(entry.node_id.clone()).or_insert(0) += 1;
            }
            *by_action.entry(entry.action.clone()).or_insert(0) += 1;
            *by_actor.entry(entry.actor.clone()).or_insert(0) += 1;
            total_duration_ms += entry.duration_ms;
        }

        let entries = instance.history.len();
        let average_duration_ms = if entries == 0 {
            0.0
        } else {
            total_duration_ms as f64 / entries as f64
        };
        let end = instance.completed_at.unwrap_or_else(Utc::now);

        Ok(AuditReport {
            elapsed_ms: (end - instance.started_at).num_milliseconds(),
            instance_id: instance.id,
            workflow_id: instance.workflow_id,
            status: instance.status,
            started_at: instance.started_at,
            completed_at: instance.completed_at,
            entries,
            total_duration_ms,
            average_duration_ms,
            by_node,
            by_action,
            by_actor,
        })
    }

    /// History ordered by timestamp; entries with equal timestamps keep insertion order.
    pub async fn timeline(&self, instance_id: &str) -> WorkflowResult<Vec<ExecutionHistory>> {
        let mut history = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.to_string()))?
            .history;
        history.sort_by_key(|h| h.timestamp);
        Ok(history)
    }
}

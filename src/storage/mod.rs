pub mod json_store;
pub mod memory_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::definition::WorkflowDefinition;
use crate::engine::types::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance '{id}' was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict { id: String, expected: u64, found: u64 },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable storage of workflow definitions.
///
/// The latest copy of each definition is what `get_definition` returns. Every
/// saved version is also kept, so instances started on an older version can
/// still be driven after the definition changes.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Insert or replace the latest copy, and the snapshot for `def.version`.
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), StoreError>;

    async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>, StoreError>;

    async fn get_definition_version(
        &self,
        id: &str,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, StoreError>;

    /// All definitions, ordered by id.
    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, StoreError>;
}

/// Durable storage of instances and their pending approvals.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), StoreError>;

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>, StoreError>;

    /// Replace a stored instance if its stored `version` still equals
    /// `instance.version`. Returns the new version.
    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<u64, StoreError>;

    /// List instances, newest first, optionally filtered by status.
    async fn list_instances(
        &self,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    async fn add_pending(&self, approval: &PendingApproval) -> Result<(), StoreError>;

    /// Delete every pending row for one node of an instance.
    async fn remove_pending(&self, instance_id: &str, node_id: &str) -> Result<usize, StoreError>;

    async fn remove_pending_for_instance(&self, instance_id: &str) -> Result<usize, StoreError>;

    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<PendingApproval>, StoreError>;

    async fn pending_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<PendingApproval>, StoreError>;

    async fn list_pending(&self) -> Result<Vec<PendingApproval>, StoreError>;
}

/// Check the optimistic version token shared by both store backends.
pub(crate) fn check_version(
    stored: &WorkflowInstance,
    incoming: &WorkflowInstance,
) -> Result<u64, StoreError> {
    if stored.version != incoming.version {
        return Err(StoreError::VersionConflict {
            id: incoming.id.clone(),
            expected: incoming.version,
            found: stored.version,
        });
    }
    Ok(stored.version + 1)
}

use thiserror::Error;

use crate::engine::types::InstanceStatus;
use crate::storage::StoreError;

/// Errors surfaced by the definition manager and the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    // Definition errors
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("workflow definition '{0}' already exists")]
    DefinitionExists(String),

    // Not-found errors
    #[error("workflow definition '{0}' not found")]
    DefinitionNotFound(String),

    #[error("workflow instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("node '{node_id}' not found in workflow '{workflow_id}'")]
    NodeNotFound {
        workflow_id: String,
        node_id: String,
    },

    // State errors
    #[error("workflow definition '{0}' is inactive")]
    DefinitionInactive(String),

    #[error("workflow instance '{instance_id}' is not running (status: {status})")]
    NotRunning {
        instance_id: String,
        status: InstanceStatus,
    },

    #[error("node '{0}' is not active")]
    NodeNotActive(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("concurrent update rejected: {0}")]
    Conflict(String),

    // Execution errors
    #[error("no approvers resolved for node '{node_id}': {reasons}")]
    NoApprovers { node_id: String, reasons: String },

    #[error("node '{node_id}' failed: {message}")]
    NodeFailed { node_id: String, message: String },

    #[error("cascade exceeded {0} node executions")]
    CascadeLimit(usize),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => WorkflowError::Conflict(err.to_string()),
            other => WorkflowError::Store(other),
        }
    }
}

impl WorkflowError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WorkflowError::DefinitionNotFound(_)
                | WorkflowError::InstanceNotFound(_)
                | WorkflowError::NodeNotFound { .. }
        )
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

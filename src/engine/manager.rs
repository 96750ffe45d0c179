use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::engine::definition::{WorkflowDefinition, WorkflowPatch};
use crate::engine::validate::validate_definition;
use crate::error::{WorkflowError, WorkflowResult};
use crate::storage::DefinitionStore;

/// Create, update and retire workflow definitions. Nothing reaches the
/// store without passing validation first.
pub struct DefinitionManager {
    store: Arc<dyn DefinitionStore>,
}

impl DefinitionManager {
    pub fn new(store: Arc<dyn DefinitionStore>) -> Self {
        Self { store }
    }

    pub fn validate_workflow(&self, def: &WorkflowDefinition) -> WorkflowResult<()> {
        validate_definition(def)
    }

    pub async fn create_workflow(
        &self,
        mut def: WorkflowDefinition,
    ) -> WorkflowResult<WorkflowDefinition> {
        validate_definition(&def)?;
        if self.store.get_definition(&def.id).await?.is_some() {
            return Err(WorkflowError::DefinitionExists(def.id));
        }

        let now = Utc::now();
        def.version = 1;
        def.is_active = true;
        def.created_at = now;
        def.updated_at = now;
        self.store.save_definition(&def).await?;

        info!(workflow_id = %def.id, nodes = def.nodes.len(), "Workflow definition created");
        Ok(def)
    }

    /// Merge `patch` onto the stored definition, re-validate, bump the version.
    /// Instances already running stay on the version they started with.
    pub async fn update_workflow(
        &self,
        id: &str,
        patch: WorkflowPatch,
    ) -> WorkflowResult<WorkflowDefinition> {
        let mut def = self.get_workflow(id).await?;
        patch.apply_to(&mut def);
        validate_definition(&def)?;

        def.version += 1;
        def.updated_at = Utc::now();
        self.store.save_definition(&def).await?;

        info!(workflow_id = %def.id, version = def.version, "Workflow definition updated");
        Ok(def)
    }

    pub async fn get_workflow(&self, id: &str) -> WorkflowResult<WorkflowDefinition> {
        self.store
            .get_definition(id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.to_string()))
    }

    /// A version as it was saved; superseded versions stay readable.
    pub async fn get_workflow_version(
        &self,
        id: &str,
        version: u32,
    ) -> WorkflowResult<WorkflowDefinition> {
        self.store
            .get_definition_version(id, version)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(format!("{} v{}", id, version)))
    }

    pub async fn list_workflows(&self, active_only: bool) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let mut defs = self.store.list_definitions().await?;
        if active_only {
            defs.retain(|d| d.is_active);
        }
        Ok(defs)
    }

    /// Soft delete: running instances keep using the definition.
    pub async fn deactivate_workflow(&self, id: &str) -> WorkflowResult<WorkflowDefinition> {
        let mut def = self.get_workflow(id).await?;
        if def.is_active {
            def.is_active = false;
            def.updated_at = Utc::now();
            self.store.save_definition(&def).await?;
            info!(workflow_id = %def.id, "Workflow definition deactivated");
        }
        Ok(def)
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::definition::WorkflowDefinition;
use crate::engine::types::*;
use crate::storage::{DefinitionStore, InstanceStore, StoreError, check_version};

/// In-memory store for tests and embedded use.
/// Holds definitions, instances and pending approvals for the lifetime of the store.
#[derive(Default)]
pub struct MemoryStore {
    definitions: RwLock<HashMap<String, WorkflowDefinition>>,
    definition_versions: RwLock<HashMap<(String, u32), WorkflowDefinition>>,
    instances: RwLock<HashMap<String, WorkflowInstance>>,
    pending: RwLock<Vec<PendingApproval>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), StoreError> {
        self.definition_versions
            .write()
            .await
            .insert((def.id.clone(), def.version), def.clone());
        self.definitions
            .write()
            .await
            .insert(def.id.clone(), def.clone());
        Ok(())
    }

    async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.definitions.read().await.get(id).cloned())
    }

    async fn get_definition_version(
        &self,
        id: &str,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self
            .definition_versions
            .read()
            .await
            .get(&(id.to_string(), version))
            .cloned())
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let mut defs: Vec<WorkflowDefinition> =
            self.definitions.read().await.values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(defs)
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>, StoreError> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get(&instance.id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {}", instance.id)))?;
        let next = check_version(stored, instance)?;

        let mut updated = instance.clone();
        updated.version = next;
        instances.insert(updated.id.clone(), updated);
        Ok(next)
    }

    async fn list_instances(
        &self,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let mut list: Vec<WorkflowInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(list)
    }

    async fn add_pending(&self, approval: &PendingApproval) -> Result<(), StoreError> {
        self.pending.write().await.push(approval.clone());
        Ok(())
    }

    async fn remove_pending(&self, instance_id: &str, node_id: &str) -> Result<usize, StoreError> {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|p| !(p.instance_id == instance_id && p.node_id == node_id));
        Ok(before - pending.len())
    }

    async fn remove_pending_for_instance(&self, instance_id: &str) -> Result<usize, StoreError> {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|p| p.instance_id != instance_id);
        Ok(before - pending.len())
    }

    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<PendingApproval>, StoreError> {
        Ok(self
            .pending
            .read()
            .await
            .iter()
            .filter(|p| p.assigned_to == user_id)
            .cloned()
            .collect())
    }

    async fn pending_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<PendingApproval>, StoreError> {
        Ok(self
            .pending
            .read()
            .await
            .iter()
            .filter(|p| p.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<PendingApproval>, StoreError> {
        Ok(self.pending.read().await.clone())
    }
}

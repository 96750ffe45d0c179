use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::engine::definition::WorkflowDefinition;
use crate::engine::types::*;
use crate::storage::{DefinitionStore, InstanceStore, StoreError, check_version};

/// File-based JSON store.
///
/// Layout under `base_dir`:
/// - `definitions/<id>.json` (latest copy)
/// - `definition_versions/<id>/<version>.json`
/// - `instances/<id>.json`
/// - `pending/<instance_id>.json` (all pending rows of one instance)
pub struct JsonStore {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    fn path(&self, kind: &str, id: &str) -> PathBuf {
        self.base_dir
            .join(kind)
            .join(format!("{}.json", file_stem(id)))
    }

    fn version_path(&self, id: &str, version: u32) -> PathBuf {
        self.base_dir
            .join("definition_versions")
            .join(file_stem(id))
            .join(format!("{}.json", version))
    }

    async fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Read every `.json` record in a subdirectory, skipping unreadable files.
    async fn read_all<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>, StoreError> {
        let dir = self.base_dir.join(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read::<T>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record")
                }
            }
        }
        Ok(records)
    }

    async fn read_pending(&self, instance_id: &str) -> Result<Vec<PendingApproval>, StoreError> {
        Ok(Self::read(&self.path("pending", instance_id))
            .await?
            .unwrap_or_default())
    }

    async fn write_pending(
        &self,
        instance_id: &str,
        rows: &[PendingApproval],
    ) -> Result<(), StoreError> {
        let path = self.path("pending", instance_id);
        if rows.is_empty() {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
            return Ok(());
        }
        Self::write(&path, &rows).await
    }
}

/// Percent-encode an id into a file or directory name. Distinct ids always
/// give distinct names, and `%` and `.` are encoded so no id can name `..`.
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

#[async_trait]
impl DefinitionStore for JsonStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), StoreError> {
        let _lock = self.lock.write().await;
        Self::write(&self.version_path(&def.id, def.version), def).await?;
        Self::write(&self.path("definitions", &def.id), def).await
    }

    async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>, StoreError> {
        let _lock = self.lock.read().await;
        Self::read(&self.path("definitions", id)).await
    }

    async fn get_definition_version(
        &self,
        id: &str,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        let _lock = self.lock.read().await;
        Self::read(&self.version_path(id, version)).await
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let _lock = self.lock.read().await;
        let mut defs: Vec<WorkflowDefinition> = self.read_all("definitions").await?;
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(defs)
    }
}

#[async_trait]
impl InstanceStore for JsonStore {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        let _lock = self.lock.write().await;
        Self::write(&self.path("instances", &instance.id), instance).await
    }

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>, StoreError> {
        let _lock = self.lock.read().await;
        Self::read(&self.path("instances", id)).await
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        let _lock = self.lock.write().await;
        let path = self.path("instances", &instance.id);
        let stored: WorkflowInstance = Self::read(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("instance {}", instance.id)))?;
        let next = check_version(&stored, instance)?;

        let mut updated = instance.clone();
        updated.version = next;
        Self::write(&path, &updated).await?;
        Ok(next)
    }

    async fn list_instances(
        &self,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let _lock = self.lock.read().await;
        let mut list: Vec<WorkflowInstance> = self
            .read_all::<WorkflowInstance>("instances")
            .await?
            .into_iter()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(list)
    }

    async fn add_pending(&self, approval: &PendingApproval) -> Result<(), StoreError> {
        let _lock = self.lock.write().await;
        let mut rows = self.read_pending(&approval.instance_id).await?;
        rows.push(approval.clone());
        self.write_pending(&approval.instance_id, &rows).await
    }

    async fn remove_pending(&self, instance_id: &str, node_id: &str) -> Result<usize, StoreError> {
        let _lock = self.lock.write().await;
        let mut rows = self.read_pending(instance_id).await?;
        let before = rows.len();
        rows.retain(|p| p.node_id != node_id);
        let removed = before - rows.len();
        if removed > 0 {
            self.write_pending(instance_id, &rows).await?;
        }
        Ok(removed)
    }

    async fn remove_pending_for_instance(&self, instance_id: &str) -> Result<usize, StoreError> {
        let _lock = self.lock.write().await;
        let removed = self.read_pending(instance_id).await?.len();
        self.write_pending(instance_id, &[]).await?;
        Ok(removed)
    }

    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<PendingApproval>, StoreError> {
        let _lock = self.lock.read().await;
        let groups: Vec<Vec<PendingApproval>> = self.read_all("pending").await?;
        Ok(groups
            .into_iter()
            .flatten()
            .filter(|p| p.assigned_to == user_id)
            .collect())
    }

    async fn pending_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<PendingApproval>, StoreError> {
        let _lock = self.lock.read().await;
        self.read_pending(instance_id).await
    }

    async fn list_pending(&self) -> Result<Vec<PendingApproval>, StoreError> {
        let _lock = self.lock.read().await;
        let groups: Vec<Vec<PendingApproval>> = self.read_all("pending").await?;
        Ok(groups.into_iter().flatten().collect())
    }
}

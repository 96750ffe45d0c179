use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::directory::OrgDirectory;
use crate::engine::definition::{NodeKind, NodeType, WorkflowDefinition};
use crate::engine::types::*;
use crate::error::{WorkflowError, WorkflowResult};
use crate::notify::{Notification, NotificationChannel, send_best_effort};
use crate::nodes::{ExecutorDeps, ExecutorRegistry, NodeContext};
use crate::storage::{DefinitionStore, InstanceStore};

/// Actor recorded on history entries the engine writes itself.
pub const SYSTEM_ACTOR: &str = "system";

pub const DEFAULT_MAX_CASCADE_STEPS: usize = 256;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on node executions triggered by one call.
    pub max_cascade_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_steps: DEFAULT_MAX_CASCADE_STEPS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    pub workflow_id: String,
    pub business_id: String,
    /// Empty selects the engine's default business type.
    #[serde(default)]
    pub business_type: String,
    #[serde(default)]
    pub variables: Variables,
    pub started_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub instance_id: String,
    pub node_id: String,
    pub action: ApprovalAction,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub variables: Variables,
    pub approved_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub instance: WorkflowInstance,
    pub next_nodes: Vec<String>,
    pub completed: bool,
    pub message: String,
}

/// Work-item changes made while driving an instance. Nothing here touches
/// the store until the instance save has passed its version check.
#[derive(Debug, Default)]
struct StagedWork {
    /// Nodes whose existing pending rows are dropped.
    cleared: Vec<String>,
    rows: Vec<PendingApproval>,
    notifications: Vec<Notification>,
}

impl StagedWork {
    fn clear(&mut self, node_id: &str) {
        if !self.cleared.iter().any(|n| n == node_id) {
            self.cleared.push(node_id.to_string());
        }
        self.rows.retain(|r| r.node_id != node_id);
        self.notifications
            .retain(|n| n.node_id.as_deref() != Some(node_id));
    }
}

/// Drives workflow instances through their definitions.
pub struct WorkflowEngine {
    definitions: Arc<dyn DefinitionStore>,
    instances: Arc<dyn InstanceStore>,
    channel: Option<Arc<dyn NotificationChannel>>,
    default_registry: Arc<ExecutorRegistry>,
    registries: HashMap<String, Arc<ExecutorRegistry>>,
    config: EngineConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        default_registry: ExecutorRegistry,
    ) -> Self {
        let default_registry = Arc::new(default_registry);
        let mut registries = HashMap::new();
        registries.insert(
            default_registry.business_type().to_string(),
            default_registry.clone(),
        );
        Self {
            definitions,
            instances,
            channel: None,
            default_registry,
            registries,
            config: EngineConfig::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Engine with the task-assignment registry as default and an onboarding
    /// registry alongside it.
    pub fn with_builtins(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        directory: Arc<dyn OrgDirectory>,
        channel: Option<Arc<dyn NotificationChannel>>,
    ) -> Self {
        let deps = ExecutorDeps {
            directory,
            channel: channel.clone(),
        };
        let engine = Self::new(
            definitions,
            instances,
            ExecutorRegistry::task_assignment(deps.clone()),
        )
        .with_registry(ExecutorRegistry::onboarding(deps));
        match channel {
            Some(channel) => engine.with_channel(channel),
            None => engine,
        }
    }

    /// Channel for the notifications executors hand back with their work items.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Add a registry for the business type it is bound to.
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registries
            .insert(registry.business_type().to_string(), Arc::new(registry));
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_registry(&self) -> &ExecutorRegistry {
        &self.default_registry
    }

    pub fn default_business_type(&self) -> &str {
        self.default_registry.business_type()
    }

    fn registry_for(&self, business_type: &str) -> Arc<ExecutorRegistry> {
        self.registries
            .get(business_type)
            .cloned()
            .unwrap_or_else(|| self.default_registry.clone())
    }

    async fn lock_instance(&self, instance_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(instance_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn release_lock(&self, instance_id: &str) {
        self.locks.lock().await.remove(instance_id);
    }

    async fn load_instance(&self, instance_id: &str) -> WorkflowResult<WorkflowInstance> {
        self.instances
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.to_string()))
    }

    async fn load_definition(&self, workflow_id: &str) -> WorkflowResult<WorkflowDefinition> {
        self.definitions
            .get_definition(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(workflow_id.to_string()))
    }

    /// The definition version an instance was started on. Falls back to the
    /// latest copy for stores written before versions were kept.
    async fn definition_for(&self, instance: &WorkflowInstance) -> WorkflowResult<WorkflowDefinition> {
        if let Some(def) = self
            .definitions
            .get_definition_version(&instance.workflow_id, instance.workflow_version)
            .await?
        {
            return Ok(def);
        }
        warn!(
            instance_id = %instance.id,
            workflow_id = %instance.workflow_id,
            version = instance.workflow_version,
            "Definition version missing; using latest"
        );
        self.load_definition(&instance.workflow_id).await
    }

    /// Persist and adopt the version the store assigned.
    async fn save(&self, instance: &mut WorkflowInstance) -> WorkflowResult<()> {
        instance.updated_at = chrono::Utc::now();
        instance.version = self.instances.update_instance(instance).await?;
        Ok(())
    }

    // --- Lifecycle operations ---

    pub async fn start_workflow(&self, req: StartRequest) -> WorkflowResult<WorkflowInstance> {
        let def = self.load_definition(&req.workflow_id).await?;
        if !def.is_active {
            return Err(WorkflowError::DefinitionInactive(def.id));
        }
        let start_id = def
            .start_node()
            .map(|n| n.id.clone())
            .ok_or_else(|| WorkflowError::InvalidDefinition("workflow has no start node".into()))?;

        let business_type = if req.business_type.trim().is_empty() {
            self.default_business_type().to_string()
        } else {
            req.business_type
        };

        let mut variables = def.variables.clone();
        variables.extend(req.variables);

        let mut instance = WorkflowInstance::new(
            &def.id,
            def.version,
            &req.business_id,
            &business_type,
            &req.started_by,
            variables,
        );
        self.instances.create_instance(&instance).await?;
        let _guard = self.lock_instance(&instance.id).await;

        info!(
            instance_id = %instance.id,
            workflow_id = %def.id,
            business_id = %instance.business_id,
            business_type = %instance.business_type,
            "Starting workflow instance"
        );

        let registry = self.registry_for(&instance.business_type);
        let mut staged = StagedWork::default();
        if let Err(err) = self
            .run_cascade(&def, &mut instance, &registry, vec![(start_id, None)], &mut staged)
            .await
        {
            return Err(self.fail_instance(instance, err).await);
        }
        self.settle(&def, &mut instance, staged).await?;

        match self.instances.get_instance(&instance.id).await {
            Ok(Some(fresh)) => Ok(fresh),
            Ok(None) => Ok(instance),
            Err(e) => {
                warn!(instance_id = %instance.id, error = %e, "Re-read after start failed");
                Ok(instance)
            }
        }
    }

    pub async fn process_approval(&self, req: ApprovalRequest) -> WorkflowResult<ApprovalOutcome> {
        let _guard = self.lock_instance(&req.instance_id).await;

        let mut instance = self.load_instance(&req.instance_id).await?;
        if instance.status != InstanceStatus::Running {
            return Err(WorkflowError::NotRunning {
                instance_id: instance.id,
                status: instance.status,
            });
        }

        let def = self.definition_for(&instance).await?;
        let node = def
            .get_node(&req.node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound {
                workflow_id: def.id.clone(),
                node_id: req.node_id.clone(),
            })?;
        if !instance.is_active(&node.id) {
            return Err(WorkflowError::NodeNotActive(node.id.clone()));
        }
        if node.node_type() != NodeType::Approval {
            return Err(WorkflowError::InvalidAction(format!(
                "node '{}' is a {} node and takes no approval actions",
                node.id,
                node.node_type()
            )));
        }
        if req.action == ApprovalAction::View {
            return Err(WorkflowError::InvalidAction(
                "'view' is read-only and cannot be submitted".into(),
            ));
        }

        let result_label = match req.action {
            ApprovalAction::Approve => "approved",
            ApprovalAction::Reject => "rejected",
            ApprovalAction::Return => "returned",
            ApprovalAction::Delegate => "delegated",
            ApprovalAction::View => "viewed",
        };
        let mut entry = ExecutionHistory::new(
            &node.id,
            &node.name,
            &req.action.to_string(),
            &req.approved_by,
        );
        entry.result = result_label.to_string();
        entry.comment = req.comment.clone();
        entry.variables = req.variables.clone();
        instance.record(entry);

        instance.merge_variables(&req.variables);
        let action = serde_json::Value::String(req.action.to_string());
        instance.variables.insert("last_action".into(), action.clone());
        instance.variables.insert(
            "last_actor".into(),
            serde_json::Value::String(req.approved_by.clone()),
        );
        instance
            .variables
            .insert(format!("{}_result", node.id), action);

        info!(
            instance_id = %instance.id,
            node_id = %node.id,
            action = %req.action,
            actor = %req.approved_by,
            "Approval action received"
        );

        if req.action == ApprovalAction::Delegate {
            self.save(&mut instance).await?;
            return Ok(ApprovalOutcome {
                instance,
                next_nodes: Vec::new(),
                completed: false,
                message: format!("node '{}' delegated; approvals stay open", req.node_id),
            });
        }

        let next_nodes = def.targets_for_action(&node.id, req.action);
        instance.deactivate(&node.id);
        let mut staged = StagedWork::default();
        staged.clear(&node.id);

        // Runs even with no next nodes: a branch that just ended may release a join.
        let seeds = next_nodes
            .iter()
            .map(|n| (n.clone(), Some(node.id.clone())))
            .collect();
        let registry = self.registry_for(&instance.business_type);
        if let Err(err) = self
            .run_cascade(&def, &mut instance, &registry, seeds, &mut staged)
            .await
        {
            return Err(self.fail_instance(instance, err).await);
        }
        self.settle(&def, &mut instance, staged).await?;

        let completed = instance.status == InstanceStatus::Completed;
        let message = if completed {
            format!("{} on '{}'; workflow completed", result_label, req.node_id)
        } else if next_nodes.is_empty() {
            format!("{} on '{}'", result_label, req.node_id)
        } else {
            format!("{} on '{}'; moved to {}", result_label, req.node_id, next_nodes.join(", "))
        };

        Ok(ApprovalOutcome {
            instance,
            next_nodes,
            completed,
            message,
        })
    }

    pub async fn cancel_workflow(
        &self,
        instance_id: &str,
        reason: &str,
    ) -> WorkflowResult<WorkflowInstance> {
        let guard = self.lock_instance(instance_id).await;

        let mut instance = self.load_instance(instance_id).await?;
        if instance.status != InstanceStatus::Running {
            return Err(WorkflowError::NotRunning {
                instance_id: instance.id,
                status: instance.status,
            });
        }

        let mut entry = ExecutionHistory::new("", "", "cancel", SYSTEM_ACTOR);
        entry.result = "cancelled".into();
        entry.comment = reason.to_string();
        instance.record(entry);
        instance.finish(InstanceStatus::Cancelled);
        self.save(&mut instance).await?;

        let purged = self.instances.remove_pending_for_instance(&instance.id).await?;
        info!(instance_id = %instance.id, purged, reason = %reason, "Workflow instance cancelled");

        drop(guard);
        self.release_lock(&instance.id).await;
        Ok(instance)
    }

    // --- Queries ---

    pub async fn get_workflow_instance(&self, instance_id: &str) -> WorkflowResult<WorkflowInstance> {
        self.load_instance(instance_id).await
    }

    pub async fn get_pending_approvals(&self, user_id: &str) -> WorkflowResult<Vec<PendingApproval>> {
        Ok(self.instances.pending_for_user(user_id).await?)
    }

    pub async fn get_history(&self, instance_id: &str) -> WorkflowResult<Vec<ExecutionHistory>> {
        Ok(self.load_instance(instance_id).await?.history)
    }

    pub async fn list_instances(
        &self,
        status: Option<InstanceStatus>,
    ) -> WorkflowResult<Vec<WorkflowInstance>> {
        Ok(self.instances.list_instances(status).await?)
    }

    // --- Cascade ---

    /// Execute nodes breadth-first from `seeds` until every branch waits or ends.
    /// When the queue drains, joins no active branch can reach any more are
    /// re-run without a predecessor, which releases them.
    async fn run_cascade(
        &self,
        def: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        registry: &ExecutorRegistry,
        seeds: Vec<(String, Option<String>)>,
        staged: &mut StagedWork,
    ) -> WorkflowResult<()> {
        let mut queue: VecDeque<(String, Option<String>)> = seeds.into();
        let mut steps = 0usize;

        loop {
            if Self::end_reached(def, instance) {
                break;
            }
            let Some((node_id, arrived_from)) = queue.pop_front() else {
                let stranded = Self::stranded_joins(def, instance);
                if stranded.is_empty() {
                    break;
                }
                for join in stranded {
                    info!(
                        instance_id = %instance.id,
                        node_id = %join,
                        "Releasing join; no active branch can reach it"
                    );
                    queue.push_back((join, None));
                }
                continue;
            };
            steps += 1;
            if steps > self.config.max_cascade_steps {
                return Err(WorkflowError::CascadeLimit(self.config.max_cascade_steps));
            }

            let node = def
                .get_node(&node_id)
                .ok_or_else(|| WorkflowError::NodeNotFound {
                    workflow_id: def.id.clone(),
                    node_id: node_id.clone(),
                })?;
            let executor = registry
                .get(node.node_type())
                .ok_or_else(|| WorkflowError::NodeFailed {
                    node_id: node.id.clone(),
                    message: format!("no executor registered for '{}'", node.node_type()),
                })?;

            instance.activate(&node.id);
            if matches!(node.kind, NodeKind::Join(_))
                && let Some(from) = &arrived_from
            {
                instance
                    .join_arrivals
                    .entry(node.id.clone())
                    .or_default()
                    .insert(from.clone());
            }

            let started = Instant::now();
            let ctx = NodeContext {
                instance: &*instance,
                node,
                definition: def,
                arrived_from: arrived_from.as_deref(),
            };
            let result = executor.execute(&ctx).await.map_err(|e| match e.downcast::<WorkflowError>() {
                Ok(err) => err,
                Err(other) => WorkflowError::NodeFailed {
                    node_id: node.id.clone(),
                    message: format!("{:#}", other),
                },
            })?;
            let duration_ms = started.elapsed().as_millis() as i64;

            if !result.success {
                return Err(WorkflowError::NodeFailed {
                    node_id: node.id.clone(),
                    message: result.message,
                });
            }

            instance.merge_variables(&result.variables);
            // A re-entered node never keeps its old work items.
            staged.clear(&node.id);
            staged.rows.extend(result.pending);
            staged.notifications.extend(result.notifications);
            let mut entry = ExecutionHistory::new(&node.id, &node.name, "execute", SYSTEM_ACTOR);
            entry.result = if result.wait_for_user { "waiting" } else { "completed" }.into();
            entry.comment = result.message;
            entry.variables = result.variables;
            entry.duration_ms = duration_ms;
            instance.record(entry);

            if result.wait_for_user {
                continue;
            }

            instance.deactivate(&node.id);
            instance.join_arrivals.remove(&node.id);
            for next in result.next_nodes {
                queue.push_back((next, Some(node.id.clone())));
            }
        }

        Ok(())
    }

    fn end_reached(def: &WorkflowDefinition, instance: &WorkflowInstance) -> bool {
        instance
            .current_nodes
            .iter()
            .any(|id| def.get_node(id).is_some_and(|n| n.node_type() == NodeType::End))
    }

    /// Active joins that no other active node can still reach.
    fn stranded_joins(def: &WorkflowDefinition, instance: &WorkflowInstance) -> Vec<String> {
        instance
            .current_nodes
            .iter()
            .filter(|id| {
                def.get_node(id)
                    .is_some_and(|n| matches!(n.kind, NodeKind::Join(_)))
            })
            .filter(|join| {
                !instance
                    .current_nodes
                    .iter()
                    .filter(|other| other != join)
                    .any(|other| def.reachable_from(other).contains(join.as_str()))
            })
            .cloned()
            .collect()
    }

    fn is_complete(def: &WorkflowDefinition, instance: &WorkflowInstance) -> bool {
        instance.current_nodes.is_empty() || Self::end_reached(def, instance)
    }

    /// Apply the completion check and persist. Staged work items reach the
    /// store only once the save succeeds; a finished instance keeps none.
    async fn settle(
        &self,
        def: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        staged: StagedWork,
    ) -> WorkflowResult<()> {
        let completed = instance.status == InstanceStatus::Running && Self::is_complete(def, instance);
        if completed {
            instance.finish(InstanceStatus::Completed);
        }
        self.save(instance).await?;

        if completed {
            self.instances.remove_pending_for_instance(&instance.id).await?;
            self.release_lock(&instance.id).await;
            info!(instance_id = %instance.id, "Workflow instance completed");
            return Ok(());
        }

        for node_id in &staged.cleared {
            self.instances.remove_pending(&instance.id, node_id).await?;
        }
        for row in &staged.rows {
            self.instances.add_pending(row).await?;
        }
        if let Some(channel) = &self.channel {
            for notification in &staged.notifications {
                send_best_effort(channel.as_ref(), notification).await;
            }
        }
        Ok(())
    }

    /// Mark the instance failed after an executor error and hand the error back.
    async fn fail_instance(&self, mut instance: WorkflowInstance, err: WorkflowError) -> WorkflowError {
        error!(instance_id = %instance.id, error = %err, "Workflow instance failed");

        let node_id = match &err {
            WorkflowError::NodeFailed { node_id, .. } | WorkflowError::NoApprovers { node_id, .. } => {
                node_id.clone()
            }
            _ => String::new(),
        };
        let mut entry = ExecutionHistory::new(&node_id, "", "fail", SYSTEM_ACTOR);
        entry.result = "failed".into();
        entry.comment = err.to_string();
        instance.record(entry);
        instance.finish(InstanceStatus::Failed);

        if let Err(e) = self.save(&mut instance).await {
            warn!(instance_id = %instance.id, error = %e, "Could not persist failed instance");
        }
        if let Err(e) = self.instances.remove_pending_for_instance(&instance.id).await {
            warn!(instance_id = %instance.id, error = %e, "Could not purge pending approvals");
        }
        self.release_lock(&instance.id).await;
        err
    }
}

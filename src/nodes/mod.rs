pub mod approvers;
pub mod builtin;
pub mod business;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::directory::OrgDirectory;
use crate::engine::definition::{NodeType, WorkflowDefinition, WorkflowNode};
use crate::engine::types::{PendingApproval, Variables, WorkflowInstance};
use crate::notify::{Notification, NotificationChannel};
use crate::nodes::business::{BusinessContext, OnboardingContext, TaskAssignmentContext};

/// Everything an executor may look at when control reaches a node.
pub struct NodeContext<'a> {
    pub instance: &'a WorkflowInstance,
    pub node: &'a WorkflowNode,
    pub definition: &'a WorkflowDefinition,
    /// Node whose completion led here; `None` for the start node.
    pub arrived_from: Option<&'a str>,
}

/// Outcome of running one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub next_nodes: Vec<String>,
    /// Merged into the instance variables.
    pub variables: Variables,
    pub message: String,
    /// Stop the cascade here; the node stays active until acted on.
    pub wait_for_user: bool,
    /// Work items for this node. The engine writes them, replacing any the
    /// node already had, only after the instance itself has been saved.
    pub pending: Vec<PendingApproval>,
    /// Delivered alongside `pending`, after the save.
    pub notifications: Vec<Notification>,
}

impl ExecutionResult {
    pub fn advance(next_nodes: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            next_nodes,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn wait(message: impl Into<String>) -> Self {
        Self {
            success: true,
            wait_for_user: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_pending(mut self, pending: Vec<PendingApproval>) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_notifications(mut self, notifications: Vec<Notification>) -> Self {
        self.notifications = notifications;
        self
    }
}

/// Trait every node executor implements.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Human-readable description.
    fn description(&self) -> &str;

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult>;
}

/// Collaborators the built-in executors need.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub directory: Arc<dyn OrgDirectory>,
    pub channel: Option<Arc<dyn NotificationChannel>>,
}

/// Node type → executor, bound to one business type.
pub struct ExecutorRegistry {
    business_type: String,
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new(business_type: &str) -> Self {
        Self {
            business_type: business_type.to_string(),
            executors: HashMap::new(),
        }
    }

    /// Registry with every built-in executor, approvals labelled by `business`.
    pub fn with_builtins(deps: ExecutorDeps, business: Arc<dyn BusinessContext>) -> Self {
        let mut registry = Self::new(business.business_type());
        builtin::register_all(&mut registry, deps, business);
        registry
    }

    pub fn task_assignment(deps: ExecutorDeps) -> Self {
        Self::with_builtins(deps, Arc::new(TaskAssignmentContext))
    }

    pub fn onboarding(deps: ExecutorDeps) -> Self {
        Self::with_builtins(deps, Arc::new(OnboardingContext))
    }

    pub fn business_type(&self) -> &str {
        &self.business_type
    }

    /// Register an executor, replacing any previous one for its node type.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(executor.node_type(), executor);
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    /// List all registered node types with descriptions.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .executors
            .values()
            .map(|e| (e.node_type().as_str(), e.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }
}

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instance variables: a JSON-compatible key-value bag carried between nodes.
pub type Variables = HashMap<String, serde_json::Value>;

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
    /// Reserved; no transition currently enters it.
    Suspended,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Cancelled | InstanceStatus::Failed
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Completed => write!(f, "completed"),
            InstanceStatus::Cancelled => write!(f, "cancelled"),
            InstanceStatus::Failed => write!(f, "failed"),
            InstanceStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "completed" => Ok(InstanceStatus::Completed),
            "cancelled" => Ok(InstanceStatus::Cancelled),
            "failed" => Ok(InstanceStatus::Failed),
            "suspended" => Ok(InstanceStatus::Suspended),
            _ => Err(format!(
                "Invalid status '{}'. Use: running, completed, cancelled, failed, suspended",
                s
            )),
        }
    }
}

/// Action a user takes on a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Reject,
    Return,
    Delegate,
    /// Read-only access for stakeholders; never processed by the engine.
    View,
}

impl std::fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalAction::Approve => write!(f, "approve"),
            ApprovalAction::Reject => write!(f, "reject"),
            ApprovalAction::Return => write!(f, "return"),
            ApprovalAction::Delegate => write!(f, "delegate"),
            ApprovalAction::View => write!(f, "view"),
        }
    }
}

impl std::str::FromStr for ApprovalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ApprovalAction::Approve),
            "reject" => Ok(ApprovalAction::Reject),
            "return" => Ok(ApprovalAction::Return),
            "delegate" => Ok(ApprovalAction::Delegate),
            "view" => Ok(ApprovalAction::View),
            _ => Err(format!(
                "Invalid action '{}'. Use: approve, reject, return, delegate",
                s
            )),
        }
    }
}

/// One immutable entry in an instance's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHistory {
    pub id: String,
    pub node_id: String,
    pub node_name: String,
    pub action: String,
    pub result: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub variables: Variables,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: i64,
}

impl ExecutionHistory {
    pub fn new(node_id: &str, node_name: &str, action: &str, actor: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            action: action.to_string(),
            result: String::new(),
            comment: String::new(),
            variables: Variables::new(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Runtime record of one execution of a definition against a business object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_version: u32,
    pub business_id: String,
    pub business_type: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub current_nodes: Vec<String>,
    #[serde(default)]
    pub variables: Variables,
    pub started_by: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<ExecutionHistory>,
    /// Join node id → predecessors that have reached it so far.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub join_arrivals: HashMap<String, BTreeSet<String>>,
    /// Optimistic concurrency token, bumped by the store on every update.
    #[serde(default)]
    pub version: u64,
}

impl WorkflowInstance {
    pub fn new(
        workflow_id: &str,
        workflow_version: u32,
        business_id: &str,
        business_type: &str,
        started_by: &str,
        variables: Variables,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_version,
            business_id: business_id.to_string(),
            business_type: business_type.to_string(),
            status: InstanceStatus::Running,
            current_nodes: Vec::new(),
            variables,
            started_by: started_by.to_string(),
            started_at: now,
            completed_at: None,
            updated_at: now,
            history: Vec::new(),
            join_arrivals: HashMap::new(),
            version: 0,
        }
    }

    pub fn is_active(&self, node_id: &str) -> bool {
        self.current_nodes.iter().any(|n| n == node_id)
    }

    /// Add a node to the active frontier, keeping it duplicate-free.
    pub fn activate(&mut self, node_id: &str) {
        if !self.is_active(node_id) {
            self.current_nodes.push(node_id.to_string());
        }
    }

    pub fn deactivate(&mut self, node_id: &str) {
        self.current_nodes.retain(|n| n != node_id);
    }

    pub fn merge_variables(&mut self, vars: &Variables) {
        for (k, v) in vars {
            self.variables.insert(k.clone(), v.clone());
        }
    }

    pub fn record(&mut self, entry: ExecutionHistory) {
        self.history.push(entry);
    }

    pub fn finish(&mut self, status: InstanceStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

/// A work item: "user X may act on node Y of instance Z".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub instance_id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub node_name: String,
    pub assigned_to: String,
    pub business_id: String,
    pub business_type: String,
    #[serde(default)]
    pub business_data: serde_json::Map<String, serde_json::Value>,
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub can_delegate: bool,
    pub required_actions: Vec<ApprovalAction>,
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    /// True when the assignee can decide, not just observe.
    pub fn is_actionable(&self) -> bool {
        self.required_actions
            .iter()
            .any(|a| *a != ApprovalAction::View)
    }
}

//! Workflow definition model.
//!
//! A definition is a directed graph of typed nodes. On the wire every node is
//! `{id, type, name, config}`; the config is parsed into the variant for its
//! type while deserializing, so a definition held in memory always carries a
//! well-typed config per node.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::engine::types::{ApprovalAction, Variables};

pub const LABEL_APPROVED: &str = "approved";
pub const LABEL_REJECTED: &str = "rejected";
pub const LABEL_DEFAULT: &str = "default";

/// Node type identifiers, also used as executor registry keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Start,
    End,
    Approval,
    Condition,
    Parallel,
    Join,
    Script,
    Notify,
}

impl NodeType {
    pub const ALL: [NodeType; 8] = [
        NodeType::Start,
        NodeType::End,
        NodeType::Approval,
        NodeType::Condition,
        NodeType::Parallel,
        NodeType::Join,
        NodeType::Script,
        NodeType::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::End => "end",
            NodeType::Approval => "approval",
            NodeType::Condition => "condition",
            NodeType::Parallel => "parallel",
            NodeType::Join => "join",
            NodeType::Script => "script",
            NodeType::Notify => "notify",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One approver reference inside an approval node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignee {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub value: String,
    /// User id to fall back on when `value` resolves to nobody.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_string_or_number"
    )]
    pub backup: Option<String>,
}

impl Assignee {
    pub fn new(kind: &str, value: &str) -> Self {
        Self {
            kind: kind.to_string(),
            value: value.to_string(),
            backup: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawApprovalConfig")]
pub struct ApprovalConfig {
    pub assignees: Vec<Assignee>,
    /// Hours from node activation until the approval is due.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    pub auto_approve: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    pub can_delegate: bool,
}

/// Accepts both the `assignees` list and the legacy flat single-assignee shape.
#[derive(Deserialize)]
struct RawApprovalConfig {
    #[serde(default)]
    assignee_type: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    assignee_value: Option<String>,
    #[serde(default)]
    assignees: Vec<Assignee>,
    #[serde(default)]
    timeout: Option<u32>,
    #[serde(default)]
    auto_approve: bool,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    can_delegate: bool,
}

impl From<RawApprovalConfig> for ApprovalConfig {
    fn from(raw: RawApprovalConfig) -> Self {
        let mut assignees = raw.assignees;
        if assignees.is_empty()
            && let (Some(kind), Some(value)) = (raw.assignee_type, raw.assignee_value)
            && kind != "multiple"
        {
            assignees.push(Assignee {
                kind,
                value,
                backup: None,
            });
        }
        Self {
            assignees,
            timeout: raw.timeout,
            auto_approve: raw.auto_approve,
            priority: raw.priority,
            can_delegate: raw.can_delegate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(default, alias = "rules")]
    pub conditions: Vec<ConditionRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Explicit fan-out targets; empty means every outgoing edge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Distinct arrivals required; defaults to the number of incoming edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Variables::is_empty")]
    pub set: Variables,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(rename = "type", default)]
    pub notification_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

/// Node behaviour plus its type-specific configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Start,
    End,
    Approval(ApprovalConfig),
    Condition(ConditionConfig),
    Parallel(ParallelConfig),
    Join(JoinConfig),
    Script(ScriptConfig),
    Notify(Option<NotifyConfig>),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Start => NodeType::Start,
            NodeKind::End => NodeType::End,
            NodeKind::Approval(_) => NodeType::Approval,
            NodeKind::Condition(_) => NodeType::Condition,
            NodeKind::Parallel(_) => NodeType::Parallel,
            NodeKind::Join(_) => NodeType::Join,
            NodeKind::Script(_) => NodeType::Script,
            NodeKind::Notify(_) => NodeType::Notify,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
}

impl WorkflowNode {
    pub fn new(id: &str, name: &str, kind: NodeKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    node_type: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    config: serde_json::Value,
}

fn parse_config<T: DeserializeOwned + Default>(
    node_id: &str,
    config: serde_json::Value,
) -> Result<T, String> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config)
        .map_err(|e| format!("node '{}' has an invalid config: {}", node_id, e))
}

impl TryFrom<RawNode> for WorkflowNode {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let id = raw.id;
        let kind = match raw.node_type.trim() {
            "start" => NodeKind::Start,
            "end" => NodeKind::End,
            "approval" => NodeKind::Approval(parse_config(&id, raw.config)?),
            "condition" => NodeKind::Condition(parse_config(&id, raw.config)?),
            "parallel" => NodeKind::Parallel(parse_config(&id, raw.config)?),
            "join" => NodeKind::Join(parse_config(&id, raw.config)?),
            "script" => NodeKind::Script(parse_config(&id, raw.config)?),
            "notify" => {
                if raw.config.is_null() {
                    NodeKind::Notify(None)
                } else {
                    NodeKind::Notify(Some(parse_config(&id, raw.config)?))
                }
            }
            "" => return Err(format!("node '{}' has an empty type", id)),
            other => return Err(format!("node '{}' has unknown type '{}'", id, other)),
        };
        Ok(Self {
            id,
            name: raw.name,
            kind,
        })
    }
}

impl From<WorkflowNode> for RawNode {
    fn from(node: WorkflowNode) -> Self {
        let node_type = node.node_type().as_str().to_string();
        let config = match node.kind {
            NodeKind::Start | NodeKind::End | NodeKind::Notify(None) => serde_json::Value::Null,
            NodeKind::Approval(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Condition(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Parallel(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Join(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Script(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Notify(Some(c)) => serde_json::to_value(c).unwrap_or_default(),
        };
        Self {
            id: node.id,
            node_type,
            name: node.name,
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default)]
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl WorkflowEdge {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            id: format!("{}->{}", from, to),
            from: from.to_string(),
            to: to.to_string(),
            condition: None,
        }
    }

    pub fn labelled(from: &str, to: &str, condition: &str) -> Self {
        Self {
            condition: Some(condition.to_string()),
            ..Self::new(from, to)
        }
    }

    /// The branch label, ignoring blank strings.
    pub fn label(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label().is_some_and(|l| l.eq_ignore_ascii_case(label))
    }
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// A named, versioned approval process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(id: &str, name: &str, nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            version: 1,
            nodes,
            edges,
            variables: Variables::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get_node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn start_node(&self) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_type() == NodeType::Start)
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.to == node_id)
    }

    /// Every outgoing target, in edge order, without duplicates.
    pub fn successors(&self, node_id: &str) -> Vec<String> {
        dedup(self.outgoing(node_id).map(|e| e.to.clone()))
    }

    /// Targets reached from `node_id` when a user takes `action` on it.
    pub fn targets_for_action(&self, node_id: &str, action: ApprovalAction) -> Vec<String> {
        let outgoing: Vec<&WorkflowEdge> = self.outgoing(node_id).collect();
        match action {
            ApprovalAction::Approve => {
                let approved = dedup(
                    outgoing
                        .iter()
                        .filter(|e| e.has_label(LABEL_APPROVED))
                        .map(|e| e.to.clone()),
                );
                if !approved.is_empty() {
                    return approved;
                }
                if outgoing.iter().all(|e| e.label().is_none()) {
                    return outgoing.first().map(|e| vec![e.to.clone()]).unwrap_or_default();
                }
                dedup(
                    outgoing
                        .iter()
                        .filter(|e| e.label().is_none())
                        .map(|e| e.to.clone()),
                )
            }
            ApprovalAction::Reject => dedup(
                outgoing
                    .iter()
                    .filter(|e| e.has_label(LABEL_REJECTED))
                    .map(|e| e.to.clone()),
            ),
            ApprovalAction::Return => dedup(self.incoming(node_id).map(|e| e.from.clone())),
            ApprovalAction::Delegate | ApprovalAction::View => Vec::new(),
        }
    }

    /// Every node reachable from `start` (itself included), following edges
    /// plus condition rule targets and parallel branches.
    pub fn reachable_from<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        }
        for node in &self.nodes {
            let extra: Vec<&str> = match &node.kind {
                NodeKind::Condition(c) => c.conditions.iter().map(|r| r.target.as_str()).collect(),
                NodeKind::Parallel(p) => p.branches.iter().map(String::as_str).collect(),
                _ => continue,
            };
            adjacency.entry(node.id.as_str()).or_default().extend(extra);
        }

        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(next) = adjacency.get(id) {
                stack.extend(next.iter().copied().filter(|n| !visited.contains(n)));
            }
        }
        visited
    }

    /// Outgoing targets on edges explicitly labelled `default`.
    pub fn default_targets(&self, node_id: &str) -> Vec<String> {
        dedup(
            self.outgoing(node_id)
                .filter(|e| e.has_label(LABEL_DEFAULT))
                .map(|e| e.to.clone()),
        )
    }
}

/// Partial update applied by `DefinitionManager::update_workflow`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<WorkflowNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<WorkflowEdge>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Variables>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl WorkflowPatch {
    pub fn apply_to(self, def: &mut WorkflowDefinition) {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(description) = self.description {
            def.description = description;
        }
        if let Some(nodes) = self.nodes {
            def.nodes = nodes;
        }
        if let Some(edges) = self.edges {
            def.edges = edges;
        }
        if let Some(variables) = self.variables {
            def.variables = variables;
        }
        if let Some(active) = self.is_active {
            def.is_active = active;
        }
    }
}

fn dedup(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string_or_number(deserializer)?.unwrap_or_default())
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

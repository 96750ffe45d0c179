//! Structural validation of workflow definitions.
//!
//! Checks run in a fixed order and stop at the first violation.

use std::collections::HashSet;

use crate::engine::definition::{NodeKind, NodeType, WorkflowDefinition};
use crate::error::{WorkflowError, WorkflowResult};

pub fn validate_definition(def: &WorkflowDefinition) -> WorkflowResult<()> {
    if def.id.trim().is_empty() {
        return invalid("workflow id is empty");
    }
    if def.name.trim().is_empty() {
        return invalid("workflow name is empty");
    }
    if def.nodes.is_empty() {
        return invalid("workflow has no nodes");
    }

    let mut ids: HashSet<&str> = HashSet::new();
    for node in &def.nodes {
        if node.id.trim().is_empty() {
            return invalid("node with an empty id");
        }
        if node.name.trim().is_empty() {
            return invalid(format!("node '{}' has an empty name", node.id));
        }
        if !ids.insert(node.id.as_str()) {
            return invalid(format!("duplicate node id '{}'", node.id));
        }
    }

    let starts: Vec<&str> = def
        .nodes
        .iter()
        .filter(|n| n.node_type() == NodeType::Start)
        .map(|n| n.id.as_str())
        .collect();
    match starts.len() {
        0 => return invalid("workflow has no start node"),
        1 => {}
        _ => return invalid(format!("workflow has {} start nodes; exactly one is allowed", starts.len())),
    }
    if !def.nodes.iter().any(|n| n.node_type() == NodeType::End) {
        return invalid("workflow has no end node");
    }

    for edge in &def.edges {
        if !ids.contains(edge.from.as_str()) {
            return invalid(format!("edge '{}' starts at unknown node '{}'", edge.id, edge.from));
        }
        if !ids.contains(edge.to.as_str()) {
            return invalid(format!("edge '{}' points to unknown node '{}'", edge.id, edge.to));
        }
    }

    let reached = def.reachable_from(starts[0]);
    if let Some(node) = def.nodes.iter().find(|n| !reached.contains(n.id.as_str())) {
        return invalid(format!("node '{}' is unreachable from the start node", node.id));
    }

    for node in &def.nodes {
        match &node.kind {
            NodeKind::Approval(config) => {
                if config.assignees.is_empty() {
                    return invalid(format!("approval node '{}' has no assignees", node.id));
                }
                for assignee in &config.assignees {
                    if assignee.kind.trim().is_empty() || assignee.value.trim().is_empty() {
                        return invalid(format!(
                            "approval node '{}' has an assignee without type or value",
                            node.id
                        ));
                    }
                }
            }
            NodeKind::Condition(config) => {
                if config.conditions.is_empty() {
                    return invalid(format!("condition node '{}' has no conditions", node.id));
                }
                for rule in &config.conditions {
                    if rule.expression.trim().is_empty() || rule.target.trim().is_empty() {
                        return invalid(format!(
                            "condition node '{}' has a rule without expression or target",
                            node.id
                        ));
                    }
                    if !ids.contains(rule.target.as_str()) {
                        return invalid(format!(
                            "condition node '{}' targets unknown node '{}'",
                            node.id, rule.target
                        ));
                    }
                }
            }
            NodeKind::Parallel(config) => {
                if let Some(branch) = config.branches.iter().find(|b| !ids.contains(b.as_str())) {
                    return invalid(format!(
                        "parallel node '{}' branches to unknown node '{}'",
                        node.id, branch
                    ));
                }
            }
            NodeKind::Notify(Some(config)) if config.notification_type.trim().is_empty() => {
                return invalid(format!("notify node '{}' has no notification type", node.id));
            }
            _ => {}
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> WorkflowResult<()> {
    Err(WorkflowError::InvalidDefinition(message.into()))
}

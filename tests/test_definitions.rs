//! Tests for definition parsing, validation and the definition manager.

use std::sync::Arc;

use hrflow::engine::DefinitionManager;
use hrflow::engine::definition::*;
use hrflow::engine::validate::validate_definition;
use hrflow::error::WorkflowError;
use hrflow::storage::memory_store::MemoryStore;

fn approval(id: &str, kind: &str, value: &str) -> WorkflowNode {
    WorkflowNode::new(
        id,
        id,
        NodeKind::Approval(ApprovalConfig {
            assignees: vec![Assignee::new(kind, value)],
            ..Default::default()
        }),
    )
}

fn simple_def(id: &str) -> WorkflowDefinition {
    WorkflowDefinition::new(
        id,
        "Simple approval",
        vec![
            WorkflowNode::new("start", "Start", NodeKind::Start),
            approval("review", "starter", "-"),
            WorkflowNode::new("end", "End", NodeKind::End),
        ],
        vec![
            WorkflowEdge::new("start", "review"),
            WorkflowEdge::new("review", "end"),
        ],
    )
}

fn invalid_message(def: &WorkflowDefinition) -> String {
    match validate_definition(def) {
        Err(WorkflowError::InvalidDefinition(msg)) => msg,
        other => panic!("expected InvalidDefinition, got {:?}", other),
    }
}

// --- Validation ---

#[test]
fn valid_definition_passes() {
    assert!(validate_definition(&simple_def("wf")).is_ok());
}

#[test]
fn rejects_empty_id_and_name() {
    let mut def = simple_def("");
    assert!(invalid_message(&def).contains("id"));

    def.id = "wf".into();
    def.name = " ".into();
    assert!(invalid_message(&def).contains("name"));
}

#[test]
fn rejects_missing_start_or_end() {
    let mut def = simple_def("wf");
    def.nodes.retain(|n| n.node_type() != NodeType::Start);
    def.edges.retain(|e| e.from != "start");
    assert!(invalid_message(&def).contains("no start node"));

    let mut def = simple_def("wf");
    def.nodes.retain(|n| n.node_type() != NodeType::End);
    def.edges.retain(|e| e.to != "end");
    assert!(invalid_message(&def).contains("no end node"));
}

#[test]
fn rejects_two_start_nodes() {
    let mut def = simple_def("wf");
    def.nodes
        .push(WorkflowNode::new("start2", "Second start", NodeKind::Start));
    def.edges.push(WorkflowEdge::new("start2", "review"));
    assert!(invalid_message(&def).contains("start nodes"));
}

#[test]
fn rejects_duplicate_node_ids() {
    let mut def = simple_def("wf");
    def.nodes.push(approval("review", "user", "1"));
    assert!(invalid_message(&def).contains("duplicate node id 'review'"));
}

#[test]
fn rejects_dangling_edge() {
    let mut def = simple_def("wf");
    def.edges.push(WorkflowEdge::new("review", "ghost"));
    assert!(invalid_message(&def).contains("ghost"));
}

#[test]
fn rejects_unreachable_node() {
    let mut def = simple_def("wf");
    def.nodes.push(approval("island", "user", "1"));
    def.edges.push(WorkflowEdge::new("island", "end"));
    assert!(invalid_message(&def).contains("'island' is unreachable"));
}

#[test]
fn rejects_approval_without_assignees() {
    let mut def = simple_def("wf");
    def.nodes[1] = WorkflowNode::new("review", "Review", NodeKind::Approval(ApprovalConfig::default()));
    assert!(invalid_message(&def).contains("no assignees"));
}

#[test]
fn rejects_condition_without_rules_or_with_unknown_target() {
    let mut def = simple_def("wf");
    def.nodes.push(WorkflowNode::new(
        "route",
        "Route",
        NodeKind::Condition(ConditionConfig::default()),
    ));
    def.edges.push(WorkflowEdge::new("review", "route"));
    def.edges.push(WorkflowEdge::new("route", "end"));
    assert!(invalid_message(&def).contains("no conditions"));

    def.nodes[3] = WorkflowNode::new(
        "route",
        "Route",
        NodeKind::Condition(ConditionConfig {
            conditions: vec![ConditionRule {
                expression: "score > 1".into(),
                target: "nowhere".into(),
                priority: 0,
            }],
        }),
    );
    assert!(invalid_message(&def).contains("nowhere"));
}

#[test]
fn rejects_notify_without_type() {
    let mut def = simple_def("wf");
    def.nodes.push(WorkflowNode::new(
        "mail",
        "Mail",
        NodeKind::Notify(Some(NotifyConfig::default())),
    ));
    def.edges.push(WorkflowEdge::new("review", "mail"));
    def.edges.push(WorkflowEdge::new("mail", "end"));
    assert!(invalid_message(&def).contains("notification type"));
}

#[test]
fn condition_targets_count_for_reachability() {
    let def = WorkflowDefinition::new(
        "wf",
        "Conditional",
        vec![
            WorkflowNode::new("start", "Start", NodeKind::Start),
            WorkflowNode::new(
                "route",
                "Route",
                NodeKind::Condition(ConditionConfig {
                    conditions: vec![ConditionRule {
                        expression: "priority == high".into(),
                        target: "fast".into(),
                        priority: 1,
                    }],
                }),
            ),
            approval("fast", "user", "1"),
            WorkflowNode::new("end", "End", NodeKind::End),
        ],
        vec![
            WorkflowEdge::new("start", "route"),
            WorkflowEdge::new("route", "end"),
            WorkflowEdge::new("fast", "end"),
        ],
    );
    assert!(validate_definition(&def).is_ok());
}

// --- Wire format ---

#[test]
fn parses_wire_format_with_legacy_assignee() {
    let json = serde_json::json!({
        "id": "legacy",
        "name": "Legacy",
        "nodes": [
            {"id": "start", "type": "start", "name": "Start"},
            {"id": "mgr", "type": "approval", "name": "Manager",
             "config": {"assignee_type": "user", "assignee_value": 42, "timeout": 24}},
            {"id": "end", "type": "end", "name": "End"}
        ],
        "edges": [
            {"id": "e1", "from": "start", "to": "mgr"},
            {"id": "e2", "from": "mgr", "to": "end", "condition": "approved"}
        ]
    });

    let def: WorkflowDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(def.version, 1);
    assert!(def.is_active);

    let NodeKind::Approval(config) = &def.get_node("mgr").unwrap().kind else {
        panic!("expected approval node");
    };
    assert_eq!(config.assignees, vec![Assignee::new("user", "42")]);
    assert_eq!(config.timeout, Some(24));
    assert!(validate_definition(&def).is_ok());
}

#[test]
fn parses_assignee_list_from_yaml() {
    let yaml = r#"
id: onboarding
name: Onboarding
nodes:
  - { id: start, type: start, name: Start }
  - id: hr
    type: approval
    name: HR review
    config:
      assignee_type: multiple
      assignees:
        - { type: role, value: hr, backup: "99" }
        - { type: manager, value: direct }
      can_delegate: true
  - { id: end, type: end, name: End }
edges:
  - { from: start, to: hr }
  - { from: hr, to: end }
"#;
    let def: WorkflowDefinition = serde_yml::from_str(yaml).unwrap();
    let NodeKind::Approval(config) = &def.get_node("hr").unwrap().kind else {
        panic!("expected approval node");
    };
    assert_eq!(config.assignees.len(), 2);
    assert_eq!(config.assignees[0].backup.as_deref(), Some("99"));
    assert!(config.can_delegate);
}

#[test]
fn unknown_node_type_is_a_parse_error() {
    let json = serde_json::json!({
        "id": "bad", "name": "Bad",
        "nodes": [{"id": "x", "type": "teleport", "name": "X"}]
    });
    let err = serde_json::from_value::<WorkflowDefinition>(json).unwrap_err();
    assert!(err.to_string().contains("unknown type 'teleport'"));
}

#[test]
fn reload_gives_same_validation_result() {
    let good = simple_def("wf");
    let mut bad = simple_def("wf");
    bad.edges.push(WorkflowEdge::new("review", "ghost"));

    for def in [good, bad] {
        let json = serde_json::to_string(&def).unwrap();
        let reloaded: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, def);
        assert_eq!(
            validate_definition(&reloaded).is_ok(),
            validate_definition(&def).is_ok()
        );
    }
}

// --- Branch resolution ---

#[test]
fn approve_targets_prefer_approved_label() {
    let mut def = simple_def("wf");
    def.nodes.push(WorkflowNode::new("rejected_end", "Rejected", NodeKind::End));
    def.edges = vec![
        WorkflowEdge::new("start", "review"),
        WorkflowEdge::labelled("review", "rejected_end", "rejected"),
        WorkflowEdge::labelled("review", "end", "approved"),
    ];

    assert_eq!(
        def.targets_for_action("review", hrflow::engine::types::ApprovalAction::Approve),
        vec!["end"]
    );
    assert_eq!(
        def.targets_for_action("review", hrflow::engine::types::ApprovalAction::Reject),
        vec!["rejected_end"]
    );
    assert_eq!(
        def.targets_for_action("review", hrflow::engine::types::ApprovalAction::Return),
        vec!["start"]
    );
}

#[test]
fn approve_targets_fall_back_to_unlabelled_edges() {
    let mut def = simple_def("wf");
    def.nodes.push(WorkflowNode::new("rejected_end", "Rejected", NodeKind::End));
    def.edges = vec![
        WorkflowEdge::new("start", "review"),
        WorkflowEdge::labelled("review", "rejected_end", "rejected"),
        WorkflowEdge::new("review", "end"),
    ];
    assert_eq!(
        def.targets_for_action("review", hrflow::engine::types::ApprovalAction::Approve),
        vec!["end"]
    );
}

// --- Manager ---

fn manager() -> DefinitionManager {
    DefinitionManager::new(Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn create_sets_version_and_rejects_duplicates() {
    let mgr = manager();
    let mut def = simple_def("wf");
    def.version = 7;
    def.is_active = false;

    let created = mgr.create_workflow(def.clone()).await.unwrap();
    assert_eq!(created.version, 1);
    assert!(created.is_active);

    let err = mgr.create_workflow(def).await.unwrap_err();
    assert!(matches!(err, WorkflowError::DefinitionExists(id) if id == "wf"));
}

#[tokio::test]
async fn create_rejects_invalid_and_saves_nothing() {
    let mgr = manager();
    let mut def = simple_def("wf");
    def.edges.clear();

    assert!(matches!(
        mgr.create_workflow(def).await,
        Err(WorkflowError::InvalidDefinition(_))
    ));
    assert!(mgr.list_workflows(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn update_bumps_version_and_validates_merge() {
    let mgr = manager();
    mgr.create_workflow(simple_def("wf")).await.unwrap();

    let updated = mgr
        .update_workflow(
            "wf",
            WorkflowPatch {
                name: Some("Renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "Renamed");

    let broken = WorkflowPatch {
        edges: Some(vec![]),
        ..Default::default()
    };
    assert!(matches!(
        mgr.update_workflow("wf", broken).await,
        Err(WorkflowError::InvalidDefinition(_))
    ));

    let stored = mgr.get_workflow("wf").await.unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.edges.len(), 2);
}

#[tokio::test]
async fn update_missing_definition_is_not_found() {
    let err = manager()
        .update_workflow("nope", WorkflowPatch::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn deactivate_hides_from_active_listing() {
    let mgr = manager();
    mgr.create_workflow(simple_def("a")).await.unwrap();
    mgr.create_workflow(simple_def("b")).await.unwrap();

    let def = mgr.deactivate_workflow("a").await.unwrap();
    assert!(!def.is_active);

    let active: Vec<String> = mgr
        .list_workflows(true)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(active, vec!["b"]);
    assert_eq!(mgr.list_workflows(false).await.unwrap().len(), 2);
}

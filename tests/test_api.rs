//! Tests for the REST API, driven through the router without a listener.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use hrflow::api::{AppState, DEFAULT_MAX_BODY, router};
use hrflow::directory::{Employee, InMemoryDirectory};
use hrflow::engine::EngineConfig;
use hrflow::notify::LogChannel;
use hrflow::storage::memory_store::MemoryStore;

fn app() -> Router {
    let store = Arc::new(MemoryStore::new());
    let directory = InMemoryDirectory::new()
        .with_employee(Employee::new("e7", "7").reporting_to("e8"))
        .with_employee(Employee::new("e8", "8"));
    let state = AppState::new(
        store.clone(),
        store,
        Arc::new(directory),
        Arc::new(LogChannel),
        EngineConfig::default(),
    );
    router(Arc::new(state), DEFAULT_MAX_BODY)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn leave_definition() -> Value {
    json!({
        "id": "leave",
        "name": "Leave request",
        "nodes": [
            {"id": "start", "type": "start", "name": "Start"},
            {"id": "manager", "type": "approval", "name": "Manager approval",
             "config": {"assignees": [{"type": "manager", "value": "direct"}], "timeout": 24}},
            {"id": "hr", "type": "approval", "name": "HR approval",
             "config": {"assignee_type": "user", "assignee_value": 10}},
            {"id": "end", "type": "end", "name": "End"}
        ],
        "edges": [
            {"from": "start", "to": "manager"},
            {"from": "manager", "to": "hr"},
            {"from": "hr", "to": "end"}
        ]
    })
}

async fn deploy(app: &Router) {
    let (status, _) = call(app, Method::POST, "/definitions", Some(leave_definition())).await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn start(app: &Router) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/instances",
        Some(json!({
            "workflow_id": "leave",
            "business_id": "leave-1",
            "started_by": "7",
            "variables": {"days": 3}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

// --- Health and nodes ---

#[tokio::test]
async fn health_and_node_listing() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, Method::GET, "/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 8);
    assert_eq!(body["nodes"][0]["node_type"], "approval");
}

// --- Definitions ---

#[tokio::test]
async fn definition_crud() {
    let app = app();
    let (status, body) = call(&app, Method::POST, "/definitions", Some(leave_definition())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], 1);
    assert_eq!(body["is_active"], true);

    let (status, body) = call(&app, Method::POST, "/definitions", Some(leave_definition())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already exists"));

    let (status, body) = call(&app, Method::GET, "/definitions/leave", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 4);

    let (status, body) = call(
        &app,
        Method::PUT,
        "/definitions/leave",
        Some(json!({"description": "Annual leave"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert_eq!(body["description"], "Annual leave");

    let (status, body) = call(&app, Method::GET, "/definitions/leave/versions/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);
    assert!(body["description"].is_null() || body["description"] == "");
    let (status, _) = call(&app, Method::GET, "/definitions/leave/versions/9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, Method::DELETE, "/definitions/leave", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (_, body) = call(&app, Method::GET, "/definitions?active=true", None).await;
    assert_eq!(body["total"], 0);
    let (_, body) = call(&app, Method::GET, "/definitions", None).await;
    assert_eq!(body["total"], 1);

    let (status, _) = call(&app, Method::GET, "/definitions/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_definitions_are_bad_requests() {
    let app = app();

    let mut broken = leave_definition();
    broken["edges"] = json!([]);
    let (status, body) = call(&app, Method::POST, "/definitions", Some(broken.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("unreachable"));

    let (status, body) = call(&app, Method::POST, "/definitions", Some(json!({"id": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid workflow definition"));

    let (status, body) = call(&app, Method::POST, "/definitions/validate", Some(broken)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["workflow_id"], "leave");

    let (_, body) = call(
        &app,
        Method::POST,
        "/definitions/validate",
        Some(leave_definition()),
    )
    .await;
    assert_eq!(body["valid"], true);
}

// --- Instances ---

#[tokio::test]
async fn approval_flow_over_http() {
    let app = app();
    deploy(&app).await;
    let id = start(&app).await;

    let (status, pending) = call(&app, Method::GET, "/users/8/pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["node_id"], "manager");
    assert!(pending[0]["deadline"].is_string());

    let uri = format!("/instances/{}/approvals", id);
    let (status, outcome) = call(
        &app,
        Method::POST,
        &uri,
        Some(json!({"node_id": "manager", "action": "approve", "approved_by": "8", "comment": "ok"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["next_nodes"], json!(["hr"]));
    assert_eq!(outcome["completed"], false);

    // Acting on the same node again conflicts.
    let (status, _) = call(
        &app,
        Method::POST,
        &uri,
        Some(json!({"node_id": "manager", "action": "approve", "approved_by": "8"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        Method::POST,
        &uri,
        Some(json!({"node_id": "hr", "action": "shrug", "approved_by": "10"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid action"));

    // A body of the wrong shape is a bad request, not an extractor rejection.
    let (status, body) = call(&app, Method::POST, &uri, Some(json!({"node_id": ["hr"]}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, outcome) = call(
        &app,
        Method::POST,
        &uri,
        Some(json!({"node_id": "hr", "action": "approve", "approved_by": "10"})),
    )
    .await;
    assert_eq!(outcome["completed"], true);
    assert_eq!(outcome["instance"]["status"], "completed");

    let (_, history) = call(&app, Method::GET, &format!("/instances/{}/history", id), None).await;
    assert_eq!(history.as_array().unwrap().len(), 6);

    let (status, audit) = call(&app, Method::GET, &format!("/instances/{}/audit", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit["by_action"]["approve"], 2);

    let (_, listed) = call(&app, Method::GET, "/instances?status=completed", None).await;
    assert_eq!(listed["total"], 1);
}

#[tokio::test]
async fn start_errors_map_to_status_codes() {
    let app = app();
    let (status, _) = call(
        &app,
        Method::POST,
        "/instances",
        Some(json!({"workflow_id": "ghost", "business_id": "x", "started_by": "7"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::POST, "/instances", Some(json!({"business_id": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    deploy(&app).await;
    call(&app, Method::DELETE, "/definitions/leave", None).await;
    let (status, _) = call(
        &app,
        Method::POST,
        "/instances",
        Some(json!({"workflow_id": "leave", "business_id": "x", "started_by": "7"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, Method::GET, "/instances?status=sideways", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_over_http() {
    let app = app();
    deploy(&app).await;
    let id = start(&app).await;

    let uri = format!("/instances/{}/cancel", id);
    let (status, _) = call(&app, Method::POST, &uri, Some(json!({"reason": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // No body at all is the same as an empty request.
    let (status, body) = call(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (_, pending) = call(&app, Method::GET, "/users/8/pending", None).await;
    assert!(pending.as_array().unwrap().is_empty());

    let (status, _) = call(&app, Method::POST, &uri, Some(json!({"reason": "again"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, Method::POST, "/instances/nope/cancel", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unresolvable_approver_is_a_server_error() {
    let app = app();
    deploy(&app).await;

    // User 8 has no manager on record.
    let (status, body) = call(
        &app,
        Method::POST,
        "/instances",
        Some(json!({"workflow_id": "leave", "business_id": "x", "started_by": "8"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["details"].as_str().unwrap().contains("no direct manager"));

    let (_, listed) = call(&app, Method::GET, "/instances?status=failed", None).await;
    assert_eq!(listed["total"], 1);
}

#[tokio::test]
async fn reminder_run_endpoint() {
    let app = app();
    let (status, body) = call(&app, Method::POST, "/reminders/run", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 0);

    let (status, body) = call(&app, Method::POST, "/reminders/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 0);

    let (status, body) = call(
        &app,
        Method::POST,
        "/reminders/run",
        Some(json!({"since": "2020-01-01T00:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["window_start"], "2020-01-01T00:00:00Z");
}

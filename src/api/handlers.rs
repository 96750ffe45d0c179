use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::audit::AuditReport;
use crate::engine::definition::{WorkflowDefinition, WorkflowPatch};
use crate::engine::types::{
    ApprovalAction, ExecutionHistory, InstanceStatus, PendingApproval, Variables, WorkflowInstance,
};
use crate::engine::{ApprovalOutcome, ApprovalRequest, StartRequest};
use crate::reminder::ReminderRun;

use super::AppState;
use super::errors::AppError;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct ListDefinitionsQuery {
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Deserialize)]
pub struct ListInstancesQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ApprovalBody {
    pub node_id: String,
    pub action: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub variables: Variables,
    pub approved_by: String,
}

#[derive(Deserialize, Default)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize, Default)]
pub struct RunRemindersBody {
    /// Explicit window start; without it the scheduler's last tick is used.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct NodeInfo {
    pub node_type: String,
    pub description: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// --- Definitions ---

/// POST /definitions
pub async fn create_definition(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), AppError> {
    let def: WorkflowDefinition = parse_body(body, "workflow definition")?;
    let created = state.definitions.create_workflow(def).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /definitions
pub async fn list_definitions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDefinitionsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let defs = state
        .definitions
        .list_workflows(query.active.unwrap_or(false))
        .await?;
    let total = defs.len();
    Ok(Json(serde_json::json!({
        "definitions": defs,
        "total": total,
    })))
}

/// POST /definitions/validate
pub async fn validate_definition(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<ValidateResponse> {
    let def = match serde_json::from_value::<WorkflowDefinition>(body) {
        Ok(def) => def,
        Err(e) => {
            return Json(ValidateResponse {
                valid: false,
                workflow_id: None,
                errors: vec![format!("Failed to parse definition: {}", e)],
            });
        }
    };

    let errors = match state.definitions.validate_workflow(&def) {
        Ok(()) => Vec::new(),
        Err(e) => vec![e.to_string()],
    };
    Json(ValidateResponse {
        valid: errors.is_empty(),
        workflow_id: Some(def.id),
        errors,
    })
}

/// GET /definitions/{id}
pub async fn get_definition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, AppError> {
    Ok(Json(state.definitions.get_workflow(&id).await?))
}

/// GET /definitions/{id}/versions/{version}
pub async fn get_definition_version(
    State(state): State<Arc<AppState>>,
    Path((id, version)): Path<(String, u32)>,
) -> Result<Json<WorkflowDefinition>, AppError> {
    Ok(Json(state.definitions.get_workflow_version(&id, version).await?))
}

/// PUT /definitions/{id}
pub async fn update_definition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<WorkflowDefinition>, AppError> {
    let patch: WorkflowPatch = parse_body(body, "definition patch")?;
    Ok(Json(state.definitions.update_workflow(&id, patch).await?))
}

/// DELETE /definitions/{id}
pub async fn deactivate_definition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, AppError> {
    Ok(Json(state.definitions.deactivate_workflow(&id).await?))
}

// --- Instances ---

/// POST /instances
pub async fn start_instance(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<WorkflowInstance>), AppError> {
    let req: StartRequest = parse_body(body, "start request")?;
    let instance = state.engine.start_workflow(req).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /instances
pub async fn list_instances(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListInstancesQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<InstanceStatus>())
        .transpose()
        .map_err(AppError::BadRequest)?;

    let instances = state.engine.list_instances(status).await?;
    let total = instances.len();
    Ok(Json(serde_json::json!({
        "instances": instances,
        "total": total,
    })))
}

/// GET /instances/{id}
pub async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowInstance>, AppError> {
    Ok(Json(state.engine.get_workflow_instance(&id).await?))
}

/// POST /instances/{id}/approvals
pub async fn process_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ApprovalOutcome>, AppError> {
    let body: ApprovalBody = parse_body(body, "approval request")?;
    let action: ApprovalAction = body.action.parse().map_err(AppError::BadRequest)?;
    let outcome = state
        .engine
        .process_approval(ApprovalRequest {
            instance_id: id,
            node_id: body.node_id,
            action,
            comment: body.comment,
            variables: body.variables,
            approved_by: body.approved_by,
        })
        .await?;
    Ok(Json(outcome))
}

/// POST /instances/{id}/cancel
pub async fn cancel_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<WorkflowInstance>, AppError> {
    let body: CancelBody = parse_optional_body(&body, "cancel request")?;
    let reason = if body.reason.trim().is_empty() {
        "cancelled via API"
    } else {
        body.reason.as_str()
    };
    Ok(Json(state.engine.cancel_workflow(&id, reason).await?))
}

/// GET /instances/{id}/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ExecutionHistory>>, AppError> {
    Ok(Json(state.audit.timeline(&id).await?))
}

/// GET /instances/{id}/audit
pub async fn get_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AuditReport>, AppError> {
    Ok(Json(state.audit.report(&id).await?))
}

/// GET /users/{id}/pending
pub async fn pending_for_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PendingApproval>>, AppError> {
    Ok(Json(state.engine.get_pending_approvals(&id).await?))
}

/// POST /reminders/run
pub async fn run_reminders(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ReminderRun>, AppError> {
    let body: RunRemindersBody = parse_optional_body(&body, "reminder request")?;
    let now = Utc::now();
    let run = match body.since {
        Some(since) => state.reminders.run_due(since, now).await?,
        None => state.reminders.tick(now).await?,
    };
    Ok(Json(run))
}

// --- Misc ---

/// GET /nodes
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let nodes: Vec<NodeInfo> = state
        .engine
        .default_registry()
        .list()
        .iter()
        .map(|(name, desc)| NodeInfo {
            node_type: name.to_string(),
            description: desc.to_string(),
        })
        .collect();

    let total = nodes.len();
    Json(serde_json::json!({
        "nodes": nodes,
        "total": total,
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// --- Helpers ---

/// Deserialize a JSON body, reporting shape errors as 400 rather than 422.
fn parse_body<T: DeserializeOwned>(body: serde_json::Value, what: &str) -> Result<T, AppError> {
    serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid {}: {}", what, e)))
}

/// Like `parse_body` for endpoints whose body may be left out entirely.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes, what: &str) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid {}: {}", what, e)))
}

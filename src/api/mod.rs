mod errors;
pub mod handlers;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use errors::{AppError, ErrorResponse};

use crate::audit::AuditService;
use crate::directory::{InMemoryDirectory, OrgDirectory};
use crate::engine::{DefinitionManager, EngineConfig, WorkflowEngine};
use crate::notify::{LogChannel, NotificationChannel};
use crate::reminder::ReminderScheduler;
use crate::storage::json_store::JsonStore;
use crate::storage::{DefinitionStore, InstanceStore};

pub const DEFAULT_MAX_BODY: usize = 1_048_576;

/// Shared application state accessible by all handlers.
pub struct AppState {
    pub engine: WorkflowEngine,
    pub definitions: DefinitionManager,
    pub audit: AuditService,
    pub reminders: ReminderScheduler,
}

impl AppState {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        directory: Arc<dyn OrgDirectory>,
        channel: Arc<dyn NotificationChannel>,
        config: EngineConfig,
    ) -> Self {
        let engine = WorkflowEngine::with_builtins(
            definitions.clone(),
            instances.clone(),
            directory,
            Some(channel.clone()),
        )
        .with_config(config);

        Self {
            engine,
            definitions: DefinitionManager::new(definitions),
            audit: AuditService::new(instances.clone()),
            reminders: ReminderScheduler::new(instances, channel),
        }
    }

    /// State backed by the JSON store under `store_dir`, with the directory
    /// loaded from `directory_file` (empty when absent) and log notifications.
    pub fn open(
        store_dir: &Path,
        directory_file: Option<&Path>,
        config: EngineConfig,
    ) -> Result<Self> {
        let store = Arc::new(JsonStore::new(store_dir));
        let directory = match directory_file {
            Some(path) => InMemoryDirectory::load(path)
                .with_context(|| format!("Failed to load directory: {}", path.display()))?,
            None => InMemoryDirectory::new(),
        };

        Ok(Self::new(
            store.clone(),
            store,
            Arc::new(directory),
            Arc::new(LogChannel),
            config,
        ))
    }
}

/// All routes, without the network listener.
pub fn router(state: Arc<AppState>, max_body: usize) -> Router {
    Router::new()
        .route(
            "/definitions",
            post(handlers::create_definition).get(handlers::list_definitions),
        )
        .route("/definitions/validate", post(handlers::validate_definition))
        .route(
            "/definitions/{id}",
            get(handlers::get_definition)
                .put(handlers::update_definition)
                .delete(handlers::deactivate_definition),
        )
        .route(
            "/definitions/{id}/versions/{version}",
            get(handlers::get_definition_version),
        )
        .route(
            "/instances",
            post(handlers::start_instance).get(handlers::list_instances),
        )
        .route("/instances/{id}", get(handlers::get_instance))
        .route("/instances/{id}/approvals", post(handlers::process_approval))
        .route("/instances/{id}/cancel", post(handlers::cancel_instance))
        .route("/instances/{id}/history", get(handlers::get_history))
        .route("/instances/{id}/audit", get(handlers::get_audit))
        .route("/users/{id}/pending", get(handlers::pending_for_user))
        .route("/reminders/run", post(handlers::run_reminders))
        .route("/nodes", get(handlers::list_nodes))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the REST API server.
pub async fn serve(
    host: &str,
    port: u16,
    store_dir: PathBuf,
    directory_file: Option<PathBuf>,
    max_body: usize,
    config: EngineConfig,
) -> Result<()> {
    let state = Arc::new(AppState::open(
        &store_dir,
        directory_file.as_deref(),
        config,
    )?);
    let app = router(state, max_body);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(store_dir = %store_dir.display(), "hrflow API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

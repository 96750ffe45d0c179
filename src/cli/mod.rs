pub mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::api::{AppState, DEFAULT_MAX_BODY};
use crate::engine::definition::{WorkflowDefinition, WorkflowPatch};
use crate::engine::executor::DEFAULT_MAX_CASCADE_STEPS;
use crate::engine::types::{ApprovalAction, InstanceStatus, Variables};
use crate::engine::{ApprovalRequest, EngineConfig, StartRequest};
pub use config::HrflowConfig;

const DEFAULT_STORE_DIR: &str = "data/hrflow";

#[derive(Parser)]
#[command(name = "hrflow", version, about = "HR approval workflow engine")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to hrflow.yaml (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(long, global = true, env = "HRFLOW_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Organisation directory file (YAML or JSON)
    #[arg(long, global = true, env = "HRFLOW_DIRECTORY")]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow definition file without saving it
    Validate {
        /// Path to the .yaml/.json definition
        file: PathBuf,
    },

    /// Create a workflow definition from a file
    Deploy {
        /// Path to the .yaml/.json definition
        file: PathBuf,

        /// Update the definition if it already exists
        #[arg(long)]
        update: bool,
    },

    /// List workflow definitions
    Definitions {
        /// Only show active definitions
        #[arg(long)]
        active: bool,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Start a workflow instance
    Start {
        /// Workflow definition id
        workflow: String,

        /// Business object id (task id, onboarding request id, ...)
        #[arg(long)]
        business_id: String,

        /// Business type (task_assignment, onboarding)
        #[arg(long, default_value = "")]
        business_type: String,

        /// User starting the workflow
        #[arg(long)]
        started_by: String,

        /// Initial variables as a JSON object
        #[arg(long)]
        vars: Option<String>,
    },

    /// Act on an active approval node
    Approve {
        instance_id: String,
        node_id: String,

        /// approve, reject, return, delegate
        #[arg(short, long, default_value = "approve")]
        action: String,

        /// Acting user
        #[arg(long)]
        by: String,

        #[arg(short, long, default_value = "")]
        comment: String,

        /// Variables to merge, as a JSON object
        #[arg(long)]
        vars: Option<String>,
    },

    /// Cancel a running instance
    Cancel {
        instance_id: String,

        #[arg(short, long, default_value = "cancelled from CLI")]
        reason: String,
    },

    /// List workflow instances
    Instances {
        /// Filter by status (running, completed, cancelled, failed, suspended)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Inspect a specific instance
    Inspect { instance_id: String },

    /// Pending approvals for a user
    Pending { user_id: String },

    /// Audit report for an instance
    Audit { instance_id: String },

    /// Send reminders that fell due in the last window
    Reminders {
        /// Window length in minutes, ending now
        #[arg(long, default_value = "15")]
        window_minutes: i64,
    },

    /// List available node types
    Nodes,

    /// Start the REST API server
    Serve {
        /// Host to bind to
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Maximum request body size in bytes (default: 1048576 = 1 MB)
        #[arg(long, env = "MAX_BODY")]
        max_body: Option<usize>,
    },
}

/// Settings after applying CLI/env > config file > defaults.
struct Settings {
    config: HrflowConfig,
    store_dir: PathBuf,
    directory: Option<PathBuf>,
    engine: EngineConfig,
}

impl Settings {
    fn resolve(cli: &Cli) -> Result<Self> {
        let config = HrflowConfig::load(cli.config.as_deref())?;
        let store_dir = cli
            .store_dir
            .clone()
            .or_else(|| config.store_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
        let directory = cli
            .directory
            .clone()
            .or_else(|| config.directory_file.as_ref().map(PathBuf::from));
        let engine = EngineConfig {
            max_cascade_steps: config.max_cascade_steps.unwrap_or(DEFAULT_MAX_CASCADE_STEPS),
        };
        Ok(Self {
            config,
            store_dir,
            directory,
            engine,
        })
    }

    fn open(&self) -> Result<AppState> {
        AppState::open(&self.store_dir, self.directory.as_deref(), self.engine.clone())
    }
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let settings = Settings::resolve(&cli)?;

    match cli.command {
        Commands::Validate { file } => cmd_validate(&settings, &file),
        Commands::Deploy { file, update } => cmd_deploy(&settings, &file, update).await,
        Commands::Definitions { active, format } => {
            cmd_definitions(&settings, active, &format).await
        }
        Commands::Start {
            workflow,
            business_id,
            business_type,
            started_by,
            vars,
        } => {
            let req = StartRequest {
                workflow_id: workflow,
                business_id,
                business_type,
                variables: parse_vars(vars.as_deref())?,
                started_by,
            };
            cmd_start(&settings, req).await
        }
        Commands::Approve {
            instance_id,
            node_id,
            action,
            by,
            comment,
            vars,
        } => {
            let action: ApprovalAction = action.parse().map_err(anyhow::Error::msg)?;
            let req = ApprovalRequest {
                instance_id,
                node_id,
                action,
                comment,
                variables: parse_vars(vars.as_deref())?,
                approved_by: by,
            };
            cmd_approve(&settings, req).await
        }
        Commands::Cancel {
            instance_id,
            reason,
        } => cmd_cancel(&settings, &instance_id, &reason).await,
        Commands::Instances { status, format } => {
            cmd_instances(&settings, status.as_deref(), &format).await
        }
        Commands::Inspect { instance_id } => cmd_inspect(&settings, &instance_id).await,
        Commands::Pending { user_id } => cmd_pending(&settings, &user_id).await,
        Commands::Audit { instance_id } => cmd_audit(&settings, &instance_id).await,
        Commands::Reminders { window_minutes } => {
            cmd_reminders(&settings, window_minutes).await
        }
        Commands::Nodes => cmd_nodes(&settings),
        Commands::Serve {
            host,
            port,
            max_body,
        } => {
            let host = host
                .or_else(|| settings.config.host.clone())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            let port = port.or(settings.config.port).unwrap_or(3000);
            let max_body = max_body
                .or(settings.config.max_body)
                .unwrap_or(DEFAULT_MAX_BODY);
            crate::api::serve(
                &host,
                port,
                settings.store_dir.clone(),
                settings.directory.clone(),
                max_body,
                settings.engine.clone(),
            )
            .await
        }
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

/// Read a workflow definition from a `.json` or `.yaml`/`.yml` file.
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition: {}", path.display()))?;

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let def = if is_json {
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse definition: {}", path.display()))?
    } else {
        serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse definition: {}", path.display()))?
    };
    Ok(def)
}

fn parse_vars(json: Option<&str>) -> Result<Variables> {
    match json {
        Some(json) => serde_json::from_str(json).with_context(|| "Failed to parse --vars JSON"),
        None => Ok(Variables::new()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_validate(settings: &Settings, file: &Path) -> Result<()> {
    let def = load_definition_file(file)?;
    let state = settings.open()?;

    println!("Workflow: {} ({})", def.name, def.id);
    println!("Nodes: {}, edges: {}", def.nodes.len(), def.edges.len());

    match state.definitions.validate_workflow(&def) {
        Ok(()) => {
            println!("Validation: OK");
            Ok(())
        }
        Err(e) => {
            println!("Validation: FAILED");
            println!("  - {}", e);
            anyhow::bail!("definition '{}' is invalid", def.id);
        }
    }
}

async fn cmd_deploy(settings: &Settings, file: &Path, update: bool) -> Result<()> {
    let def = load_definition_file(file)?;
    let state = settings.open()?;

    let exists = state.definitions.get_workflow(&def.id).await.is_ok();
    let saved = if exists && update {
        let patch = WorkflowPatch {
            name: Some(def.name),
            description: Some(def.description),
            nodes: Some(def.nodes),
            edges: Some(def.edges),
            variables: Some(def.variables),
            is_active: Some(def.is_active),
        };
        state.definitions.update_workflow(&def.id, patch).await?
    } else {
        state.definitions.create_workflow(def).await?
    };

    println!("Deployed '{}' version {}", saved.id, saved.version);
    Ok(())
}

async fn cmd_definitions(settings: &Settings, active: bool, format: &str) -> Result<()> {
    let state = settings.open()?;
    let defs = state.definitions.list_workflows(active).await?;

    if defs.is_empty() {
        println!("No definitions found.");
        return Ok(());
    }
    if format == "json" {
        return print_json(&defs);
    }

    println!("{:<24} {:<30} {:<8} {:<8}", "ID", "NAME", "VERSION", "ACTIVE");
    println!("{}", "-".repeat(72));
    for def in &defs {
        println!(
            "{:<24} {:<30} {:<8} {:<8}",
            def.id, def.name, def.version, def.is_active
        );
    }
    println!("\nTotal: {} definition(s)", defs.len());
    Ok(())
}

async fn cmd_start(settings: &Settings, req: StartRequest) -> Result<()> {
    let state = settings.open()?;
    let instance = state.engine.start_workflow(req).await?;

    println!("Instance ID: {}", instance.id);
    println!("Status: {}", instance.status);
    println!("Active nodes: {}", instance.current_nodes.join(", "));
    Ok(())
}

async fn cmd_approve(settings: &Settings, req: ApprovalRequest) -> Result<()> {
    let state = settings.open()?;
    let outcome = state.engine.process_approval(req).await?;

    println!("{}", outcome.message);
    println!("Status: {}", outcome.instance.status);
    if !outcome.instance.current_nodes.is_empty() {
        println!("Active nodes: {}", outcome.instance.current_nodes.join(", "));
    }
    Ok(())
}

async fn cmd_cancel(settings: &Settings, instance_id: &str, reason: &str) -> Result<()> {
    let state = settings.open()?;
    let instance = state.engine.cancel_workflow(instance_id, reason).await?;
    println!("Instance {} {}", instance.id, instance.status);
    Ok(())
}

async fn cmd_instances(settings: &Settings, status: Option<&str>, format: &str) -> Result<()> {
    let status = status
        .map(|s| s.parse::<InstanceStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let state = settings.open()?;
    let instances = state.engine.list_instances(status).await?;

    if instances.is_empty() {
        println!("No instances found.");
        return Ok(());
    }
    if format == "json" {
        return print_json(&instances);
    }

    println!(
        "{:<38} {:<20} {:<10} {:<24}",
        "INSTANCE ID", "WORKFLOW", "STATUS", "STARTED"
    );
    println!("{}", "-".repeat(92));
    for instance in &instances {
        println!(
            "{:<38} {:<20} {:<10} {:<24}",
            instance.id,
            instance.workflow_id,
            instance.status,
            instance.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\nTotal: {} instance(s)", instances.len());
    Ok(())
}

async fn cmd_inspect(settings: &Settings, instance_id: &str) -> Result<()> {
    let state = settings.open()?;
    let instance = state
        .engine
        .get_workflow_instance(instance_id)
        .await
        .with_context(|| format!("Instance '{}' not found", instance_id))?;
    print_json(&instance)
}

async fn cmd_pending(settings: &Settings, user_id: &str) -> Result<()> {
    let state = settings.open()?;
    let pending = state.engine.get_pending_approvals(user_id).await?;

    if pending.is_empty() {
        println!("No pending approvals for {}.", user_id);
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<10} {:<20} {:<24}",
        "INSTANCE ID", "NODE", "PRIORITY", "ACTIONS", "DEADLINE"
    );
    println!("{}", "-".repeat(114));
    for p in &pending {
        let actions: Vec<String> = p.required_actions.iter().map(|a| a.to_string()).collect();
        let deadline = p
            .deadline
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<20} {:<10} {:<20} {:<24}",
            p.instance_id,
            p.node_id,
            p.priority,
            actions.join(","),
            deadline
        );
    }
    println!("\nTotal: {} item(s)", pending.len());
    Ok(())
}

async fn cmd_audit(settings: &Settings, instance_id: &str) -> Result<()> {
    let state = settings.open()?;
    let report = state.audit.report(instance_id).await?;
    print_json(&report)
}

/// Start of a reminder window reaching `window_minutes` back from `now`
/// (at least one minute).
pub fn reminder_window_start(now: DateTime<Utc>, window_minutes: i64) -> Result<DateTime<Utc>> {
    Duration::try_minutes(window_minutes.max(1))
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("Reminder window of {} minutes is out of range", window_minutes))
}

async fn cmd_reminders(settings: &Settings, window_minutes: i64) -> Result<()> {
    let now = Utc::now();
    let since = reminder_window_start(now, window_minutes)?;
    let state = settings.open()?;
    let run = state.reminders.run_due(since, now).await?;
    println!("Reminders sent: {}, failed: {}", run.sent, run.failed);
    Ok(())
}

fn cmd_nodes(settings: &Settings) -> Result<()> {
    let state = settings.open()?;
    let registry = state.engine.default_registry();
    let nodes = registry.list();

    println!("{:<20} DESCRIPTION", "NODE TYPE");
    println!("{}", "-".repeat(60));

    for (name, desc) in &nodes {
        println!("{:<20} {}", name, desc);
    }

    println!("\nTotal: {} node(s)", nodes.len());
    Ok(())
}

pub mod definition;
pub mod executor;
pub mod manager;
pub mod types;
pub mod validate;

pub use executor::{ApprovalOutcome, ApprovalRequest, EngineConfig, StartRequest, WorkflowEngine};
pub use manager::DefinitionManager;

mod approval_node;
mod condition_node;
mod flow_node;
mod notify_node;
mod script_node;

use std::sync::Arc;

use crate::nodes::business::BusinessContext;
use crate::nodes::{ExecutorDeps, ExecutorRegistry};

pub use approval_node::ApprovalNode;
pub use condition_node::{ConditionNode, evaluate_expression};
pub use flow_node::{EndNode, JoinNode, ParallelNode, StartNode};
pub use notify_node::NotifyNode;
pub use script_node::ScriptNode;

/// Register all built-in executors into the registry.
pub fn register_all(
    registry: &mut ExecutorRegistry,
    deps: ExecutorDeps,
    business: Arc<dyn BusinessContext>,
) {
    registry.register(Arc::new(StartNode));
    registry.register(Arc::new(EndNode));
    registry.register(Arc::new(ApprovalNode::new(deps.clone(), business)));
    registry.register(Arc::new(ConditionNode));
    registry.register(Arc::new(ParallelNode));
    registry.register(Arc::new(JoinNode));
    registry.register(Arc::new(ScriptNode));
    registry.register(Arc::new(NotifyNode::new(deps.channel)));
}

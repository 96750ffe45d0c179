use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::engine::definition::{NodeKind, NodeType};
use crate::nodes::{ExecutionResult, NodeContext, NodeExecutor};

/// Applies configured variable assignments. Never evaluates code; a `script`
/// body is kept on the definition for documentation only.
pub struct ScriptNode;

#[async_trait]
impl NodeExecutor for ScriptNode {
    fn node_type(&self) -> NodeType {
        NodeType::Script
    }

    fn description(&self) -> &str {
        "Set instance variables"
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        let NodeKind::Script(config) = &ctx.node.kind else {
            bail!("node '{}' is not a script node", ctx.node.id);
        };

        if config.script.is_some() {
            tracing::debug!(node_id = %ctx.node.id, "Script body ignored; only 'set' is applied");
        }

        let mut vars = config.set.clone();
        vars.insert(
            format!("{}_executed", ctx.node.id),
            serde_json::Value::Bool(true),
        );

        let message = format!("set {} variables", config.set.len());
        Ok(
            ExecutionResult::advance(ctx.definition.successors(&ctx.node.id), message)
                .with_variables(vars),
        )
    }
}

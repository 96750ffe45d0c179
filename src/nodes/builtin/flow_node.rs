use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::engine::definition::{NodeKind, NodeType};
use crate::nodes::{ExecutionResult, NodeContext, NodeExecutor};

pub struct StartNode;

#[async_trait]
impl NodeExecutor for StartNode {
    fn node_type(&self) -> NodeType {
        NodeType::Start
    }

    fn description(&self) -> &str {
        "Entry point; forwards to every outgoing edge"
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        let next = ctx.definition.successors(&ctx.node.id);
        Ok(ExecutionResult::advance(next, "workflow started"))
    }
}

pub struct EndNode;

#[async_trait]
impl NodeExecutor for EndNode {
    fn node_type(&self) -> NodeType {
        NodeType::End
    }

    fn description(&self) -> &str {
        "Terminal node; reaching it completes the instance"
    }

    async fn execute(&self, _ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        Ok(ExecutionResult::wait("end reached"))
    }
}

pub struct ParallelNode;

#[async_trait]
impl NodeExecutor for ParallelNode {
    fn node_type(&self) -> NodeType {
        NodeType::Parallel
    }

    fn description(&self) -> &str {
        "Fan out to several branches at once"
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        let NodeKind::Parallel(config) = &ctx.node.kind else {
            bail!("node '{}' is not a parallel node", ctx.node.id);
        };

        let branches = if config.branches.is_empty() {
            ctx.definition.successors(&ctx.node.id)
        } else {
            config.branches.clone()
        };

        let message = format!("forked into {} branches", branches.len());
        Ok(ExecutionResult::advance(branches, message))
    }
}

/// Waits until enough distinct predecessors have arrived. The engine records
/// each arrival in `instance.join_arrivals` before running this executor, and
/// runs it with no predecessor once no active branch can reach it any more.
pub struct JoinNode;

#[async_trait]
impl NodeExecutor for JoinNode {
    fn node_type(&self) -> NodeType {
        NodeType::Join
    }

    fn description(&self) -> &str {
        "Wait for parallel branches to converge"
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<ExecutionResult> {
        let NodeKind::Join(config) = &ctx.node.kind else {
            bail!("node '{}' is not a join node", ctx.node.id);
        };

        let expected = config
            .expected
            .unwrap_or_else(|| ctx.definition.incoming(&ctx.node.id).count())
            .max(1);
        let arrived = ctx
            .instance
            .join_arrivals
            .get(&ctx.node.id)
            .map(|a| a.len())
            .unwrap_or(0);

        // No predecessor: nothing left can arrive, so go on with what did.
        if ctx.arrived_from.is_none() {
            return Ok(ExecutionResult::advance(
                ctx.definition.successors(&ctx.node.id),
                format!("join released with {}/{} branches", arrived, expected),
            ));
        }

        if arrived >= expected {
            Ok(ExecutionResult::advance(
                ctx.definition.successors(&ctx.node.id),
                format!("all {} branches arrived", expected),
            ))
        } else {
            Ok(ExecutionResult::wait(format!(
                "waiting for branches ({}/{})",
                arrived, expected
            )))
        }
    }
}

use std::path::Path;

use async_trait::async_trait;
use attractor_types::{Context, Outcome, Result, StageStatus};

use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

/// Handler for "parallel" type nodes (shape="component").
/// Represents a fan-out point where multiple branches can execute.
/// In the current implementation, branches are identified by outgoing edges.
pub struct ParallelHandler;

#[async_trait]
impl NodeHandler for ParallelHandler {
    fn handler_type(&self) -> &str {
        "parallel"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        _context: &Context,
        graph: &PipelineGraph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        let outgoing = graph.outgoing_edges(&node.id);
        let branch_count = outgoing.len();
        let branch_targets: Vec<String> = outgoing.iter().map(|e| e.to.clone()).collect();

        tracing::info!(
            node = %node.id,
            branches = branch_count,
            targets = ?branch_targets,
            "Parallel fan-out"
        );

        // The parallel handler itself just passes through.
        // The execution engine is responsible for actually forking execution.
        // For now, suggest all branches and let the engine handle routing.
        Ok(Outcome {
            status: StageStatus::Success,
            preferred_label: None,
            suggested_next_ids: branch_targets,
            context_updates: std::collections::HashMap::new(),
            notes: format!("Fan-out to {} branches", branch_count),
            failure_reason: None,
        })
    }
}

/// Handler for "parallel.fan_in" type nodes (shape="tripleoctagon").
/// Collects results from parallel branches.
pub struct FanInHandler;

#[async_trait]
impl NodeHandler for FanInHandler {
    fn handler_type(&self) -> &str {
        "parallel.fan_in"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        _context: &Context,
        _graph: &PipelineGraph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        tracing::info!(node = %node.id, "Fan-in merge point");

        Ok(Outcome {
            status: StageStatus::Success,
            preferred_label: None,
            suggested_next_ids: vec![],
            context_updates: std::collections::HashMap::new(),
            notes: "Fan-in merge completed".to_string(),
            failure_reason: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

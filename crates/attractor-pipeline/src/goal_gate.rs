use std::collections::HashMap;

use attractor_types::{Outcome, StageStatus};

use crate::graph::PipelineGraph;

/// Result of checking all goal gate nodes reached so far.
#[derive(Debug)]
pub struct GoalGateResult {
    pub all_satisfied: bool,
    pub failed_node_id: Option<String>,
    /// Formatted per the engine's goal-gate failure message:
    /// `"Goal gate unsatisfied at node '<id>': <reason-or-status>"`.
    pub reason: Option<String>,
}

/// Check whether every visited goal-gated node has reached SUCCESS or
/// PARTIAL_SUCCESS. Only nodes present in `node_outcomes` are considered.
///
/// There is no retry mechanism: an unsatisfied gate is always reported as a
/// failure for the caller to act on (fail the run), never resolved here.
pub fn check_goal_gates(
    graph: &PipelineGraph,
    node_outcomes: &HashMap<String, Outcome>,
) -> GoalGateResult {
    for (node_id, outcome) in node_outcomes {
        if let Some(node) = graph.node(node_id) {
            if node.goal_gate
                && !matches!(
                    outcome.status,
                    StageStatus::Success | StageStatus::PartialSuccess
                )
            {
                let detail = outcome
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| outcome.status.to_string());
                return GoalGateResult {
                    all_satisfied: false,
                    failed_node_id: Some(node_id.clone()),
                    reason: Some(format!(
                        "Goal gate unsatisfied at node '{node_id}': {detail}"
                    )),
                };
            }
        }
    }
    GoalGateResult {
        all_satisfied: true,
        failed_node_id: None,
        reason: None,
    }
}

//! Pipeline execution engine — the core traversal loop.
//!
//! Implements the parse → validate → initialize → execute → finalize
//! lifecycle: the graph is already parsed and validated by the caller's
//! entry point, but [`PipelineExecutor::run`] re-validates, initializes a
//! fresh [`Context`], and drives traversal to completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use attractor_types::{AttractorError, Context, Outcome, Result, StageStatus};

use crate::edge_selection::{select_edge, select_fail_edge};
use crate::events::{EventEmitter, PipelineEvent};
use crate::goal_gate::check_goal_gates;
use crate::graph::PipelineGraph;
use crate::handler::{default_registry, HandlerRegistry};
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The core pipeline executor. Owns a handler registry and an event emitter,
/// and drives graph traversal.
pub struct PipelineExecutor {
    registry: HandlerRegistry,
    emitter: EventEmitter,
}

/// Configuration for a pipeline run.
pub struct PipelineConfig {
    pub logs_root: PathBuf,
    /// Caller-supplied inputs written into the Context before traversal
    /// starts, after graph-level attributes (so inputs take priority).
    pub inputs: HashMap<String, serde_json::Value>,
}

impl PipelineConfig {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        Self {
            logs_root: logs_root.into(),
            inputs: HashMap::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: HashMap<String, serde_json::Value>) -> Self {
        self.inputs = inputs;
        self
    }
}

/// The result of a completed pipeline execution.
///
/// A goal-gate failure at a terminal node is reported here (`failed: true`)
/// rather than as an `Err` — only structural errors (no route on FAIL,
/// missing handler, invalid graph) escape `run` as `Err`.
#[derive(Debug)]
pub struct PipelineResult {
    pub completed_nodes: Vec<String>,
    pub node_outcomes: HashMap<String, Outcome>,
    pub final_context: HashMap<String, serde_json::Value>,
    pub final_outcome: Outcome,
    pub failed: bool,
    pub failure_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert an `attractor_dot::AttributeValue` to a `serde_json::Value`.
fn attr_to_json(val: &attractor_dot::AttributeValue) -> serde_json::Value {
    match val {
        attractor_dot::AttributeValue::String(s) => serde_json::Value::String(s.clone()),
        attractor_dot::AttributeValue::Integer(i) => serde_json::json!(*i),
        attractor_dot::AttributeValue::Float(f) => serde_json::json!(*f),
        attractor_dot::AttributeValue::Boolean(b) => serde_json::Value::Bool(*b),
        attractor_dot::AttributeValue::Duration(d) => serde_json::json!(d.as_millis() as u64),
    }
}

/// Canonical stringification of a context value for condition resolution.
fn json_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Build the key resolver used by the condition evaluator: `outcome` and
/// `preferred_label` resolve from the just-produced Outcome; `context.<key>`
/// resolves from a Context snapshot; anything else resolves to `""`.
fn make_resolve<'a>(
    snapshot: &'a HashMap<String, serde_json::Value>,
    status: StageStatus,
    preferred_label: &'a Option<String>,
) -> impl Fn(&str) -> String + 'a {
    move |key: &str| -> String {
        match key {
            "outcome" => status.to_string(),
            "preferred_label" => preferred_label.clone().unwrap_or_default(),
            _ => match key.strip_prefix("context.") {
                Some(ctx_key) => snapshot.get(ctx_key).map(json_to_string).unwrap_or_default(),
                None => String::new(),
            },
        }
    }
}

/// Per-stage artifact directory. Writes `status.json` only if one isn't
/// already present and the outcome isn't FAIL — codergen handlers write
/// their own, so this rarely fires in practice.
async fn write_status_json_if_absent(logs_root: &Path, node_id: &str, outcome: &Outcome) -> Result<()> {
    let dir = logs_root.join(node_id);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join("status.json");
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(());
    }
    if outcome.status == StageStatus::Fail {
        return Ok(());
    }
    let json = serde_json::json!({
        "outcome": outcome.status.to_string(),
        "preferred_next_label": outcome.preferred_label,
        "suggested_next_ids": outcome.suggested_next_ids,
        "context_updates": outcome.context_updates,
        "notes": outcome.notes,
        "failure_reason": outcome.failure_reason,
    });
    tokio::fs::write(path, serde_json::to_vec_pretty(&json)?).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    /// Create an executor with the given handler registry.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            emitter: EventEmitter::default(),
        }
    }

    /// Create an executor pre-loaded with the default built-in handlers.
    pub fn with_default_registry() -> Self {
        Self::new(default_registry())
    }

    /// Attach a specific event emitter (e.g. one shared with a task runner).
    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Subscribe to this executor's event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.emitter.subscribe()
    }

    /// Run the traversal loop on the given graph.
    pub async fn run(&self, graph: &PipelineGraph, config: &PipelineConfig) -> Result<PipelineResult> {
        validate_or_raise(graph)?;

        let context = Context::new();
        for (key, val) in &graph.attrs {
            context.set(key, attr_to_json(val)).await;
        }
        context
            .set("graph.goal", serde_json::Value::String(graph.goal.clone()))
            .await;
        context
            .set("graph.label", serde_json::Value::String(graph.name.clone()))
            .await;
        context.apply_updates(config.inputs.clone()).await;

        let mut completed_nodes: Vec<String> = Vec::new();
        let mut node_outcomes: HashMap<String, Outcome> = HashMap::new();

        let start = graph
            .start_node()
            .ok_or_else(|| AttractorError::ValidationError("No start node found".into()))?;
        let mut current = start;

        loop {
            if current.is_terminal() {
                let gate_result = check_goal_gates(graph, &node_outcomes);
                if !gate_result.all_satisfied {
                    let reason = gate_result.reason.unwrap_or_default();
                    self.emitter.emit(PipelineEvent::PipelineFailed {
                        reason: reason.clone(),
                    });
                    return Ok(PipelineResult {
                        completed_nodes,
                        node_outcomes,
                        final_context: context.snapshot().await,
                        final_outcome: Outcome::fail(reason.clone()),
                        failed: true,
                        failure_reason: Some(reason),
                    });
                }
                // Gate satisfied: fall through and run the terminal's own handler.
            }

            let handler_type = self.registry.resolve_type(current);
            let handler = self.registry.get(&handler_type).ok_or_else(|| AttractorError::HandlerError {
                handler: handler_type.clone(),
                node: current.id.clone(),
                message: format!("No handler registered for type '{handler_type}'"),
            })?;

            self.emitter.emit(PipelineEvent::StageStarted {
                node_id: current.id.clone(),
                label: current.label.clone(),
            });

            let outcome = handler.execute(current, &context, graph, &config.logs_root).await?;

            completed_nodes.push(current.id.clone());
            node_outcomes.insert(current.id.clone(), outcome.clone());

            context.apply_updates(outcome.context_updates.clone()).await;
            context
                .set("outcome", serde_json::Value::String(outcome.status.to_string()))
                .await;
            if let Some(ref label) = outcome.preferred_label {
                context
                    .set("preferred_label", serde_json::Value::String(label.clone()))
                    .await;
            }

            write_status_json_if_absent(&config.logs_root, &current.id, &outcome).await?;

            self.emitter.emit(PipelineEvent::StageCompleted {
                node_id: current.id.clone(),
                outcome: outcome.status,
                notes: outcome.notes.clone(),
            });

            if current.is_terminal() {
                self.emitter.emit(PipelineEvent::PipelineCompleted {
                    current_node: current.id.clone(),
                });
                return Ok(PipelineResult {
                    completed_nodes,
                    node_outcomes,
                    final_context: context.snapshot().await,
                    final_outcome: outcome,
                    failed: false,
                    failure_reason: None,
                });
            }

            let snapshot = context.snapshot().await;

            if outcome.status == StageStatus::Fail {
                let resolve = make_resolve(&snapshot, outcome.status, &outcome.preferred_label);
                match select_fail_edge(&current.id, &resolve, graph) {
                    Some(edge) => {
                        let next_id = edge.to.clone();
                        current = graph
                            .node(&next_id)
                            .ok_or_else(|| AttractorError::Other(format!("Edge target '{next_id}' not found")))?;
                        continue;
                    }
                    None => {
                        return Err(AttractorError::StageFailNoRoute {
                            node: current.id.clone(),
                            reason: outcome.failure_reason.clone().unwrap_or_else(|| "fail".to_string()),
                        });
                    }
                }
            }

            let resolve = make_resolve(&snapshot, outcome.status, &outcome.preferred_label);
            match select_edge(&current.id, &outcome, &resolve, graph) {
                Some(edge) => {
                    let next_id = edge.to.clone();
                    current = graph
                        .node(&next_id)
                        .ok_or_else(|| AttractorError::Other(format!("Edge target '{next_id}' not found")))?;
                }
                None => {
                    self.emitter.emit(PipelineEvent::PipelineCompleted {
                        current_node: current.id.clone(),
                    });
                    return Ok(PipelineResult {
                        completed_nodes,
                        node_outcomes,
                        final_context: context.snapshot().await,
                        final_outcome: outcome,
                        failed: false,
                        failure_reason: None,
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraph;

    fn parse_graph(dot: &str) -> PipelineGraph {
        let parsed = attractor_dot::parse(dot).unwrap();
        PipelineGraph::from_dot(parsed).unwrap()
    }

    fn config(dir: &tempfile::TempDir) -> PipelineConfig {
        PipelineConfig::new(dir.path())
    }

    // Scenario 1 (SPEC_FULL §8.1): straight line completes and writes prompt.md.
    #[tokio::test]
    async fn straight_line_completes_and_writes_prompt() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                a [shape="box", prompt="Do work"]
                end [shape="Msquare"]
                start -> a -> end
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await.unwrap();

        assert_eq!(result.completed_nodes, vec!["start", "a", "end"]);
        assert!(!result.failed);
        assert_eq!(result.node_outcomes["start"].status, StageStatus::Success);
        assert_eq!(result.node_outcomes["a"].status, StageStatus::Success);
        assert_eq!(result.node_outcomes["end"].status, StageStatus::Success);
        assert!(dir.path().join("a/prompt.md").exists());
    }

    // Scenario 2: guarded branch routes on condition.
    #[tokio::test]
    async fn guarded_branch_routes_on_condition() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                decide [shape="box", prompt="Decide"]
                ok [shape="box", prompt="Ok"]
                bad [shape="box", prompt="Bad"]
                done [shape="Msquare"]
                start -> decide
                decide -> ok [condition="outcome=success"]
                decide -> bad
                ok -> done
                bad -> done
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await.unwrap();

        assert!(result.completed_nodes.contains(&"ok".to_string()));
        assert!(!result.completed_nodes.contains(&"bad".to_string()));
    }

    // Scenario 4: weight + lexical tie-break.
    #[tokio::test]
    async fn unweighted_tie_breaks_lexically() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                n [shape="box", prompt="N"]
                a [shape="Msquare"]
                b [shape="Msquare"]
                start -> n
                n -> b [weight=1]
                n -> a [weight=1]
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await.unwrap();
        assert!(result.completed_nodes.contains(&"a".to_string()));
        assert!(!result.completed_nodes.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn no_start_node_returns_error() {
        let graph = parse_graph(
            r#"digraph G {
                process [shape="box", prompt="Do work"]
                done [shape="Msquare"]
                process -> done
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await;

        assert!(result.is_err());
        match result.unwrap_err() {
            AttractorError::ValidationError(msg) => {
                assert!(msg.contains("start node"), "got: {msg}");
            }
            other => panic!("expected ValidationError, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn context_updates_propagate_to_final_context() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                step [shape="box", prompt="Generate code"]
                done [shape="Msquare"]
                start -> step -> done
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await.unwrap();

        assert_eq!(
            result.final_context.get("last_stage"),
            Some(&serde_json::Value::String("step".into())),
        );
        assert_eq!(
            result.final_context.get("outcome"),
            Some(&serde_json::Value::String("success".into())),
        );
    }

    // Scenario 5: a satisfied goal gate completes normally; an unsatisfied one
    // fails the run with the documented message, routed through a fail-edge.
    #[tokio::test]
    async fn satisfied_goal_gate_completes() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                critical [shape="box", goal_gate=true, prompt="Critical step"]
                done [shape="Msquare"]
                start -> critical -> done
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await.unwrap();
        assert!(!result.failed);
        assert!(result.completed_nodes.contains(&"done".to_string()));
    }

    #[tokio::test]
    async fn unsatisfied_goal_gate_fails_with_message() {
        use async_trait::async_trait;
        use crate::graph::PipelineNode;
        use crate::handler::NodeHandler;

        struct FailHandler;

        #[async_trait]
        impl NodeHandler for FailHandler {
            fn handler_type(&self) -> &str {
                "codergen"
            }
            async fn execute(
                &self,
                _node: &PipelineNode,
                _ctx: &Context,
                _graph: &PipelineGraph,
                _logs_root: &Path,
            ) -> Result<Outcome> {
                Ok(Outcome::fail("diff rejected"))
            }
        }

        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                critical [shape="box", goal_gate=true, prompt="Critical step"]
                critical -> done [condition="outcome=fail"]
                done [shape="Msquare"]
                start -> critical
            }"#,
        );

        let mut registry = HandlerRegistry::new();
        registry.register(crate::handler::StartHandler);
        registry.register(crate::handler::ExitHandler);
        registry.register(crate::handler::ConditionalHandler);
        registry.register(FailHandler);

        let executor = PipelineExecutor::new(registry);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await.unwrap();

        assert!(result.failed);
        assert_eq!(
            result.failure_reason.as_deref(),
            Some("Goal gate unsatisfied at node 'critical': diff rejected")
        );
    }

    // Scenario 6: FAIL with no matching route surfaces a fatal error.
    #[tokio::test]
    async fn fail_with_no_route_is_fatal() {
        use async_trait::async_trait;
        use crate::graph::PipelineNode;
        use crate::handler::NodeHandler;

        struct FailHandler;

        #[async_trait]
        impl NodeHandler for FailHandler {
            fn handler_type(&self) -> &str {
                "codergen"
            }
            async fn execute(
                &self,
                _node: &PipelineNode,
                _ctx: &Context,
                _graph: &PipelineGraph,
                _logs_root: &Path,
            ) -> Result<Outcome> {
                Ok(Outcome::fail("boom"))
            }
        }

        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                step [shape="box", prompt="Step"]
                done [shape="Msquare"]
                start -> step -> done
            }"#,
        );

        let mut registry = HandlerRegistry::new();
        registry.register(crate::handler::StartHandler);
        registry.register(crate::handler::ExitHandler);
        registry.register(FailHandler);

        let executor = PipelineExecutor::new(registry);
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await;

        assert!(result.is_err());
        match result.unwrap_err() {
            AttractorError::StageFailNoRoute { node, reason } => {
                assert_eq!(node, "step");
                assert_eq!(reason, "boom");
            }
            other => panic!("expected StageFailNoRoute, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_end_non_terminal_node_stops_cleanly() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                step [shape="box", prompt="Step"]
                start -> step
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let dir = tempfile::tempdir().unwrap();
        let result = executor.run(&graph, &config(&dir)).await.unwrap();
        assert!(!result.failed);
        assert_eq!(result.completed_nodes, vec!["start", "step"]);
    }

    #[tokio::test]
    async fn emits_events_in_order() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                a [shape="box", prompt="A"]
                end [shape="Msquare"]
                start -> a -> end
            }"#,
        );
        let executor = PipelineExecutor::with_default_registry();
        let mut rx = executor.subscribe();
        let dir = tempfile::tempdir().unwrap();
        executor.run(&graph, &config(&dir)).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind().to_string());
        }
        assert_eq!(
            kinds,
            vec![
                "StageStarted",
                "StageCompleted",
                "StageStarted",
                "StageCompleted",
                "StageStarted",
                "StageCompleted",
                "PipelineCompleted",
            ]
        );
    }

    #[test]
    fn executor_constructors() {
        let executor = PipelineExecutor::with_default_registry();
        assert!(executor.registry.has("start"));
        assert!(executor.registry.has("exit"));
        assert!(executor.registry.has("codergen"));

        let custom = PipelineExecutor::new(HandlerRegistry::new());
        assert!(!custom.registry.has("start"));
    }
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attractor_dot::AttributeValue;
use attractor_types::{Context, Outcome, Result, StageStatus};

use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

/// Fixed subprocess timeout for shell-executed tool commands. The node schema
/// no longer carries a per-node timeout attribute.
const TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Extension point for tool nodes that shouldn't shell out. Registered by
/// `tool` attribute name and looked up before falling back to `tool_command`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn run(
        &self,
        node: &PipelineNode,
        context: &Context,
        graph: &PipelineGraph,
        logs_root: &Path,
    ) -> Result<Outcome>;
}

// ---------------------------------------------------------------------------
// ToolHandler — executes a registered tool, or a shell command (parallelogram
// shape)
// ---------------------------------------------------------------------------

pub struct ToolHandler {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolHandler {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        self.executors.insert(name.into(), executor);
    }
}

impl Default for ToolHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeHandler for ToolHandler {
    fn handler_type(&self) -> &str {
        "tool"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        context: &Context,
        graph: &PipelineGraph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        // A registered executor looked up by the `tool` attribute name takes
        // priority over shelling out via `tool_command`.
        if let Some(name) = node.raw_attrs.get("tool").and_then(|v| match v {
            AttributeValue::String(s) => Some(s.clone()),
            _ => None,
        }) {
            if let Some(executor) = self.executors.get(&name) {
                tracing::info!(node = %node.id, tool = %name, "Running registered tool executor");
                return executor.run(node, context, graph, logs_root).await;
            }
        }

        let command = match node.raw_attrs.get("tool_command").and_then(|v| match v {
            AttributeValue::String(s) => Some(s.clone()),
            _ => None,
        }) {
            Some(c) => c,
            None => {
                return Ok(Outcome::fail(format!(
                    "node '{}' has no 'tool' executor or 'tool_command' attribute",
                    node.id
                )));
            }
        };

        tracing::info!(node = %node.id, label = %node.label, command = %command, "Executing tool command");

        let dry_run = context
            .get("dry_run")
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if dry_run {
            tracing::info!(node = %node.id, "Dry run — skipping command execution");
            return Ok(Outcome {
                status: StageStatus::Success,
                preferred_label: None,
                suggested_next_ids: vec![],
                context_updates: {
                    let mut m = HashMap::new();
                    m.insert(
                        "tool.output".into(),
                        serde_json::Value::String(format!("(dry run) {command}")),
                    );
                    m
                },
                notes: format!("Dry run — command not executed: {command}"),
                failure_reason: None,
            });
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let snapshot = context.snapshot().await;
        if let Some(serde_json::Value::String(dir)) = snapshot.get("work_dir") {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return Ok(Outcome::fail(format!("failed to spawn command: {e}")));
            }
        };

        let output = match tokio::time::timeout(TOOL_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(Outcome::fail(format!("command execution failed: {e}")));
            }
            Err(_) => {
                return Ok(Outcome::fail(format!(
                    "command timed out after {}s",
                    TOOL_TIMEOUT.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        tracing::info!(
            node = %node.id,
            exit_code = exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Tool command completed"
        );

        let combined = if stderr.is_empty() {
            stdout
        } else {
            format!("{stdout}\n--- stderr ---\n{stderr}")
        };
        let notes = if combined.len() > 4096 {
            let truncate_at = combined
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|&i| i <= 4096)
                .last()
                .unwrap_or(0);
            format!("{}...(truncated)", &combined[..truncate_at])
        } else {
            combined.clone()
        };

        let mut updates = HashMap::new();
        updates.insert("tool.output".into(), serde_json::Value::String(combined));

        if output.status.success() {
            Ok(Outcome {
                status: StageStatus::Success,
                preferred_label: None,
                suggested_next_ids: vec![],
                context_updates: updates,
                notes,
                failure_reason: None,
            })
        } else {
            Ok(Outcome {
                status: StageStatus::Fail,
                preferred_label: None,
                suggested_next_ids: vec![],
                context_updates: updates,
                notes,
                failure_reason: Some(format!("command exited with code {exit_code}")),
            })
        }
    }
}

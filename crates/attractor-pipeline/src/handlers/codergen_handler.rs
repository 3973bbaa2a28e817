use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use attractor_types::{Context, Outcome, Result, StageStatus};

use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

/// What a [`CodergenBackend`] hands back for a rendered prompt.
pub enum BackendResponse {
    /// Free-form text. The handler wraps it into a SUCCESS outcome.
    Text(String),
    /// A fully-formed outcome, returned verbatim.
    Outcome(Outcome),
}

/// Extension point for codergen (box-shaped) nodes: renders a prompt and
/// hands it to whatever drives the actual code-generation work (an LLM
/// client, a scripted responder, etc).
#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(&self, node: &PipelineNode, prompt: &str, context: &Context) -> Result<BackendResponse>;
}

/// Handler for "codergen" type nodes (shape="box", the default handler).
///
/// Always renders the node's prompt (substituting `$goal`) and writes it to
/// `<logs_root>/<node.id>/prompt.md`. With no backend configured, returns a
/// deterministic simulated response so pipelines are runnable without any
/// external dependency. A `status.json` artifact is always written.
pub struct CodergenHandler {
    backend: Option<Arc<dyn CodergenBackend>>,
}

impl CodergenHandler {
    pub fn new() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Arc<dyn CodergenBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }
}

impl Default for CodergenHandler {
    fn default() -> Self {
        Self::new()
    }
}

async fn render_prompt(node: &PipelineNode, graph: &PipelineGraph, context: &Context) -> String {
    let template = node
        .prompt
        .clone()
        .unwrap_or_else(|| format!("Complete stage: {}", node.label));
    let goal = context.get_string("graph.goal", &graph.goal).await;
    template.replace("$goal", &goal)
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    fn handler_type(&self) -> &str {
        "codergen"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        context: &Context,
        graph: &PipelineGraph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let prompt = render_prompt(node, graph, context).await;

        let stage_dir = logs_root.join(&node.id);
        tokio::fs::create_dir_all(&stage_dir).await?;
        tokio::fs::write(stage_dir.join("prompt.md"), &prompt).await?;

        let outcome = match &self.backend {
            None => {
                let response = format!("[Simulated] Response for stage: {}", node.id);
                tokio::fs::write(stage_dir.join("response.md"), &response).await?;
                let mut outcome = Outcome::success(response);
                outcome
                    .context_updates
                    .insert("last_stage".into(), serde_json::Value::String(node.id.clone()));
                outcome
            }
            Some(backend) => match backend.run(node, &prompt, context).await {
                Ok(BackendResponse::Text(text)) => {
                    tokio::fs::write(stage_dir.join("response.md"), &text).await?;
                    let truncated: String = text.chars().take(200).collect();
                    let mut outcome = Outcome::success(text);
                    outcome
                        .context_updates
                        .insert("last_stage".into(), serde_json::Value::String(node.id.clone()));
                    outcome.context_updates.insert(
                        "last_response".into(),
                        serde_json::Value::String(truncated),
                    );
                    outcome
                }
                Ok(BackendResponse::Outcome(outcome)) => outcome,
                Err(e) => Outcome::fail(format!("codergen backend failed: {e}")),
            },
        };

        let status_path = stage_dir.join("status.json");
        let status_json = serde_json::json!({
            "outcome": outcome.status.to_string(),
            "preferred_next_label": outcome.preferred_label,
            "suggested_next_ids": outcome.suggested_next_ids,
            "context_updates": outcome.context_updates,
            "notes": outcome.notes,
            "failure_reason": outcome.failure_reason,
        });
        tokio::fs::write(status_path, serde_json::to_vec_pretty(&status_json)?).await?;

        Ok(outcome)
    }
}

//! Task runner: the single external surface an embedding application talks
//! to. Wraps [`PipelineExecutor`] runs behind a process-wide in-memory task
//! table with a bounded worker pool, so a caller gets a task id back
//! immediately and polls for progress instead of blocking on a run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use attractor_types::AttractorError;

use crate::engine::{PipelineConfig, PipelineExecutor};
use crate::events::PipelineEvent;
use crate::graph::PipelineGraph;
use crate::handler::HandlerRegistry;

/// Default worker pool size — SPEC_FULL.md §4.7 calls for a small fixed
/// concurrency, e.g. 4.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

/// A snapshot of a task's current state, safe to hand to an observer without
/// holding the runner's internal lock.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub events: Vec<serde_json::Value>,
    pub result: Option<serde_json::Value>,
}

struct TaskRecord {
    status: TaskStatus,
    events: Vec<serde_json::Value>,
    result: Option<serde_json::Value>,
}

impl TaskRecord {
    fn to_task(&self, id: &str) -> Task {
        Task {
            id: id.to_string(),
            status: self.status,
            events: self.events.clone(),
            result: self.result.clone(),
        }
    }
}

/// Maps a node id to the (step name, percentage) synthesized `progress`
/// event emitted when that node's `StageCompleted` event arrives. A closed
/// mapping supplied by the embedding application — nodes absent from it
/// produce no progress event.
pub type ProgressSteps = HashMap<String, (String, u8)>;

/// Process-wide task table plus a bounded worker pool that runs pipeline
/// traversals on behalf of `start`.
pub struct TaskRunner {
    graph: Arc<PipelineGraph>,
    registry_factory: Arc<dyn Fn() -> HandlerRegistry + Send + Sync>,
    logs_root: PathBuf,
    progress_steps: Arc<ProgressSteps>,
    semaphore: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
    order: Arc<Mutex<Vec<String>>>,
}

impl TaskRunner {
    pub fn new(
        graph: PipelineGraph,
        registry_factory: impl Fn() -> HandlerRegistry + Send + Sync + 'static,
        logs_root: impl Into<PathBuf>,
        progress_steps: ProgressSteps,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            registry_factory: Arc::new(registry_factory),
            logs_root: logs_root.into(),
            progress_steps: Arc::new(progress_steps),
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            order: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start a run with caller-supplied inputs. Returns the task id
    /// immediately; the run itself happens on the worker pool.
    pub async fn start(&self, inputs: HashMap<String, serde_json::Value>) -> String {
        let id = uuid::Uuid::new_v4().to_string();

        {
            let mut tasks = self.tasks.lock().await;
            tasks.insert(
                id.clone(),
                TaskRecord {
                    status: TaskStatus::Running,
                    events: Vec::new(),
                    result: None,
                },
            );
        }
        self.order.lock().await.push(id.clone());

        let graph = self.graph.clone();
        let registry = (self.registry_factory)();
        let logs_root = self.logs_root.join(&id);
        let progress_steps = self.progress_steps.clone();
        let tasks = self.tasks.clone();
        let semaphore = self.semaphore.clone();
        let task_id = id.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;

            let executor = PipelineExecutor::new(registry);
            let mut rx = executor.subscribe();
            let config = PipelineConfig::new(logs_root).with_inputs(inputs);

            let events_handle = {
                let tasks = tasks.clone();
                let task_id = task_id.clone();
                let progress_steps = progress_steps.clone();
                tokio::spawn(async move {
                    while let Ok(event) = rx.recv().await {
                        append_event_and_progress(&tasks, &task_id, &event, &progress_steps).await;
                    }
                })
            };

            let run_result = executor.run(&graph, &config).await;
            // Dropping the executor drops its EventEmitter's broadcast sender,
            // which closes the channel once every event already sent (including
            // the terminal StageCompleted/PipelineCompleted/PipelineFailed) has
            // been delivered. The forwarder's `while let Ok(..) = rx.recv()`
            // loop then drains the rest and exits on its own, so awaiting its
            // handle is guaranteed to see every event rather than racing it.
            drop(executor);
            let _ = events_handle.await;

            let mut tasks_guard = tasks.lock().await;
            let record = tasks_guard.get_mut(&task_id).expect("task record must exist");

            match run_result {
                Ok(result) => {
                    record.status = if result.failed {
                        TaskStatus::Failed
                    } else {
                        TaskStatus::Completed
                    };
                    record.result = Some(serde_json::json!({
                        "completed_nodes": result.completed_nodes,
                        "failed": result.failed,
                        "failure_reason": result.failure_reason,
                        "final_context": result.final_context,
                    }));
                    record.events.push(serde_json::json!({
                        "kind": "progress",
                        "percent": 100,
                    }));
                }
                Err(e) => {
                    record.status = TaskStatus::Failed;
                    record.events.push(serde_json::json!({
                        "kind": "error",
                        "message": error_message(&e),
                    }));
                }
            }
        });

        id
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        let tasks = self.tasks.lock().await;
        tasks.get(id).map(|r| r.to_task(id))
    }

    /// Reverse-chronological paging: page 0 is the most recently started.
    pub async fn list(&self, page: usize, size: usize) -> (Vec<Task>, usize) {
        let order = self.order.lock().await;
        let total = order.len();
        let tasks = self.tasks.lock().await;

        let reversed: Vec<&String> = order.iter().rev().collect();
        let start = page.saturating_mul(size);
        let page_ids = reversed.into_iter().skip(start).take(size);

        let page_tasks = page_ids
            .filter_map(|id| tasks.get(id).map(|r| r.to_task(id)))
            .collect();

        (page_tasks, total)
    }
}

async fn append_event_and_progress(
    tasks: &Arc<Mutex<HashMap<String, TaskRecord>>>,
    task_id: &str,
    event: &PipelineEvent,
    progress_steps: &ProgressSteps,
) {
    let mut tasks = tasks.lock().await;
    let Some(record) = tasks.get_mut(task_id) else {
        return;
    };
    record.events.push(serde_json::json!({
        "kind": event.kind(),
        "data": event.data(),
    }));

    if let PipelineEvent::StageCompleted { node_id, .. } = event {
        if let Some((step_name, percent)) = progress_steps.get(node_id) {
            record.events.push(serde_json::json!({
                "kind": "progress",
                "step": step_name,
                "percent": percent,
            }));
        }
    }
}

fn error_message(err: &AttractorError) -> String {
    err.to_string()
}

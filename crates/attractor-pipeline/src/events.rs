//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, task runner, UI, etc.) can subscribe to
//! pipeline execution progress without coupling to the engine internals.
//!
//! The event set is closed: `StageStarted`, `StageCompleted`,
//! `PipelineCompleted`, `PipelineFailed`. [`PipelineEvent::kind`] and
//! [`PipelineEvent::data`] let a consumer treat any event as the generic
//! `(kind, data)` pair external interfaces are documented against.

use serde::{Deserialize, Serialize};

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    StageStarted {
        node_id: String,
        label: String,
    },
    StageCompleted {
        node_id: String,
        outcome: attractor_types::StageStatus,
        notes: String,
    },
    PipelineCompleted {
        current_node: String,
    },
    PipelineFailed {
        reason: String,
    },
}

impl PipelineEvent {
    /// The event kind string, as used by the generic `(kind, data)` event
    /// sink interface.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::StageCompleted { .. } => "StageCompleted",
            PipelineEvent::PipelineCompleted { .. } => "PipelineCompleted",
            PipelineEvent::PipelineFailed { .. } => "PipelineFailed",
        }
    }

    /// The event's payload as a JSON object, matching the keys documented
    /// per kind.
    pub fn data(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Pipeline execution engine, node handlers, validation, and edge selection.
//!
//! This crate implements the core graph-driven pipeline runner: DOT graph
//! traversal, handler dispatch, edge selection, goal gate enforcement, and
//! the built-in lint rules.

pub mod condition;
pub mod edge_selection;
pub mod engine;
pub mod events;
pub mod goal_gate;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod task;
pub mod validation;

pub use condition::{evaluate_condition, parse_condition, Clause, ConditionExpr, Operator};
pub use edge_selection::{select_edge, select_fail_edge};
pub use engine::{PipelineConfig, PipelineExecutor, PipelineResult};
pub use events::{EventEmitter, PipelineEvent};
pub use goal_gate::{check_goal_gates, GoalGateResult};
pub use graph::{PipelineEdge, PipelineGraph, PipelineNode};
pub use handler::{
    default_registry, ConditionalHandler, DynHandler, ExitHandler, HandlerRegistry, NodeHandler,
    StartHandler,
};
pub use handlers::{
    BackendResponse, CodergenBackend, CodergenHandler, FanInHandler, ParallelHandler, ToolExecutor,
    ToolHandler,
};
pub use task::{Task, TaskRunner, TaskStatus};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};

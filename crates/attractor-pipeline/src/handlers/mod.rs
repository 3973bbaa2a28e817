//! Additional node handlers beyond the basic start/exit/conditional.

pub mod codergen_handler;
pub mod parallel;
pub mod tool_handler;

pub use codergen_handler::{BackendResponse, CodergenBackend, CodergenHandler};
pub use parallel::{FanInHandler, ParallelHandler};
pub use tool_handler::{ToolExecutor, ToolHandler};

// ---------------------------------------------------------------------------
// Shared test helpers used by child handler modules
// ---------------------------------------------------------------------------

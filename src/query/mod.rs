pub mod executor;
pub mod plan;

pub use plan::{EvalKind, MessageSelection, MessageWindow, ScoreRange, TraceQuery, WorkflowRunsQuery};

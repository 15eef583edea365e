//! Typed rows of the fixed tables and the operations over them.

mod evals;
mod messages;
mod threads;
mod traces;
mod workflows;

pub use evals::EvalRecord;
pub use messages::Message;
pub use threads::Thread;
pub use traces::Trace;
pub use workflows::{WorkflowRun, WorkflowRuns};

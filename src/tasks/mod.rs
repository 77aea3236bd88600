//! Background task pipeline: admission, execution, polling, supervision

pub mod orchestrator;
pub mod store;
pub mod supervisor;

pub use orchestrator::{
    OrchestratorStats, PollOutcome, StatsSnapshot, SubmitReceipt, TASK_ABORTED, TaskOrchestrator,
};
pub use store::{Admission, InMemoryTaskStore, Task, TaskOutcome, TaskStatus, TaskStore};
pub use supervisor::{SweepReport, Supervisor};

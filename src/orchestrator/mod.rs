mod manager;
mod status;
mod tasks;

pub use manager::{
    channel, Inbound, Orchestrator, OrchestratorHandle, OrchestratorSettings, PendingTask,
};
pub use status::{PendingStatus, SyncStatus};
pub use tasks::{TaskDone, TaskKind, TaskOutcome};

//! Hook event types.

use serde::{Deserialize, Serialize};

use reportd_types::{JobStatus, RunRecord, ScheduledJob};

/// Events that hooks can subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookEvent {
    /// The scheduler loop has started.
    SchedulerStarted,
    /// The scheduler loop has stopped.
    SchedulerStopped,
    /// A job was created.
    JobCreated { job: ScheduledJob },
    /// A job definition was edited.
    JobUpdated { job: ScheduledJob },
    /// A job was removed from the registry.
    JobDeleted { job_id: String },
    /// A job moved between lifecycle states.
    JobStatusChanged {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    /// An execution finished and was recorded in the ledger.
    RunFinished { record: RunRecord },
}

impl HookEvent {
    /// Event type name used for routing.
    pub fn type_name(&self) -> &'static str {
        match self {
            HookEvent::SchedulerStarted => "scheduler_started",
            HookEvent::SchedulerStopped => "scheduler_stopped",
            HookEvent::JobCreated { .. } => "job_created",
            HookEvent::JobUpdated { .. } => "job_updated",
            HookEvent::JobDeleted { .. } => "job_deleted",
            HookEvent::JobStatusChanged { .. } => "job_status_changed",
            HookEvent::RunFinished { .. } => "run_finished",
        }
    }
}

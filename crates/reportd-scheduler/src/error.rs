use reportd_storage::StorageError;
use reportd_types::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),
    #[error("invalid job definition: {0}")]
    InvalidJobDefinition(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("cannot {event} job {job_id} while it is {from}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        event: &'static str,
    },
    #[error("job {0} is already executing")]
    AlreadyRunning(String),
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

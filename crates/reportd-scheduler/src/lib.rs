//! reportd-scheduler: recurring report scheduling and execution.
//!
//! Jobs live in a [`JobRegistry`]; the [`Scheduler`] ticks on a fixed
//! interval, executes every active job whose next run is due through the
//! external [`Renderer`] and [`Deliverer`], drives the job through the
//! [`JobStateMachine`] and appends the outcome to the [`RunHistoryLedger`].

pub mod clock;
pub mod collaborator;
pub mod error;
pub mod ledger;
pub mod recurrence;
pub mod registry;
pub mod scheduler;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborator::{
    DeliveryError, Deliverer, ExecutionError, RenderError, RenderRequest, Renderer,
};
pub use error::{Result, SchedulerError};
pub use ledger::{RunHistory, RunHistoryLedger};
pub use recurrence::{RecurrenceCalculator, compute_next_run, validate_recurrence};
pub use registry::JobRegistry;
pub use scheduler::{Scheduler, TickReport};
pub use state::{JobEvent, JobStateMachine, Transition};

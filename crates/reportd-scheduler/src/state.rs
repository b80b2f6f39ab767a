//! Job lifecycle state machine.
//!
//! | from                          | event            | to        |
//! |-------------------------------|------------------|-----------|
//! | active                        | pause            | paused    |
//! | paused, failed, completed     | resume           | active    |
//! | active                        | due success      | active    |
//! | active                        | due failure      | failed    |
//! | paused                        | due (any)        | paused    |
//! | any                           | run-now success  | completed |
//! | any                           | run-now failure  | failed    |
//!
//! `paused + due` covers an execution that started before the job was
//! paused: the attempt is counted but the pause is kept. Every other pair
//! is rejected with [`SchedulerError::InvalidTransition`].

use std::fmt;

use chrono::{DateTime, Utc};

use reportd_types::{JobStatus, RunOutcome, ScheduledJob};

use crate::error::{Result, SchedulerError};
use crate::recurrence::RecurrenceCalculator;

/// Something that happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Pause,
    Resume,
    /// A scheduled execution finished.
    DueExecution(RunOutcome),
    /// An operator-triggered execution finished.
    ManualRun(RunOutcome),
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Pause => "pause",
            JobEvent::Resume => "resume",
            JobEvent::DueExecution(_) => "record a scheduled run of",
            JobEvent::ManualRun(_) => "record a manual run of",
        }
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The status change caused by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Applies [`JobEvent`]s to jobs, keeping `next_run` present iff the job is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStateMachine {
    calculator: RecurrenceCalculator,
}

impl JobStateMachine {
    pub fn new(calculator: RecurrenceCalculator) -> Self {
        Self { calculator }
    }

    pub fn calculator(&self) -> &RecurrenceCalculator {
        &self.calculator
    }

    /// Apply `event` at instant `now`. On error the job is left untouched.
    pub fn apply(
        &self,
        job: &mut ScheduledJob,
        event: JobEvent,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        use JobStatus::*;

        let from = job.status;
        match (from, event) {
            (Active, JobEvent::Pause) => {
                job.status = Paused;
                job.next_run = None;
            }
            (Paused | Failed | Completed, JobEvent::Resume) => {
                if job.recipients.is_empty() {
                    return Err(SchedulerError::InvalidJobDefinition(format!(
                        "job {} has no recipients and cannot be activated",
                        job.id
                    )));
                }
                let next = self.calculator.next_run(&job.recurrence, now)?;
                job.status = Active;
                job.next_run = Some(next);
            }
            (Active, JobEvent::DueExecution(RunOutcome::Success)) => {
                let next = self.calculator.next_run(&job.recurrence, now)?;
                record_attempt(job, now);
                job.next_run = Some(next);
            }
            (Active, JobEvent::DueExecution(RunOutcome::Failure)) => {
                record_attempt(job, now);
                job.status = Failed;
                job.next_run = None;
            }
            (Paused, JobEvent::DueExecution(_)) => {
                record_attempt(job, now);
            }
            (_, JobEvent::ManualRun(outcome)) => {
                record_attempt(job, now);
                job.status = match outcome {
                    RunOutcome::Success => Completed,
                    RunOutcome::Failure => Failed,
                };
                job.next_run = None;
            }
            (from, event) => {
                return Err(SchedulerError::InvalidTransition {
                    job_id: job.id.clone(),
                    from,
                    event: event.name(),
                });
            }
        }

        Ok(Transition {
            from,
            to: job.status,
        })
    }
}

fn record_attempt(job: &mut ScheduledJob, now: DateTime<Utc>) {
    job.last_run = Some(now);
    job.run_count += 1;
}

//! Job registry: owns job definitions and their scheduling state.
//!
//! With storage attached the database is the only copy. Every read goes to
//! it and every change is a read-modify-write of one row, so several
//! processes sharing the file (the daemon and control commands) always see
//! each other's edits and never resurrect a deleted job.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use reportd_storage::ReportStorage;
use reportd_types::{
    Frequency, JobDefinition, JobPatch, JobStatus, Recipient, Recurrence, ScheduledJob,
};

use crate::error::{Result, SchedulerError};
use crate::recurrence::{RecurrenceCalculator, validate_recurrence};
use crate::state::{JobEvent, JobStateMachine, Transition};

enum Backend {
    Memory(RwLock<Vec<ScheduledJob>>),
    Stored(Arc<ReportStorage>),
}

/// Insertion-ordered collection of scheduled jobs.
///
/// A failed change (validation, transition or storage) leaves the job as it
/// was.
pub struct JobRegistry {
    backend: Backend,
    machine: JobStateMachine,
}

impl JobRegistry {
    /// Create an in-memory registry.
    pub fn new(machine: JobStateMachine) -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(Vec::new())),
            machine,
        }
    }

    /// Create a registry persisted in `storage`. Call [`JobRegistry::load`] afterwards.
    pub fn with_storage(machine: JobStateMachine, storage: Arc<ReportStorage>) -> Self {
        Self {
            backend: Backend::Stored(storage),
            machine,
        }
    }

    /// Repair the scheduling state of stored jobs.
    ///
    /// Active jobs without a next run get one computed from `now`; inactive
    /// jobs lose any stale next run. Overdue jobs are left due so the first
    /// tick runs them once.
    pub async fn load(&self, now: DateTime<Utc>) -> Result<usize> {
        let Backend::Stored(storage) = &self.backend else {
            return Ok(0);
        };
        let jobs = storage.list_jobs().await?;
        let calculator = *self.machine.calculator();
        for job in jobs.iter().filter(|j| needs_repair(j)) {
            match self.modify(&job.id, move |job| repair(&calculator, job, now)).await {
                Ok((job, ())) => {
                    debug!(job_id = %job.id, status = %job.status, "Repaired stored job");
                }
                Err(SchedulerError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let count = jobs.len();
        info!("Loaded {count} report jobs");
        Ok(count)
    }

    /// Validate a definition and register it as an active job.
    pub async fn create(
        &self,
        definition: JobDefinition,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob> {
        let JobDefinition {
            name,
            description,
            report_kind,
            mut recurrence,
            recipients,
            filters,
            format,
        } = definition;

        let calculator = self.machine.calculator();
        validate_name(&name)?;
        validate_recipients(&recipients, true)?;
        normalize(calculator, &mut recurrence, now)?;
        let next_run = calculator.next_run(&recurrence, now)?;

        let job = ScheduledJob {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            description,
            report_kind,
            recurrence,
            recipients,
            filters,
            format,
            status: JobStatus::Active,
            created_at: now,
            last_run: None,
            next_run: Some(next_run),
            run_count: 0,
        };

        match &self.backend {
            Backend::Stored(storage) => storage.save_job(&job).await?,
            Backend::Memory(jobs) => jobs.write().await.push(job.clone()),
        }
        Ok(job)
    }

    /// Apply a partial edit. A new recurrence reschedules an active job from `now`.
    pub async fn update(
        &self,
        id: &str,
        patch: JobPatch,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob> {
        let calculator = *self.machine.calculator();
        let (job, ()) = self
            .modify(id, move |job| apply_patch(&calculator, job, patch, now))
            .await?;
        Ok(job)
    }

    /// Remove a job. Removing an unknown id is not an error.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        match &self.backend {
            Backend::Stored(storage) => Ok(storage.delete_job(id).await?),
            Backend::Memory(jobs) => {
                let mut jobs = jobs.write().await;
                let before = jobs.len();
                jobs.retain(|j| j.id != id);
                Ok(jobs.len() != before)
            }
        }
    }

    /// Snapshot of all jobs in insertion order.
    pub async fn list(&self) -> Result<Vec<ScheduledJob>> {
        match &self.backend {
            Backend::Stored(storage) => Ok(storage.list_jobs().await?),
            Backend::Memory(jobs) => Ok(jobs.read().await.clone()),
        }
    }

    pub async fn get(&self, id: &str) -> Result<ScheduledJob> {
        let job = match &self.backend {
            Backend::Stored(storage) => storage.get_job(id).await?,
            Backend::Memory(jobs) => jobs.read().await.iter().find(|j| j.id == id).cloned(),
        };
        job.ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// Active jobs whose next run is at or before `now`.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let mut jobs = self.list().await?;
        jobs.retain(|j| j.is_due(now));
        Ok(jobs)
    }

    /// Drive a job through the state machine and persist the result.
    ///
    /// A job deleted in the meantime yields [`SchedulerError::NotFound`] and
    /// stays deleted.
    pub async fn apply(
        &self,
        id: &str,
        event: JobEvent,
        now: DateTime<Utc>,
    ) -> Result<(ScheduledJob, Transition)> {
        let machine = self.machine;
        self.modify(id, move |job| machine.apply(job, event, now)).await
    }

    /// Run `f` against the current version of a job and keep the result only
    /// if it succeeds.
    async fn modify<T, F>(&self, id: &str, f: F) -> Result<(ScheduledJob, T)>
    where
        F: FnOnce(&mut ScheduledJob) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match &self.backend {
            Backend::Stored(storage) => storage
                .modify_job(id, f)
                .await?
                .unwrap_or_else(|| Err(SchedulerError::NotFound(id.to_string()))),
            Backend::Memory(jobs) => {
                let mut jobs = jobs.write().await;
                let slot = find_mut(&mut jobs, id)?;
                let mut job = slot.clone();
                let value = f(&mut job)?;
                *slot = job.clone();
                Ok((job, value))
            }
        }
    }
}

fn apply_patch(
    calculator: &RecurrenceCalculator,
    job: &mut ScheduledJob,
    patch: JobPatch,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(name) = patch.name {
        validate_name(&name)?;
        job.name = name.trim().to_string();
    }
    if let Some(description) = patch.description {
        job.description = description;
    }
    if let Some(kind) = patch.report_kind {
        job.report_kind = kind;
    }
    if let Some(format) = patch.format {
        job.format = format;
    }
    if let Some(filters) = patch.filters {
        job.filters = filters;
    }
    if let Some(recipients) = patch.recipients {
        validate_recipients(&recipients, job.is_active())?;
        job.recipients = recipients;
    }
    if let Some(mut recurrence) = patch.recurrence {
        normalize(calculator, &mut recurrence, now)?;
        if job.is_active() {
            job.next_run = Some(calculator.next_run(&recurrence, now)?);
        }
        job.recurrence = recurrence;
    }
    Ok(())
}

/// Validate a recurrence and pin quarterly rules to the day and month of `now`.
fn normalize(
    calculator: &RecurrenceCalculator,
    recurrence: &mut Recurrence,
    now: DateTime<Utc>,
) -> Result<()> {
    validate_recurrence(recurrence)?;
    if recurrence.frequency == Frequency::Quarterly {
        recurrence
            .day_of_month
            .get_or_insert_with(|| calculator.local_day_of_month(now));
        recurrence
            .anchor_month
            .get_or_insert_with(|| calculator.local_month(now));
    }
    Ok(())
}

fn needs_repair(job: &ScheduledJob) -> bool {
    job.is_active() != job.next_run.is_some()
        || (job.recurrence.frequency == Frequency::Quarterly
            && job.recurrence.anchor_month.is_none())
}

fn repair(
    calculator: &RecurrenceCalculator,
    job: &mut ScheduledJob,
    now: DateTime<Utc>,
) -> Result<()> {
    if job.recurrence.frequency == Frequency::Quarterly && job.recurrence.anchor_month.is_none() {
        // Quarterly rows stored without a phase keep the one of their creation.
        job.recurrence.anchor_month = Some(calculator.local_month(job.created_at));
    }
    match (job.status, job.next_run) {
        (JobStatus::Active, None) => match calculator.next_run(&job.recurrence, now) {
            Ok(next) => job.next_run = Some(next),
            Err(e) => {
                warn!(job_id = %job.id, "Cannot schedule stored job, marking failed: {e}");
                job.status = JobStatus::Failed;
            }
        },
        (JobStatus::Active, Some(_)) | (_, None) => {}
        (_, Some(_)) => job.next_run = None,
    }
    Ok(())
}

fn find_mut<'a>(jobs: &'a mut [ScheduledJob], id: &str) -> Result<&'a mut ScheduledJob> {
    jobs.iter_mut()
        .find(|j| j.id == id)
        .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SchedulerError::InvalidJobDefinition(
            "name must not be empty".into(),
        ));
    }
    Ok(())
}

fn validate_recipients(recipients: &[Recipient], required: bool) -> Result<()> {
    if required && recipients.is_empty() {
        return Err(SchedulerError::InvalidJobDefinition(
            "an active job needs at least one recipient".into(),
        ));
    }
    let mut seen = HashSet::new();
    for r in recipients {
        let address = r.address.trim().to_ascii_lowercase();
        if address.is_empty() {
            return Err(SchedulerError::InvalidJobDefinition(
                "recipient address must not be empty".into(),
            ));
        }
        if !seen.insert(address) {
            return Err(SchedulerError::InvalidJobDefinition(format!(
                "duplicate recipient {}",
                r.address
            )));
        }
    }
    Ok(())
}

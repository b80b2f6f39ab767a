//! Report scheduler: executes due jobs and exposes the control surface.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reportd_config::SchedulerConfig;
use reportd_hooks::{HookEvent, HookRegistry};
use reportd_storage::ReportStorage;
use reportd_types::{
    DeliveryOutcome, JobDefinition, JobPatch, RunOutcome, RunRecord, RunTrigger, ScheduledJob,
};

use crate::clock::{Clock, SystemClock};
use crate::collaborator::{
    DeliveryError, Deliverer, ExecutionError, RenderError, RenderRequest, Renderer,
};
use crate::error::{Result, SchedulerError};
use crate::ledger::{RunHistory, RunHistoryLedger};
use crate::recurrence::RecurrenceCalculator;
use crate::registry::JobRegistry;
use crate::state::{JobEvent, JobStateMachine, Transition};

/// What a single tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Records of every job executed in this tick.
    pub executed: Vec<RunRecord>,
    /// Jobs that were due but not executed (already running, paused or
    /// deleted since the scan).
    pub skipped: Vec<String>,
    /// Jobs whose outcome could not be recorded.
    pub errors: Vec<(String, String)>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.skipped.is_empty() && self.errors.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.executed
            .iter()
            .filter(|r| r.outcome == RunOutcome::Failure)
            .count()
    }
}

enum DueResult {
    Executed(RunRecord),
    Skipped(String),
    Errored(String, SchedulerError),
}

/// Manages report jobs and executes them when they become due.
pub struct Scheduler {
    registry: JobRegistry,
    ledger: RunHistoryLedger,
    renderer: Arc<dyn Renderer>,
    deliverer: Arc<dyn Deliverer>,
    clock: Arc<dyn Clock>,
    hooks: Option<Arc<HookRegistry>>,
    config: SchedulerConfig,
    /// Ids of jobs with an execution in flight.
    in_flight: Mutex<HashSet<String>>,
}

impl Scheduler {
    /// Create a scheduler that keeps jobs and history in memory.
    pub fn new(
        config: SchedulerConfig,
        renderer: Arc<dyn Renderer>,
        deliverer: Arc<dyn Deliverer>,
    ) -> Result<Self> {
        let machine = state_machine(&config)?;
        Ok(Self::assemble(
            config,
            JobRegistry::new(machine),
            RunHistoryLedger::new(),
            renderer,
            deliverer,
        ))
    }

    /// Create a scheduler backed by persistent storage. Call [`Scheduler::load`] before use.
    pub fn with_storage(
        config: SchedulerConfig,
        storage: Arc<ReportStorage>,
        renderer: Arc<dyn Renderer>,
        deliverer: Arc<dyn Deliverer>,
    ) -> Result<Self> {
        let machine = state_machine(&config)?;
        Ok(Self::assemble(
            config,
            JobRegistry::with_storage(machine, storage.clone()),
            RunHistoryLedger::with_storage(storage),
            renderer,
            deliverer,
        ))
    }

    fn assemble(
        config: SchedulerConfig,
        registry: JobRegistry,
        ledger: RunHistoryLedger,
        renderer: Arc<dyn Renderer>,
        deliverer: Arc<dyn Deliverer>,
    ) -> Self {
        Self {
            registry,
            ledger,
            renderer,
            deliverer,
            clock: Arc::new(SystemClock),
            hooks: None,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the time source used by control operations and the run loop.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Emit lifecycle events to `hooks`.
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Restore jobs from storage.
    pub async fn load(&self) -> Result<usize> {
        self.registry.load(self.clock.now()).await
    }

    // ─── Control Surface ────────────────────────────────────

    pub async fn create_job(&self, definition: JobDefinition) -> Result<ScheduledJob> {
        let job = self.registry.create(definition, self.clock.now()).await?;
        info!(job_id = %job.id, name = %job.name, next_run = ?job.next_run, "Created report job");
        self.emit(HookEvent::JobCreated { job: job.clone() }).await;
        Ok(job)
    }

    pub async fn update_job(&self, id: &str, patch: JobPatch) -> Result<ScheduledJob> {
        let job = self.registry.update(id, patch, self.clock.now()).await?;
        info!(job_id = %job.id, "Updated report job");
        self.emit(HookEvent::JobUpdated { job: job.clone() }).await;
        Ok(job)
    }

    /// Delete a job. Returns whether it existed; deleting twice is not an error.
    /// Its run history is kept.
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let removed = self.registry.delete(id).await?;
        if removed {
            info!(job_id = %id, "Deleted report job");
            self.emit(HookEvent::JobDeleted {
                job_id: id.to_string(),
            })
            .await;
        }
        Ok(removed)
    }

    pub async fn pause_job(&self, id: &str) -> Result<ScheduledJob> {
        self.transition(id, JobEvent::Pause, self.clock.now()).await
    }

    pub async fn resume_job(&self, id: &str) -> Result<ScheduledJob> {
        self.transition(id, JobEvent::Resume, self.clock.now()).await
    }

    pub async fn get_job(&self, id: &str) -> Result<ScheduledJob> {
        self.registry.get(id).await
    }

    /// All jobs in creation order, as currently stored.
    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.registry.list().await
    }

    /// Run history of a job, including jobs that have since been deleted.
    pub async fn list_history(&self, id: &str) -> Result<RunHistory> {
        self.ledger.list_for(id).await
    }

    /// Execute a job immediately, whatever its status.
    ///
    /// Fails with [`SchedulerError::AlreadyRunning`] if the job is being
    /// executed by a tick or another run-now.
    pub async fn run_now(&self, id: &str) -> Result<RunRecord> {
        let now = self.clock.now();
        let _guard = self
            .claim(id)
            .ok_or_else(|| SchedulerError::AlreadyRunning(id.to_string()))?;
        let job = self.registry.get(id).await?;

        info!(job_id = %id, status = %job.status, "Running report job on demand");
        let record = self.execute(&job, now, RunTrigger::Manual).await;
        let applied = self
            .registry
            .apply(id, JobEvent::ManualRun(record.outcome), now)
            .await;
        self.ledger.append(record.clone()).await?;

        match applied {
            Ok((_, transition)) => self.announce(id, transition).await,
            Err(SchedulerError::NotFound(_)) => {
                debug!(job_id = %id, "Job deleted during manual run");
            }
            Err(e) => return Err(e),
        }
        self.emit(HookEvent::RunFinished {
            record: record.clone(),
        })
        .await;
        Ok(record)
    }

    // ─── Execution ──────────────────────────────────────────

    /// Execute every job due at `now`, at most once each.
    ///
    /// Up to `max_concurrent_runs` jobs run at the same time; a failing job
    /// never prevents the others from running.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let due = match self.registry.due_jobs(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!("Failed to scan for due report jobs: {e}");
                return TickReport::default();
            }
        };
        debug!(due = due.len(), %now, "Scanning for due report jobs");
        if due.is_empty() {
            return TickReport::default();
        }

        let results: Vec<DueResult> = futures::stream::iter(due)
            .map(|job| self.run_due(job.id, now))
            .buffer_unordered(self.config.max_concurrent_runs)
            .collect()
            .await;

        let mut report = TickReport::default();
        for result in results {
            match result {
                DueResult::Executed(record) => report.executed.push(record),
                DueResult::Skipped(id) => report.skipped.push(id),
                DueResult::Errored(id, e) => report.errors.push((id, e.to_string())),
            }
        }
        report
    }

    async fn run_due(&self, job_id: String, now: DateTime<Utc>) -> DueResult {
        let Some(_guard) = self.claim(&job_id) else {
            debug!(job_id = %job_id, "Job already executing, skipping");
            return DueResult::Skipped(job_id);
        };
        // The job may have changed between the scan and claiming it.
        let job = match self.registry.get(&job_id).await {
            Ok(job) if job.is_due(now) => job,
            _ => {
                debug!(job_id = %job_id, "Job no longer due, skipping");
                return DueResult::Skipped(job_id);
            }
        };

        info!(job_id = %job_id, name = %job.name, "Executing report job");
        let record = self.execute(&job, now, RunTrigger::Scheduled).await;

        match self
            .registry
            .apply(&job_id, JobEvent::DueExecution(record.outcome), now)
            .await
        {
            Ok((_, transition)) => self.announce(&job_id, transition).await,
            Err(SchedulerError::NotFound(_)) => {
                debug!(job_id = %job_id, "Job deleted during execution");
            }
            Err(e) => {
                warn!(job_id = %job_id, "Failed to record job state: {e}");
                if let Err(e) = self.ledger.append(record).await {
                    warn!(job_id = %job_id, "Failed to append run record: {e}");
                }
                return DueResult::Errored(job_id, e);
            }
        }

        if let Err(e) = self.ledger.append(record.clone()).await {
            warn!(job_id = %job_id, "Failed to append run record: {e}");
            return DueResult::Errored(job_id, e);
        }
        self.emit(HookEvent::RunFinished {
            record: record.clone(),
        })
        .await;
        DueResult::Executed(record)
    }

    /// Render and deliver one job, turning the result into a run record.
    async fn execute(
        &self,
        job: &ScheduledJob,
        now: DateTime<Utc>,
        trigger: RunTrigger,
    ) -> RunRecord {
        let started = Instant::now();
        let result = self.render_and_deliver(job).await;
        let duration_millis = u64::try_from(started.elapsed().as_millis()).ok();

        let (outcome, error) = match result {
            Ok(delivery) => {
                debug!(
                    job_id = %job.id,
                    delivered = delivery.delivered_to.len(),
                    "Report delivered"
                );
                (RunOutcome::Success, None)
            }
            Err(e) => {
                warn!(job_id = %job.id, "Report job failed: {e}");
                (RunOutcome::Failure, Some(e.to_string()))
            }
        };

        RunRecord {
            job_id: job.id.clone(),
            executed_at: now,
            outcome,
            duration_millis,
            trigger,
            error,
        }
    }

    async fn render_and_deliver(
        &self,
        job: &ScheduledJob,
    ) -> std::result::Result<DeliveryOutcome, ExecutionError> {
        let limit = self.config.execution_timeout();
        let request = RenderRequest::from(job);

        let artifact = tokio::time::timeout(limit, self.renderer.render(&request))
            .await
            .map_err(|_| RenderError::Timeout(limit))??;
        let delivery = self.deliverer.deliver(&artifact, &job.recipients);
        let delivery = tokio::time::timeout(limit, delivery)
            .await
            .map_err(|_| DeliveryError::Timeout(limit))??;
        Ok(delivery)
    }

    // ─── Run Loop ───────────────────────────────────────────

    /// Tick on the configured interval until `shutdown` is cancelled.
    ///
    /// A tick in progress is allowed to finish; executions are never pre-empted.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.tick_interval_secs,
            "Report scheduler started"
        );
        self.emit(HookEvent::SchedulerStarted).await;

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.tick(self.clock.now()).await;
                    if !report.is_empty() {
                        info!(
                            executed = report.executed.len(),
                            failed = report.failures(),
                            skipped = report.skipped.len(),
                            errors = report.errors.len(),
                            "Tick finished"
                        );
                    }
                }
            }
        }

        self.emit(HookEvent::SchedulerStopped).await;
        info!("Report scheduler stopped");
    }

    // ─── Helpers ────────────────────────────────────────────

    async fn transition(
        &self,
        id: &str,
        event: JobEvent,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob> {
        let (job, transition) = self.registry.apply(id, event, now).await?;
        self.announce(id, transition).await;
        Ok(job)
    }

    async fn announce(&self, id: &str, transition: Transition) {
        if transition.changed() {
            info!(job_id = %id, from = %transition.from, to = %transition.to, "Job status changed");
            self.emit(HookEvent::JobStatusChanged {
                job_id: id.to_string(),
                from: transition.from,
                to: transition.to,
            })
            .await;
        }
    }

    async fn emit(&self, event: HookEvent) {
        if let Some(hooks) = &self.hooks {
            hooks.emit(event).await;
        }
    }

    /// Mark a job as executing. `None` if it already is.
    fn claim(&self, id: &str) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }
}

fn state_machine(config: &SchedulerConfig) -> Result<JobStateMachine> {
    if config.tick_interval_secs == 0
        || config.execution_timeout_secs == 0
        || config.max_concurrent_runs == 0
    {
        return Err(SchedulerError::InvalidConfig(
            "tick interval, execution timeout and concurrency must be positive".into(),
        ));
    }
    let calculator = RecurrenceCalculator::from_offset_minutes(config.utc_offset_minutes)?;
    Ok(JobStateMachine::new(calculator))
}

/// Releases a job's in-flight mark on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

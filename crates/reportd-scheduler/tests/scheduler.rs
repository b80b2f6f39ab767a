use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use reportd_config::SchedulerConfig;
use reportd_hooks::{HookEvent, HookHandler, HookRegistry};
use reportd_storage::ReportStorage;
use reportd_types::{
    Artifact, DeliveryOutcome, Filters, JobDefinition, JobPatch, JobStatus, Recipient, Recurrence,
    ReportFormat, ReportKind, RunOutcome, RunTrigger, TimeOfDay,
};
use reportd_scheduler::{
    DeliveryError, Deliverer, ManualClock, RenderError, RenderRequest, Renderer, Scheduler,
    SchedulerError,
};

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Renders a tiny artifact; fails for job names listed in `failing`.
#[derive(Default)]
struct FakeRenderer {
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRenderer {
    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Artifact, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&request.job_name) {
            return Err(RenderError::Failed("data source unavailable".into()));
        }
        Ok(Artifact {
            file_name: format!("{}.{}", request.job_id, request.format.extension()),
            content_type: request.format.content_type().into(),
            content: request.job_name.as_bytes().to_vec(),
        })
    }
}

/// Blocks every render until released.
#[derive(Default)]
struct GatedRenderer {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Renderer for GatedRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Artifact, RenderError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(Artifact {
            file_name: request.job_id.clone(),
            content_type: "text/plain".into(),
            content: Vec::new(),
        })
    }
}

/// Records deliveries; rejects artifacts whose content is a name in `failing`.
#[derive(Default)]
struct RecordingDeliverer {
    failing: HashSet<String>,
    delay: Option<Duration>,
    deliveries: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingDeliverer {
    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    async fn deliver(
        &self,
        artifact: &Artifact,
        recipients: &[Recipient],
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&*String::from_utf8_lossy(&artifact.content)) {
            return Err(DeliveryError::Failed("mail relay rejected the message".into()));
        }
        let addresses: Vec<String> = recipients.iter().map(|r| r.address.clone()).collect();
        self.deliveries
            .lock()
            .await
            .push((artifact.file_name.clone(), addresses.clone()));
        Ok(DeliveryOutcome {
            delivered_to: addresses,
        })
    }
}

struct Harness {
    scheduler: Arc<Scheduler>,
    clock: Arc<ManualClock>,
    renderer: Arc<FakeRenderer>,
    deliverer: Arc<RecordingDeliverer>,
}

fn harness_with(renderer: FakeRenderer, config: SchedulerConfig, start: &str) -> Harness {
    build_harness(renderer, RecordingDeliverer::default(), config, start)
}

fn build_harness(
    renderer: FakeRenderer,
    deliverer: RecordingDeliverer,
    config: SchedulerConfig,
    start: &str,
) -> Harness {
    let clock = Arc::new(ManualClock::new(ts(start)));
    let renderer = Arc::new(renderer);
    let deliverer = Arc::new(deliverer);
    let scheduler = Scheduler::new(config, renderer.clone(), deliverer.clone())
        .unwrap()
        .with_clock(clock.clone());
    Harness {
        scheduler: Arc::new(scheduler),
        clock,
        renderer,
        deliverer,
    }
}

fn harness(renderer: FakeRenderer, start: &str) -> Harness {
    harness_with(renderer, SchedulerConfig::default(), start)
}

fn definition(name: &str, recurrence: Recurrence) -> JobDefinition {
    JobDefinition {
        name: name.into(),
        description: String::new(),
        report_kind: ReportKind::Class,
        recurrence,
        recipients: vec![Recipient::new("educator@example.com", "Educator", "educator")],
        filters: Filters::new(),
        format: ReportFormat::Pdf,
    }
}

fn daily_nine() -> Recurrence {
    Recurrence::daily(TimeOfDay::new(9, 0))
}

#[tokio::test]
async fn test_weekly_job_created_on_wednesday_runs_next_monday() {
    // 2024-03-06 is a Wednesday.
    let h = harness(FakeRenderer::default(), "2024-03-06T10:00:00Z");
    let job = h
        .scheduler
        .create_job(definition("Weekly", Recurrence::weekly(1, TimeOfDay::new(9, 0))))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.next_run, Some(ts("2024-03-11T09:00:00Z")));

    assert!(h.scheduler.tick(ts("2024-03-10T09:00:00Z")).await.is_empty());
    let report = h.scheduler.tick(ts("2024-03-11T09:00:00Z")).await;
    assert_eq!(report.executed.len(), 1);

    let job = h.scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(job.next_run, Some(ts("2024-03-18T09:00:00Z")));
    assert_eq!(job.last_run, Some(ts("2024-03-11T09:00:00Z")));
}

#[tokio::test]
async fn test_paused_then_deleted_job_keeps_history() {
    let h = harness(FakeRenderer::default(), "2024-03-06T08:00:00Z");
    let job = h
        .scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();
    h.scheduler.tick(ts("2024-03-06T09:00:00Z")).await;

    h.scheduler.pause_job(&job.id).await.unwrap();
    assert!(h.scheduler.delete_job(&job.id).await.unwrap());

    assert!(h.scheduler.list_jobs().await.unwrap().is_empty());
    assert!(matches!(
        h.scheduler.get_job(&job.id).await,
        Err(SchedulerError::NotFound(_))
    ));
    let history = h.scheduler.list_history(&job.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.last().unwrap().outcome, RunOutcome::Success);
}

#[tokio::test]
async fn test_render_failure_marks_job_failed_and_others_still_run() {
    let h = harness(FakeRenderer::failing(&["Broken"]), "2024-03-06T08:00:00Z");
    let broken = h
        .scheduler
        .create_job(definition("Broken", daily_nine()))
        .await
        .unwrap();
    let healthy = h
        .scheduler
        .create_job(definition("Healthy", daily_nine()))
        .await
        .unwrap();

    let report = h.scheduler.tick(ts("2024-03-06T09:00:00Z")).await;
    assert_eq!(report.executed.len(), 2);
    assert_eq!(report.failures(), 1);
    assert!(report.errors.is_empty());

    let broken = h.scheduler.get_job(&broken.id).await.unwrap();
    assert_eq!(broken.status, JobStatus::Failed);
    assert_eq!(broken.next_run, None);
    assert_eq!(broken.run_count, 1);
    let history = h.scheduler.list_history(&broken.id).await.unwrap();
    assert_eq!(history.len(), 1);
    let record = history.last().unwrap();
    assert_eq!(record.outcome, RunOutcome::Failure);
    assert!(record.error.as_deref().unwrap().contains("data source unavailable"));

    let healthy = h.scheduler.get_job(&healthy.id).await.unwrap();
    assert_eq!(healthy.status, JobStatus::Active);
    assert_eq!(healthy.next_run, Some(ts("2024-03-07T09:00:00Z")));
    assert_eq!(h.deliverer.deliveries.lock().await.len(), 1);

    // Failed jobs are no longer picked up.
    let report = h.scheduler.tick(ts("2024-03-07T09:00:00Z")).await;
    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.executed[0].job_id, healthy.id);
}

#[tokio::test]
async fn test_run_now_on_paused_job() {
    let h = harness(FakeRenderer::default(), "2024-03-06T08:00:00Z");
    let job = h
        .scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();
    let paused = h.scheduler.pause_job(&job.id).await.unwrap();
    assert_eq!(paused.next_run, None);

    h.clock.set(ts("2024-03-06T08:30:00Z"));
    let record = h.scheduler.run_now(&job.id).await.unwrap();
    assert_eq!(record.outcome, RunOutcome::Success);
    assert_eq!(record.trigger, RunTrigger::Manual);
    assert_eq!(record.executed_at, ts("2024-03-06T08:30:00Z"));

    let job = h.scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(job.next_run, None);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.run_count, 1);
    assert_eq!(h.scheduler.list_history(&job.id).await.unwrap().len(), 1);
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_now_unknown_job() {
    let h = harness(FakeRenderer::default(), "2024-03-06T08:00:00Z");
    assert!(matches!(
        h.scheduler.run_now("missing").await,
        Err(SchedulerError::NotFound(_))
    ));
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_twice_is_not_an_error() {
    let h = harness(FakeRenderer::default(), "2024-03-06T08:00:00Z");
    let job = h
        .scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();
    assert!(h.scheduler.delete_job(&job.id).await.unwrap());
    assert!(!h.scheduler.delete_job(&job.id).await.unwrap());
}

#[tokio::test]
async fn test_run_count_matches_executions() {
    let h = harness(FakeRenderer::default(), "2024-03-01T00:00:00Z");
    let job = h
        .scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();

    let mut now = ts("2024-03-01T09:00:00Z");
    for _ in 0..5 {
        h.scheduler.tick(now).await;
        now += chrono::Duration::days(1);
    }
    h.scheduler.run_now(&job.id).await.unwrap();

    let job = h.scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(job.run_count, 6);
    assert_eq!(h.scheduler.list_history(&job.id).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = harness(FakeRenderer::default(), "2024-03-06T08:00:00Z");
    let job = h
        .scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();

    let paused = h.scheduler.pause_job(&job.id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.next_run, None);
    assert!(h.scheduler.tick(ts("2024-03-06T09:00:00Z")).await.is_empty());

    assert!(matches!(
        h.scheduler.pause_job(&job.id).await,
        Err(SchedulerError::InvalidTransition { .. })
    ));

    let resume_at = ts("2024-03-08T12:00:00Z");
    h.clock.set(resume_at);
    let resumed = h.scheduler.resume_job(&job.id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Active);
    assert!(resumed.next_run.unwrap() >= resume_at);
    assert_eq!(resumed.next_run, Some(ts("2024-03-09T09:00:00Z")));
}

#[tokio::test]
async fn test_tick_runs_each_job_once() {
    let h = harness(FakeRenderer::default(), "2024-03-06T08:00:00Z");
    h.scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();

    // Several missed days still yield a single execution.
    let late = ts("2024-03-10T12:00:00Z");
    assert_eq!(h.scheduler.tick(late).await.executed.len(), 1);
    assert!(h.scheduler.tick(late).await.is_empty());
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_updated_recurrence_reschedules() {
    let h = harness(FakeRenderer::default(), "2024-03-06T08:00:00Z");
    let job = h
        .scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();
    let updated = h
        .scheduler
        .update_job(
            &job.id,
            JobPatch {
                recurrence: Some(Recurrence::monthly(31, TimeOfDay::new(7, 0))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.next_run, Some(ts("2024-03-31T07:00:00Z")));
}

#[tokio::test(start_paused = true)]
async fn test_render_timeout_is_a_failure() {
    let config = SchedulerConfig {
        execution_timeout_secs: 1,
        ..Default::default()
    };
    let h = harness_with(
        FakeRenderer::slow(Duration::from_secs(60)),
        config,
        "2024-03-06T08:00:00Z",
    );
    let job = h
        .scheduler
        .create_job(definition("Slow", daily_nine()))
        .await
        .unwrap();

    let report = h.scheduler.tick(ts("2024-03-06T09:00:00Z")).await;
    assert_eq!(report.failures(), 1);
    let record = &report.executed[0];
    assert!(record.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(
        h.scheduler.get_job(&job.id).await.unwrap().status,
        JobStatus::Failed
    );
    assert!(h.deliverer.deliveries.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_tick_concurrency_is_bounded() {
    let config = SchedulerConfig {
        max_concurrent_runs: 2,
        ..Default::default()
    };
    let h = harness_with(
        FakeRenderer::slow(Duration::from_millis(100)),
        config,
        "2024-03-06T08:00:00Z",
    );
    for i in 0..5 {
        h.scheduler
            .create_job(definition(&format!("Job {i}"), daily_nine()))
            .await
            .unwrap();
    }

    let report = h.scheduler.tick(ts("2024-03-06T09:00:00Z")).await;
    assert_eq!(report.executed.len(), 5);
    assert!(h.renderer.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_in_flight_job_is_not_executed_twice() {
    let clock = Arc::new(ManualClock::new(ts("2024-03-06T08:00:00Z")));
    let renderer = Arc::new(GatedRenderer::default());
    let scheduler = Arc::new(
        Scheduler::new(
            SchedulerConfig::default(),
            renderer.clone(),
            Arc::new(RecordingDeliverer::default()),
        )
        .unwrap()
        .with_clock(clock.clone()),
    );
    let job = scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();

    let manual = tokio::spawn({
        let scheduler = scheduler.clone();
        let id = job.id.clone();
        async move { scheduler.run_now(&id).await }
    });
    renderer.started.notified().await;

    let report = scheduler.tick(ts("2024-03-06T09:00:00Z")).await;
    assert!(report.executed.is_empty());
    assert_eq!(report.skipped, vec![job.id.clone()]);
    assert!(matches!(
        scheduler.run_now(&job.id).await,
        Err(SchedulerError::AlreadyRunning(_))
    ));

    renderer.release.notify_one();
    let record = manual.await.unwrap().unwrap();
    assert_eq!(record.outcome, RunOutcome::Success);
    assert_eq!(scheduler.list_history(&job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_restart_restores_jobs_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("reportd.db");
    let config = SchedulerConfig::default();

    let job_id = {
        let storage = Arc::new(ReportStorage::open(&db).unwrap());
        let scheduler = Scheduler::with_storage(
            config.clone(),
            storage,
            Arc::new(FakeRenderer::default()),
            Arc::new(RecordingDeliverer::default()),
        )
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(ts("2024-03-06T08:00:00Z"))));
        scheduler.load().await.unwrap();
        let job = scheduler
            .create_job(definition("Digest", daily_nine()))
            .await
            .unwrap();
        scheduler.tick(ts("2024-03-06T09:00:00Z")).await;
        job.id
    };

    // Down for three days: the overdue job runs once after restart.
    let storage = Arc::new(ReportStorage::open(&db).unwrap());
    let renderer = Arc::new(FakeRenderer::default());
    let scheduler = Scheduler::with_storage(
        config,
        storage,
        renderer.clone(),
        Arc::new(RecordingDeliverer::default()),
    )
    .unwrap()
    .with_clock(Arc::new(ManualClock::new(ts("2024-03-10T10:00:00Z"))));
    assert_eq!(scheduler.load().await.unwrap(), 1);

    let job = scheduler.get_job(&job_id).await.unwrap();
    assert_eq!(job.run_count, 1);
    assert_eq!(job.next_run, Some(ts("2024-03-07T09:00:00Z")));

    let report = scheduler.tick(ts("2024-03-10T10:00:00Z")).await;
    assert_eq!(report.executed.len(), 1);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    let job = scheduler.get_job(&job_id).await.unwrap();
    assert_eq!(job.next_run, Some(ts("2024-03-11T09:00:00Z")));
    assert_eq!(scheduler.list_history(&job_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_hooks_observe_lifecycle() {
    let hooks = Arc::new(HookRegistry::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<HookEvent>();
    let handler: HookHandler = Arc::new(move |event| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(event);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on("*", handler).await;

    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Arc::new(FakeRenderer::failing(&["Digest"])),
        Arc::new(RecordingDeliverer::default()),
    )
    .unwrap()
    .with_clock(Arc::new(ManualClock::new(ts("2024-03-06T08:00:00Z"))))
    .with_hooks(hooks);

    let job = scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();
    scheduler.tick(ts("2024-03-06T09:00:00Z")).await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv().await.unwrap());
    }
    assert!(seen.iter().any(|e| matches!(e, HookEvent::JobCreated { .. })));
    assert!(seen.iter().any(|e| matches!(
        e,
        HookEvent::JobStatusChanged { job_id, to: JobStatus::Failed, .. } if *job_id == job.id
    )));
    assert!(seen.iter().any(|e| matches!(
        e,
        HookEvent::RunFinished { record } if record.outcome == RunOutcome::Failure
    )));
}

#[tokio::test]
async fn test_delivery_failure_marks_job_failed_and_others_still_run() {
    let h = build_harness(
        FakeRenderer::default(),
        RecordingDeliverer::failing(&["Broken"]),
        SchedulerConfig::default(),
        "2024-03-06T08:00:00Z",
    );
    let broken = h
        .scheduler
        .create_job(definition("Broken", daily_nine()))
        .await
        .unwrap();
    let healthy = h
        .scheduler
        .create_job(definition("Healthy", daily_nine()))
        .await
        .unwrap();

    let report = h.scheduler.tick(ts("2024-03-06T09:00:00Z")).await;
    assert_eq!(report.executed.len(), 2);
    assert_eq!(report.failures(), 1);
    assert!(report.errors.is_empty());
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 2);

    let broken = h.scheduler.get_job(&broken.id).await.unwrap();
    assert_eq!(broken.status, JobStatus::Failed);
    assert_eq!(broken.next_run, None);
    assert_eq!(broken.run_count, 1);
    let history = h.scheduler.list_history(&broken.id).await.unwrap();
    assert_eq!(history.len(), 1);
    let record = history.last().unwrap();
    assert_eq!(record.outcome, RunOutcome::Failure);
    assert_eq!(record.trigger, RunTrigger::Scheduled);
    assert!(record.error.as_deref().unwrap().contains("mail relay rejected"));

    let healthy = h.scheduler.get_job(&healthy.id).await.unwrap();
    assert_eq!(healthy.status, JobStatus::Active);
    assert_eq!(healthy.next_run, Some(ts("2024-03-07T09:00:00Z")));
    let deliveries = h.deliverer.deliveries.lock().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].1, ["educator@example.com"]);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_timeout_is_a_failure() {
    let config = SchedulerConfig {
        execution_timeout_secs: 1,
        ..Default::default()
    };
    let h = build_harness(
        FakeRenderer::default(),
        RecordingDeliverer::slow(Duration::from_secs(60)),
        config,
        "2024-03-06T08:00:00Z",
    );
    let job = h
        .scheduler
        .create_job(definition("Slow", daily_nine()))
        .await
        .unwrap();

    let report = h.scheduler.tick(ts("2024-03-06T09:00:00Z")).await;
    assert_eq!(report.failures(), 1);
    let record = &report.executed[0];
    assert!(record.error.as_deref().unwrap().contains("delivery timed out"));

    let job = h.scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.next_run, None);
    assert_eq!(h.scheduler.list_history(&job.id).await.unwrap().len(), 1);
    assert!(h.deliverer.deliveries.lock().await.is_empty());
}

fn gated_scheduler(start: &str) -> (Arc<Scheduler>, Arc<GatedRenderer>) {
    let renderer = Arc::new(GatedRenderer::default());
    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        renderer.clone(),
        Arc::new(RecordingDeliverer::default()),
    )
    .unwrap()
    .with_clock(Arc::new(ManualClock::new(ts(start))));
    (Arc::new(scheduler), renderer)
}

#[tokio::test]
async fn test_job_paused_during_execution_counts_the_run_and_stays_paused() {
    let (scheduler, renderer) = gated_scheduler("2024-03-06T08:00:00Z");
    let job = scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();

    let tick = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.tick(ts("2024-03-06T09:00:00Z")).await }
    });
    renderer.started.notified().await;
    let paused = scheduler.pause_job(&job.id).await.unwrap();
    assert_eq!(paused.run_count, 0);
    renderer.release.notify_one();

    let report = tick.await.unwrap();
    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.executed[0].outcome, RunOutcome::Success);

    let job = scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.next_run, None);
    assert_eq!(job.run_count, 1);
    assert_eq!(job.last_run, Some(ts("2024-03-06T09:00:00Z")));
    assert_eq!(scheduler.list_history(&job.id).await.unwrap().len(), 1);

    // Still paused: the next day's slot is not taken.
    assert!(scheduler.tick(ts("2024-03-07T09:00:00Z")).await.is_empty());
}

#[tokio::test]
async fn test_job_deleted_during_execution_keeps_record_and_stays_deleted() {
    let (scheduler, renderer) = gated_scheduler("2024-03-06T08:00:00Z");
    let job = scheduler
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();

    let tick = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.tick(ts("2024-03-06T09:00:00Z")).await }
    });
    renderer.started.notified().await;
    assert!(scheduler.delete_job(&job.id).await.unwrap());
    renderer.release.notify_one();

    let report = tick.await.unwrap();
    assert_eq!(report.executed.len(), 1);
    assert!(report.errors.is_empty());

    assert!(matches!(
        scheduler.get_job(&job.id).await,
        Err(SchedulerError::NotFound(_))
    ));
    assert!(scheduler.list_jobs().await.unwrap().is_empty());
    let history = scheduler.list_history(&job.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.last().unwrap().outcome, RunOutcome::Success);
}

#[tokio::test]
async fn test_resumed_quarterly_job_keeps_its_quarter() {
    let h = harness(FakeRenderer::default(), "2024-01-20T10:00:00Z");
    let job = h
        .scheduler
        .create_job(definition(
            "Quarterly",
            Recurrence::quarterly(None, TimeOfDay::new(9, 0)),
        ))
        .await
        .unwrap();
    assert_eq!(job.next_run, Some(ts("2024-04-20T09:00:00Z")));

    let ran = ts("2024-04-20T09:00:00Z");
    assert_eq!(h.scheduler.tick(ran).await.executed.len(), 1);
    let job = h.scheduler.get_job(&job.id).await.unwrap();
    assert_eq!(job.next_run, Some(ts("2024-07-20T09:00:00Z")));

    h.clock.set(ran);
    h.scheduler.pause_job(&job.id).await.unwrap();
    h.clock.set(ts("2024-05-01T00:00:00Z"));
    let resumed = h.scheduler.resume_job(&job.id).await.unwrap();
    assert_eq!(resumed.next_run, Some(ts("2024-07-20T09:00:00Z")));
}

/// A daemon and a control command, each with its own scheduler over one file.
fn shared_db_pair(
    db: &std::path::Path,
    renderer: Arc<dyn Renderer>,
) -> (Scheduler, Scheduler, Arc<ManualClock>) {
    let open = |renderer: Arc<dyn Renderer>, clock: Arc<ManualClock>| {
        Scheduler::with_storage(
            SchedulerConfig::default(),
            Arc::new(ReportStorage::open(db).unwrap()),
            renderer,
            Arc::new(RecordingDeliverer::default()),
        )
        .unwrap()
        .with_clock(clock)
    };
    let clock = Arc::new(ManualClock::new(ts("2024-03-06T08:00:00Z")));
    let daemon = open(renderer, clock.clone());
    let control = open(Arc::new(FakeRenderer::default()), clock.clone());
    (daemon, control, clock)
}

#[tokio::test]
async fn test_daemon_sees_control_edits_on_shared_database() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(FakeRenderer::default());
    let (daemon, control, clock) = shared_db_pair(&dir.path().join("reportd.db"), renderer.clone());
    daemon.load().await.unwrap();
    control.load().await.unwrap();

    // Created while the daemon is running: picked up without a restart.
    let job = control
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();
    assert_eq!(daemon.tick(ts("2024-03-06T09:00:00Z")).await.executed.len(), 1);
    assert_eq!(control.get_job(&job.id).await.unwrap().run_count, 1);

    // Paused from the control side: the daemon neither runs nor reactivates it.
    clock.set(ts("2024-03-06T10:00:00Z"));
    control.pause_job(&job.id).await.unwrap();
    assert!(daemon.tick(ts("2024-03-07T09:00:00Z")).await.is_empty());
    let stored = control.get_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Paused);
    assert_eq!(stored.run_count, 1);

    // Deleted from the control side: the daemon does not bring it back.
    clock.set(ts("2024-03-07T10:00:00Z"));
    control.resume_job(&job.id).await.unwrap();
    assert!(control.delete_job(&job.id).await.unwrap());
    assert!(daemon.tick(ts("2024-03-08T09:00:00Z")).await.is_empty());
    assert!(control.list_jobs().await.unwrap().is_empty());
    assert!(matches!(
        daemon.get_job(&job.id).await,
        Err(SchedulerError::NotFound(_))
    ));
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(control.list_history(&job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_job_deleted_by_control_during_daemon_run_stays_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(GatedRenderer::default());
    let (daemon, control, _clock) =
        shared_db_pair(&dir.path().join("reportd.db"), renderer.clone());
    let daemon = Arc::new(daemon);
    daemon.load().await.unwrap();

    let job = control
        .create_job(definition("Digest", daily_nine()))
        .await
        .unwrap();
    let tick = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.tick(ts("2024-03-06T09:00:00Z")).await }
    });
    renderer.started.notified().await;
    assert!(control.delete_job(&job.id).await.unwrap());
    renderer.release.notify_one();

    let report = tick.await.unwrap();
    assert_eq!(report.executed.len(), 1);
    assert!(control.list_jobs().await.unwrap().is_empty());
    assert!(daemon.list_jobs().await.unwrap().is_empty());
    assert_eq!(control.list_history(&job.id).await.unwrap().len(), 1);
}

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reportd_config::ReportdConfig;
use reportd_hooks::{HookEvent, HookHandler, HookRegistry};

use crate::control::open_scheduler;

/// Run the scheduler loop until Ctrl-C.
pub async fn run_serve(config: ReportdConfig) -> Result<()> {
    let hooks = Arc::new(HookRegistry::new());
    hooks
        .on_many(&["run_finished", "job_status_changed"], event_logger())
        .await;

    let scheduler = Arc::new(open_scheduler(&config).await?.with_hooks(hooks));
    let jobs = scheduler.list_jobs().await?;
    info!(
        jobs = jobs.len(),
        active = jobs.iter().filter(|j| j.is_active()).count(),
        "Loaded report jobs"
    );

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.clone().run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the current tick to finish");
    shutdown.cancel();
    handle.await?;
    Ok(())
}

/// Log finished runs, and jobs the daemon itself moved to another status.
fn event_logger() -> HookHandler {
    Arc::new(|event| {
        Box::pin(async move {
            match event {
                HookEvent::RunFinished { record } => match &record.error {
                    None => info!(
                        job_id = %record.job_id,
                        trigger = %record.trigger,
                        duration_ms = record.duration_millis,
                        "Report run succeeded"
                    ),
                    Some(error) => warn!(
                        job_id = %record.job_id,
                        trigger = %record.trigger,
                        "Report run failed: {error}"
                    ),
                },
                HookEvent::JobStatusChanged { job_id, from, to } => {
                    info!(job_id = %job_id, %from, %to, "Report job status changed");
                }
                _ => {}
            }
        })
    })
}

//! One-shot control commands. Each opens the configured store, acts and
//! prints the result as JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use reportd_config::ReportdConfig;
use reportd_scheduler::Scheduler;
use reportd_storage::ReportStorage;
use reportd_types::{JobDefinition, JobPatch};

use crate::collaborators::{OutboxDeliverer, SummaryRenderer};

/// Open storage and build a scheduler with the bundled collaborators.
pub async fn open_scheduler(config: &ReportdConfig) -> Result<Scheduler> {
    let storage = match config.database_path()? {
        Some(path) => ReportStorage::open(&path)
            .with_context(|| format!("opening database {}", path.display()))?,
        None => ReportStorage::open_in_memory()?,
    };
    let scheduler = Scheduler::with_storage(
        config.scheduler.clone(),
        Arc::new(storage),
        Arc::new(SummaryRenderer),
        Arc::new(OutboxDeliverer::new(config.outbox_dir()?)),
    )?;
    scheduler.load().await?;
    Ok(scheduler)
}

pub async fn create(config: &ReportdConfig, file: &Path) -> Result<()> {
    let definition: JobDefinition = read_toml(file)?;
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.create_job(definition).await?)
}

pub async fn update(config: &ReportdConfig, id: &str, file: &Path) -> Result<()> {
    let patch: JobPatch = read_toml(file)?;
    if patch.is_empty() {
        anyhow::bail!("{} does not change any field", file.display());
    }
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.update_job(id, patch).await?)
}

pub async fn list(config: &ReportdConfig) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.list_jobs().await?)
}

pub async fn show(config: &ReportdConfig, id: &str) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.get_job(id).await?)
}

pub async fn pause(config: &ReportdConfig, id: &str) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.pause_job(id).await?)
}

pub async fn resume(config: &ReportdConfig, id: &str) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.resume_job(id).await?)
}

pub async fn run(config: &ReportdConfig, id: &str) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.run_now(id).await?)
}

pub async fn delete(config: &ReportdConfig, id: &str) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    let deleted = scheduler.delete_job(id).await?;
    print_json(&json!({ "id": id, "deleted": deleted }))
}

pub async fn history(config: &ReportdConfig, id: &str) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    print_json(&scheduler.list_history(id).await?.to_vec())
}

pub async fn health(config: &ReportdConfig) -> Result<()> {
    let scheduler = open_scheduler(config).await?;
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let jobs = scheduler.list_jobs().await?;
    for job in &jobs {
        *by_status.entry(job.status.to_string()).or_default() += 1;
    }
    let database = config
        .database_path()?
        .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());

    print_json(&json!({
        "status": "healthy",
        "database": database,
        "outbox": config.outbox_dir()?.display().to_string(),
        "tick_interval_secs": config.scheduler.tick_interval_secs,
        "utc_offset_minutes": config.scheduler.utc_offset_minutes,
        "jobs": jobs.len(),
        "jobs_by_status": by_status,
    }))
}

fn read_toml<T: serde::de::DeserializeOwned>(file: &Path) -> Result<T> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", file.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

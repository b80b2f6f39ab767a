//! reportd-storage: SQLite-based persistence for report jobs and run history.
//!
//! Jobs are upserted in place so their rowid, and therefore their listing
//! order, stays stable across updates. Read-modify-write of a single job
//! runs in one immediate transaction and never re-inserts a deleted row.
//! Run records are append-only and are never removed when their job is
//! deleted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Mutex;

use reportd_types::{RunRecord, ScheduledJob};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS report_jobs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        report_kind TEXT NOT NULL,
        recurrence TEXT NOT NULL,
        recipients TEXT NOT NULL,
        filters TEXT NOT NULL,
        format TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        last_run TEXT,
        next_run TEXT,
        run_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS run_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        executed_at TEXT NOT NULL,
        outcome TEXT NOT NULL,
        duration_ms INTEGER,
        trigger_kind TEXT NOT NULL,
        error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_run_records_job ON run_records(job_id, seq);";

const JOB_COLUMNS: &str = "id, name, description, report_kind, recurrence, recipients, filters, \
                           format, status, created_at, last_run, next_run, run_count";

/// SQLite-based storage for report jobs and their run history.
pub struct ReportStorage {
    conn: Arc<Mutex<Connection>>,
}

impl ReportStorage {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // Control commands and the daemon may write the same file
        conn.busy_timeout(Duration::from_secs(5))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ─── Jobs ───────────────────────────────────────────────

    /// Insert a job or update it in place.
    pub async fn save_job(&self, job: &ScheduledJob) -> Result<()> {
        let conn = self.conn.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            write_job(&conn, &job)
        })
        .await?
    }

    /// Read a job, let `f` change it and write it back, all inside one
    /// immediate transaction so that concurrent writers on the same file
    /// (another process included) cannot interleave.
    ///
    /// Returns `None` when the row does not exist; it is never re-created.
    /// When `f` fails nothing is written and its error is handed back.
    pub async fn modify_job<T, E, F>(
        &self,
        id: &str,
        f: F,
    ) -> Result<Option<std::result::Result<(ScheduledJob, T), E>>>
    where
        F: FnOnce(&mut ScheduledJob) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let row = tx
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM report_jobs WHERE id = ?1"),
                    rusqlite::params![id],
                    JobRow::from_row,
                )
                .optional()?;
            let Some(row) = row else {
                return Ok(None);
            };
            let mut job = row.into_job()?;
            match f(&mut job) {
                Ok(value) => {
                    write_job(&tx, &job)?;
                    tx.commit()?;
                    Ok(Some(Ok((job, value))))
                }
                Err(e) => Ok(Some(Err(e))),
            }
        })
        .await?
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let row = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt =
                conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM report_jobs WHERE id = ?1"))?;
            let row = stmt
                .query_row(rusqlite::params![id], JobRow::from_row)
                .optional()?;
            Ok::<_, StorageError>(row)
        })
        .await??;
        row.map(JobRow::into_job).transpose()
    }

    /// List all jobs in insertion order.
    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt =
                conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM report_jobs ORDER BY rowid"))?;
            let rows = stmt
                .query_map([], JobRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok::<_, StorageError>(rows)
        })
        .await??;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Delete a job. Its run records are kept. Returns whether a row was removed.
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = conn.execute(
                "DELETE FROM report_jobs WHERE id = ?1",
                rusqlite::params![id],
            )?;
            Ok(count > 0)
        })
        .await?
    }

    // ─── Run Records ────────────────────────────────────────

    /// Append a run record to the ledger.
    pub async fn append_run(&self, record: &RunRecord) -> Result<()> {
        let conn = self.conn.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO run_records
                    (job_id, executed_at, outcome, duration_ms, trigger_kind, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.job_id,
                    record.executed_at.to_rfc3339(),
                    record.outcome.as_str(),
                    record.duration_millis.map(|d| d as i64),
                    record.trigger.as_str(),
                    record.error,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// All run records of a job, oldest first.
    pub async fn runs_for(&self, job_id: &str) -> Result<Vec<RunRecord>> {
        let conn = self.conn.clone();
        let job_id = job_id.to_string();
        let rows = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT job_id, executed_at, outcome, duration_ms, trigger_kind, error
                 FROM run_records WHERE job_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![job_id], RunRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok::<_, StorageError>(rows)
        })
        .await??;
        rows.into_iter().map(RunRow::into_record).collect()
    }
}

fn write_job(conn: &Connection, job: &ScheduledJob) -> Result<()> {
    let recurrence = serde_json::to_string(&job.recurrence)?;
    let recipients = serde_json::to_string(&job.recipients)?;
    let filters = serde_json::to_string(&job.filters)?;
    conn.execute(
        "INSERT INTO report_jobs
            (id, name, description, report_kind, recurrence, recipients, filters,
             format, status, created_at, last_run, next_run, run_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            report_kind = excluded.report_kind,
            recurrence = excluded.recurrence,
            recipients = excluded.recipients,
            filters = excluded.filters,
            format = excluded.format,
            status = excluded.status,
            last_run = excluded.last_run,
            next_run = excluded.next_run,
            run_count = excluded.run_count",
        rusqlite::params![
            job.id,
            job.name,
            job.description,
            job.report_kind.as_str(),
            recurrence,
            recipients,
            filters,
            job.format.as_str(),
            job.status.as_str(),
            job.created_at.to_rfc3339(),
            job.last_run.map(|t| t.to_rfc3339()),
            job.next_run.map(|t| t.to_rfc3339()),
            job.run_count as i64,
        ],
    )?;
    Ok(())
}

// ─── Row Decoding ───────────────────────────────────────

/// Raw column values of a `report_jobs` row, decoded outside the SQLite callback.
struct JobRow {
    id: String,
    name: String,
    description: String,
    report_kind: String,
    recurrence: String,
    recipients: String,
    filters: String,
    format: String,
    status: String,
    created_at: String,
    last_run: Option<String>,
    next_run: Option<String>,
    run_count: i64,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            report_kind: row.get(3)?,
            recurrence: row.get(4)?,
            recipients: row.get(5)?,
            filters: row.get(6)?,
            format: row.get(7)?,
            status: row.get(8)?,
            created_at: row.get(9)?,
            last_run: row.get(10)?,
            next_run: row.get(11)?,
            run_count: row.get(12)?,
        })
    }

    fn into_job(self) -> Result<ScheduledJob> {
        Ok(ScheduledJob {
            report_kind: self.report_kind.parse().map_err(corrupt)?,
            recurrence: serde_json::from_str(&self.recurrence)?,
            recipients: serde_json::from_str(&self.recipients)?,
            filters: serde_json::from_str(&self.filters)?,
            format: self.format.parse().map_err(corrupt)?,
            status: self.status.parse().map_err(corrupt)?,
            created_at: parse_time(&self.created_at)?,
            last_run: self.last_run.as_deref().map(parse_time).transpose()?,
            next_run: self.next_run.as_deref().map(parse_time).transpose()?,
            run_count: u64::try_from(self.run_count).map_err(corrupt)?,
            id: self.id,
            name: self.name,
            description: self.description,
        })
    }
}

struct RunRow {
    job_id: String,
    executed_at: String,
    outcome: String,
    duration_ms: Option<i64>,
    trigger: String,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            executed_at: row.get(1)?,
            outcome: row.get(2)?,
            duration_ms: row.get(3)?,
            trigger: row.get(4)?,
            error: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<RunRecord> {
        Ok(RunRecord {
            executed_at: parse_time(&self.executed_at)?,
            outcome: self.outcome.parse().map_err(corrupt)?,
            duration_millis: self
                .duration_ms
                .map(u64::try_from)
                .transpose()
                .map_err(corrupt)?,
            trigger: self.trigger.parse().map_err(corrupt)?,
            job_id: self.job_id,
            error: self.error,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(corrupt)
}

fn corrupt(e: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt(e.to_string())
}

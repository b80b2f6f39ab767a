//! Append-only run history.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use reportd_storage::ReportStorage;
use reportd_types::RunRecord;

use crate::error::Result;

/// Records every execution attempt, per job, in insertion order.
///
/// Backed by SQLite when storage is configured, otherwise kept in memory.
/// Records outlive the job they belong to.
pub struct RunHistoryLedger {
    storage: Option<Arc<ReportStorage>>,
    records: RwLock<HashMap<String, Vec<RunRecord>>>,
}

impl RunHistoryLedger {
    /// Create an in-memory ledger.
    pub fn new() -> Self {
        Self {
            storage: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a ledger persisted in `storage`.
    pub fn with_storage(storage: Arc<ReportStorage>) -> Self {
        Self {
            storage: Some(storage),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn append(&self, record: RunRecord) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.append_run(&record).await?;
        } else {
            self.records
                .write()
                .await
                .entry(record.job_id.clone())
                .or_default()
                .push(record);
        }
        Ok(())
    }

    /// Snapshot of a job's history, oldest first. Unknown ids yield an empty history.
    pub async fn list_for(&self, job_id: &str) -> Result<RunHistory> {
        let records = match &self.storage {
            Some(storage) => storage.runs_for(job_id).await?,
            None => self
                .records
                .read()
                .await
                .get(job_id)
                .cloned()
                .unwrap_or_default(),
        };
        Ok(RunHistory {
            records: records.into(),
        })
    }
}

impl Default for RunHistoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, cheaply clonable view of a job's run records.
///
/// Iterating does not consume it, so the sequence can be walked any
/// number of times.
#[derive(Debug, Clone, Default)]
pub struct RunHistory {
    records: Arc<[RunRecord]>,
}

impl RunHistory {
    pub fn iter(&self) -> std::slice::Iter<'_, RunRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&RunRecord> {
        self.records.last()
    }

    pub fn to_vec(&self) -> Vec<RunRecord> {
        self.records.to_vec()
    }
}

impl<'a> IntoIterator for &'a RunHistory {
    type Item = &'a RunRecord;
    type IntoIter = std::slice::Iter<'a, RunRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

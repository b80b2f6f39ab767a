//! External render and delivery collaborators.
//!
//! The scheduler never looks inside a report: it hands the job's kind,
//! filters and format to a [`Renderer`] and the resulting artifact to a
//! [`Deliverer`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use reportd_types::{
    Artifact, DeliveryOutcome, Filters, Recipient, ReportFormat, ReportKind, ScheduledJob,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("render failed: {0}")]
    Failed(String),
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery failed: {0}")]
    Failed(String),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Why an execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Input of a render call.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub job_id: String,
    pub job_name: String,
    pub report_kind: ReportKind,
    pub filters: Filters,
    pub format: ReportFormat,
}

impl From<&ScheduledJob> for RenderRequest {
    fn from(job: &ScheduledJob) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            report_kind: job.report_kind,
            filters: job.filters.clone(),
            format: job.format,
        }
    }
}

/// Turns a data selection into a report artifact.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<Artifact, RenderError>;
}

/// Sends an artifact to its recipients.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        artifact: &Artifact,
        recipients: &[Recipient],
    ) -> Result<DeliveryOutcome, DeliveryError>;
}

//! Renderer and deliverer bundled with the `reportd` daemon.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use reportd_scheduler::{DeliveryError, Deliverer, RenderError, RenderRequest, Renderer};
use reportd_types::{Artifact, DeliveryOutcome, Recipient};

/// Renders a plain-text summary of the requested report.
///
/// The artifact carries the file extension and content type of the
/// requested format so downstream tooling can route it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryRenderer;

#[async_trait]
impl Renderer for SummaryRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Artifact, RenderError> {
        let mut lines = vec![
            format!("Report: {}", request.job_name),
            format!("Kind: {}", request.report_kind),
            format!("Format: {}", request.format),
            format!("Generated: {}", Utc::now().to_rfc3339()),
        ];
        if !request.filters.is_empty() {
            lines.push("Filters:".to_string());
            lines.extend(
                request
                    .filters
                    .iter()
                    .map(|(key, value)| format!("  {key} = {value}")),
            );
        }
        let mut body = lines.join("\n");
        body.push('\n');

        Ok(Artifact {
            file_name: format!("{}.{}", request.job_id, request.format.extension()),
            content_type: request.format.content_type().to_string(),
            content: body.into_bytes(),
        })
    }
}

/// Writes artifacts into an outbox directory, one folder per delivery,
/// next to a `recipients.json` manifest.
#[derive(Debug, Clone)]
pub struct OutboxDeliverer {
    dir: PathBuf,
}

impl OutboxDeliverer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Deliverer for OutboxDeliverer {
    async fn deliver(
        &self,
        artifact: &Artifact,
        recipients: &[Recipient],
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = self.dir.join(format!("{stamp}-{}", artifact.file_name));
        tokio::fs::create_dir_all(&target).await.map_err(failed)?;

        tokio::fs::write(target.join(&artifact.file_name), &artifact.content)
            .await
            .map_err(failed)?;
        let manifest = json!({
            "file_name": artifact.file_name,
            "content_type": artifact.content_type,
            "recipients": recipients,
        });
        let manifest = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| DeliveryError::Failed(e.to_string()))?;
        tokio::fs::write(target.join("recipients.json"), manifest)
            .await
            .map_err(failed)?;

        debug!(
            path = %target.display(),
            recipients = recipients.len(),
            "Artifact written to outbox"
        );
        Ok(DeliveryOutcome {
            delivered_to: recipients.iter().map(|r| r.address.clone()).collect(),
        })
    }
}

fn failed(e: std::io::Error) -> DeliveryError {
    DeliveryError::Failed(e.to_string())
}

//! Ingestion jobs.
//!
//! Every source kind goes through the same lifecycle: Queued, InFlight, then
//! exactly one of Succeeded or Failed. Whatever the outcome, the recent list
//! is invalidated once before the job is handed back, since a failed request
//! may still have left partial state on the service.

use std::sync::Arc;

use chrono::Utc;

use cortex_client::{display_message, KnowledgeBase};
use cortex_core::events::{ClientEvent, EventBus, NotificationLevel};
use cortex_core::{IngestSource, Result, SourceKind, UploadJob, UploadStatus};

use crate::recent::RecentDocuments;

/// A file taken from a drop event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Dispatches ingestion requests and surfaces their outcome.
pub struct UploadDispatcher {
    kb: Arc<dyn KnowledgeBase>,
    recent: Arc<RecentDocuments>,
    events: EventBus,
}

impl UploadDispatcher {
    pub fn new(kb: Arc<dyn KnowledgeBase>, recent: Arc<RecentDocuments>, events: EventBus) -> Self {
        Self { kb, recent, events }
    }

    /// Run one ingestion job to completion.
    ///
    /// Only a payload that fails validation returns `Err`, and then nothing
    /// is sent. Service and transport failures come back as a job in the
    /// `Failed` state carrying the display message.
    pub async fn dispatch(&self, source: IngestSource) -> Result<UploadJob> {
        source.validate()?;

        let mut job = UploadJob::new(source.kind(), source.label());
        self.publish_status(&job);

        job.transition(UploadStatus::InFlight)?;
        self.publish_status(&job);
        tracing::info!(job_id = %job.id, kind = %job.kind, label = %job.label, "Ingestion started");

        let outcome = match source {
            IngestSource::File { file_name, bytes } => {
                self.kb.ingest_file(&file_name, bytes).await
            }
            IngestSource::Url { url } => self.kb.ingest_url(&url).await,
            IngestSource::TextNote {
                title,
                content,
                tags,
            } => self.kb.ingest_text(title.as_deref(), &content, &tags).await,
        };

        let notification = match outcome {
            Ok(_) => {
                job.transition(UploadStatus::Succeeded)?;
                tracing::info!(job_id = %job.id, kind = %job.kind, "Ingestion succeeded");
                ClientEvent::notification(NotificationLevel::Success, success_message(job.kind))
            }
            Err(e) => {
                let message = display_message(&e);
                tracing::warn!(job_id = %job.id, kind = %job.kind, error = %e, "Ingestion failed");
                job.transition(UploadStatus::Failed)?;
                job.error_message = Some(message.clone());
                ClientEvent::notification(
                    NotificationLevel::Error,
                    format!("Upload failed: {}", message),
                )
            }
        };

        self.recent.invalidate(&format!("{} ingestion", job.kind));
        self.publish_status(&job);
        self.events.publish(notification);
        Ok(job)
    }

    /// Ingest the first file of a drop. Any further files are discarded.
    ///
    /// Returns `Ok(None)` for an empty drop.
    pub async fn dispatch_drop(&self, files: Vec<DroppedFile>) -> Result<Option<UploadJob>> {
        let total = files.len();
        let Some(first) = files.into_iter().next() else {
            return Ok(None);
        };
        if total > 1 {
            tracing::debug!(discarded = total - 1, "Only the first dropped file is ingested");
        }
        self.dispatch(IngestSource::File {
            file_name: first.file_name,
            bytes: first.bytes,
        })
        .await
        .map(Some)
    }

    fn publish_status(&self, job: &UploadJob) {
        self.events.publish(ClientEvent::UploadStatusChanged {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            timestamp: Utc::now(),
        });
    }
}

fn success_message(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::File => "File ingested successfully",
        SourceKind::Url => "URL ingested successfully",
        SourceKind::TextNote => "Note ingested successfully",
    }
}

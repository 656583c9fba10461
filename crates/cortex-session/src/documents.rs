//! Single-document view and deletion.

use std::sync::Arc;

use chrono::Utc;

use cortex_client::KnowledgeBase;
use cortex_core::events::{ClientEvent, EventBus};
use cortex_core::{DocumentWithChunks, Result};

use crate::recent::RecentDocuments;

pub struct DocumentBrowser {
    kb: Arc<dyn KnowledgeBase>,
    recent: Arc<RecentDocuments>,
    events: EventBus,
}

impl DocumentBrowser {
    pub fn new(kb: Arc<dyn KnowledgeBase>, recent: Arc<RecentDocuments>, events: EventBus) -> Self {
        Self { kb, recent, events }
    }

    /// Fetch a document with its chunks sorted by `chunk_index`.
    pub async fn open(&self, id: i64) -> Result<DocumentWithChunks> {
        let document = self.kb.document(id).await?.into_display_order();
        tracing::debug!(document_id = id, chunks = document.chunks.len(), "Document opened");
        Ok(document)
    }

    /// Delete a document, then invalidate the recent list.
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.kb.delete_document(id).await?;
        tracing::info!(document_id = id, "Document deleted");
        self.recent.invalidate("document deleted");
        self.events.publish(ClientEvent::DocumentDeleted {
            document_id: id,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::config::DocumentsConfig;
    use cortex_core::CortexError;

    use crate::test_support::{summary, MockKnowledgeBase};

    fn browser(kb: Arc<MockKnowledgeBase>) -> (DocumentBrowser, Arc<RecentDocuments>) {
        let bus = EventBus::default();
        let recent = Arc::new(RecentDocuments::new(
            kb.clone(),
            &DocumentsConfig::default(),
            bus.clone(),
        ));
        (DocumentBrowser::new(kb, Arc::clone(&recent), bus), recent)
    }

    #[tokio::test]
    async fn test_open_known_document() {
        let kb = Arc::new(MockKnowledgeBase::default());
        kb.documents.lock().unwrap().push(summary(3, "notes.md"));
        let (browser, _) = browser(kb);

        let doc = browser.open(3).await.unwrap();
        assert_eq!(doc.document.title, "notes.md");
    }

    #[tokio::test]
    async fn test_open_missing_document_is_service_error() {
        let (browser, _) = browser(Arc::new(MockKnowledgeBase::default()));
        let err = browser.open(99).await.unwrap_err();
        assert!(matches!(err, CortexError::Service { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_delete_invalidates_recent_list() {
        let kb = Arc::new(MockKnowledgeBase::default());
        kb.documents.lock().unwrap().push(summary(1, "a"));
        kb.documents.lock().unwrap().push(summary(2, "b"));
        let (browser, recent) = browser(kb.clone());

        assert_eq!(recent.get().await.unwrap().len(), 2);
        browser.delete(1).await.unwrap();
        assert_eq!(recent.invalidation_count(), 1);
        assert_eq!(recent.get().await.unwrap().len(), 1);
        assert_eq!(*kb.deleted.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_cache() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let (browser, recent) = browser(kb);

        recent.get().await.unwrap();
        assert!(browser.delete(42).await.is_err());
        assert_eq!(recent.invalidation_count(), 0);
        assert!(recent.is_cached());
    }
}

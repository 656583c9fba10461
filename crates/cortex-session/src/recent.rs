//! Recent-documents cache.
//!
//! Several flows change what the list should show (uploads, deletions). None
//! of them patch the cached list; they invalidate it and the next read
//! refetches the whole list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use cortex_client::KnowledgeBase;
use cortex_core::config::DocumentsConfig;
use cortex_core::events::{ClientEvent, EventBus};
use cortex_core::{DocumentSummary, Result};

/// Invalidate-then-refetch cache of the most recently indexed documents.
pub struct RecentDocuments {
    kb: Arc<dyn KnowledgeBase>,
    limit: u32,
    cache: Mutex<Option<Vec<DocumentSummary>>>,
    invalidations: AtomicU64,
    events: EventBus,
}

impl RecentDocuments {
    pub fn new(kb: Arc<dyn KnowledgeBase>, config: &DocumentsConfig, events: EventBus) -> Self {
        Self {
            kb,
            limit: config.effective_limit(),
            cache: Mutex::new(None),
            invalidations: AtomicU64::new(0),
            events,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<Vec<DocumentSummary>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached list, fetching it first if it was invalidated.
    pub async fn get(&self) -> Result<Vec<DocumentSummary>> {
        if let Some(cached) = self.lock_cache().as_ref() {
            return Ok(cached.clone());
        }
        self.refresh().await
    }

    /// Fetch the list now, replacing the cache.
    ///
    /// If the cache is invalidated while the fetch is in flight, the result
    /// is returned but not cached.
    pub async fn refresh(&self) -> Result<Vec<DocumentSummary>> {
        let epoch = self.invalidation_count();
        let documents = self.kb.recent_documents(self.limit).await?;
        tracing::debug!(count = documents.len(), limit = self.limit, "Recent documents fetched");

        let mut cache = self.lock_cache();
        if self.invalidation_count() == epoch {
            *cache = Some(documents.clone());
        } else {
            tracing::debug!("Recent documents invalidated during fetch; not caching");
        }
        Ok(documents)
    }

    /// Discard the cached list so the next read refetches it.
    pub fn invalidate(&self, reason: &str) {
        {
            let mut cache = self.lock_cache();
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            *cache = None;
        }
        tracing::debug!(reason, "Recent documents invalidated");
        self.events.publish(ClientEvent::RecentDocumentsInvalidated {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Number of invalidations so far.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn is_cached(&self) -> bool {
        self.lock_cache().is_some()
    }
}

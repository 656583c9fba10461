//! Folder-watcher status polling.
//!
//! The snapshot is replaced wholesale on every fetch. A manual scan is fire
//! and forget: the refetch that follows it may still show the previous run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};

use cortex_client::{display_message, KnowledgeBase};
use cortex_core::config::WatcherConfig;
use cortex_core::events::{ClientEvent, EventBus};
use cortex_core::{CortexError, Result, WatcherSnapshot};

/// Last known watcher status.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherStatus {
    /// Not fetched yet.
    Unknown,
    Available(WatcherSnapshot),
    /// The service could not report a status; carries the display message.
    Unavailable(String),
}

/// Background poller for the folder-watcher status.
pub struct WatcherStatusPoller {
    kb: Arc<dyn KnowledgeBase>,
    interval: Duration,
    status: watch::Sender<WatcherStatus>,
    shutdown: Arc<Notify>,
    events: EventBus,
}

impl WatcherStatusPoller {
    pub fn new(kb: Arc<dyn KnowledgeBase>, config: &WatcherConfig, events: EventBus) -> Self {
        let (status, _) = watch::channel(WatcherStatus::Unknown);
        Self {
            kb,
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            status,
            shutdown: Arc::new(Notify::new()),
            events,
        }
    }

    pub fn status(&self) -> WatcherStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatcherStatus> {
        self.status.subscribe()
    }

    /// Fetch the status now and publish it.
    ///
    /// Any failure is reported as [`CortexError::CapabilityUnavailable`].
    pub async fn fetch_status(&self) -> Result<WatcherSnapshot> {
        match self.kb.watcher_status().await {
            Ok(snapshot) => {
                tracing::debug!(
                    enabled = snapshot.enabled,
                    scanned = snapshot.scanned,
                    ingested = snapshot.ingested,
                    failed = snapshot.failed,
                    "Watcher status fetched"
                );
                self.status
                    .send_replace(WatcherStatus::Available(snapshot.clone()));
                Ok(snapshot)
            }
            Err(e) => {
                let message = display_message(&e);
                tracing::warn!(error = %e, "Watcher status unavailable");
                self.status
                    .send_replace(WatcherStatus::Unavailable(message.clone()));
                Err(CortexError::CapabilityUnavailable(message))
            }
        }
    }

    /// Request a scan without waiting for it, then refetch the status.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn trigger_scan(&self) -> Result<WatcherSnapshot> {
        let kb = Arc::clone(&self.kb);
        tokio::spawn(async move {
            if let Err(e) = kb.trigger_scan().await {
                tracing::warn!(error = %e, "Watcher scan request failed");
            }
        });
        tracing::info!("Watcher scan requested");
        self.events.publish(ClientEvent::WatcherScanRequested {
            timestamp: Utc::now(),
        });
        self.fetch_status().await
    }

    /// Poll until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Watcher status poller started");
        loop {
            // Failures are already published as Unavailable.
            let _ = self.fetch_status().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => {
                    tracing::info!("Watcher status poller stopped");
                    return;
                }
            }
        }
    }

    /// Signal the poll loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

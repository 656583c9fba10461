use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{SourceKind, UploadStatus};

/// Severity of a user-facing notification (toast).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

/// Events shared between the client flows.
///
/// Emitted after state changes and consumed by:
/// - The presentation layer (toasts, spinners, list refreshes)
/// - Other flows that react to shared state (the recent-documents list)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ClientEvent {
    /// The ask state cell changed. `state` is the state name.
    AskStateChanged {
        generation: u64,
        state: String,
        timestamp: DateTime<Utc>,
    },

    /// An ingestion job moved through its lifecycle.
    UploadStatusChanged {
        job_id: Uuid,
        kind: SourceKind,
        status: UploadStatus,
        timestamp: DateTime<Utc>,
    },

    /// A message the user should see briefly.
    Notification {
        level: NotificationLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The recent-documents cache was discarded and must be refetched.
    RecentDocumentsInvalidated {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A document was removed from the knowledge base.
    DocumentDeleted {
        document_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// The dictation controller changed state. `state` is the state name.
    DictationStateChanged {
        state: String,
        timestamp: DateTime<Utc>,
    },

    /// A manual watcher scan was requested.
    WatcherScanRequested { timestamp: DateTime<Utc> },
}

impl ClientEvent {
    pub fn notification(level: NotificationLevel, message: impl Into<String>) -> Self {
        ClientEvent::Notification {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ClientEvent::AskStateChanged { timestamp, .. }
            | ClientEvent::UploadStatusChanged { timestamp, .. }
            | ClientEvent::Notification { timestamp, .. }
            | ClientEvent::RecentDocumentsInvalidated { timestamp, .. }
            | ClientEvent::DocumentDeleted { timestamp, .. }
            | ClientEvent::DictationStateChanged { timestamp, .. }
            | ClientEvent::WatcherScanRequested { timestamp } => *timestamp,
        }
    }

    /// Returns a short name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::AskStateChanged { .. } => "ask_state_changed",
            ClientEvent::UploadStatusChanged { .. } => "upload_status_changed",
            ClientEvent::Notification { .. } => "notification",
            ClientEvent::RecentDocumentsInvalidated { .. } => "recent_documents_invalidated",
            ClientEvent::DocumentDeleted { .. } => "document_deleted",
            ClientEvent::DictationStateChanged { .. } => "dictation_state_changed",
            ClientEvent::WatcherScanRequested { .. } => "watcher_scan_requested",
        }
    }
}

/// Broadcast channel for [`ClientEvent`]s.
///
/// Cloning yields another handle to the same channel. Publishing with no
/// subscribers is not an error.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ClientEvent) {
        tracing::trace!(event = event.event_name(), "Publishing client event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = ClientEvent::notification(NotificationLevel::Success, "done");
        assert_eq!(event.event_name(), "notification");

        let event = ClientEvent::RecentDocumentsInvalidated {
            reason: "upload".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_name(), "recent_documents_invalidated");
    }

    #[test]
    fn test_event_timestamp() {
        let ts = Utc::now();
        let event = ClientEvent::DocumentDeleted {
            document_id: 3,
            timestamp: ts,
        };
        assert_eq!(event.timestamp(), ts);
    }

    #[test]
    fn test_event_serialization() {
        let event = ClientEvent::UploadStatusChanged {
            job_id: Uuid::nil(),
            kind: SourceKind::Url,
            status: UploadStatus::InFlight,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("UploadStatusChanged"));
        assert!(json.contains("in_flight"));
        assert!(json.contains("\"url\""));
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(ClientEvent::WatcherScanRequested {
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ClientEvent::notification(NotificationLevel::Info, "one"));
        bus.publish(ClientEvent::notification(NotificationLevel::Error, "two"));

        for expected in ["one", "two"] {
            match rx.recv().await.unwrap() {
                ClientEvent::Notification { message, .. } => assert_eq!(message, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}

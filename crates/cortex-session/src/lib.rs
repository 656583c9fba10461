//! Cortex session crate - the client-side state machines.
//!
//! Each flow owns its own observable state and talks to the knowledge base
//! through [`cortex_client::KnowledgeBase`]:
//!
//! - [`AskSession`] - question/answer lifecycle with one-shot source filters
//! - [`UploadDispatcher`] - file, URL and note ingestion jobs
//! - [`RecentDocuments`] - the invalidate-then-refetch recent list
//! - [`DocumentBrowser`] - single-document view and deletion
//! - [`WatcherStatusPoller`] - folder-watcher status and manual scans
//! - [`DraggablePositionStore`] - persisted position of the floating widget
//!
//! Flows notify each other through the shared [`cortex_core::EventBus`].

pub mod ask;
pub mod documents;
pub mod position;
pub mod recent;
pub mod upload;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use ask::{AskSession, AskSessionState};
pub use documents::DocumentBrowser;
pub use position::{
    DragController, DraggablePositionStore, ElementSize, FilePreferences, MemoryPreferences,
    PointerEvent, Position, PreferenceStore, Viewport,
};
pub use recent::RecentDocuments;
pub use upload::{DroppedFile, UploadDispatcher};
pub use watcher::{WatcherStatus, WatcherStatusPoller};

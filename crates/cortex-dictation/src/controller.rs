//! Ownership of the single active recognition stream.
//!
//! The controller never touches editor text. It forwards finalized fragments,
//! tagged with the surface they were dictated into, over an `mpsc` channel;
//! the owner of the displayed buffer merges them. Interim results only update
//! a preview cell.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use cortex_core::error::{CortexError, Result};
use cortex_core::events::{ClientEvent, EventBus};

use crate::source::{DictationSource, RecognitionBatch};
use crate::state::{DictationState, StateMachine};

/// Capacity of the finalized-fragment channel.
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

/// An editor that can receive dictated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorSurface {
    /// The floating quick-add note.
    QuickNote,
    /// The voice-note tab.
    VoiceTab,
}

impl fmt::Display for EditorSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditorSurface::QuickNote => write!(f, "quick-note"),
            EditorSurface::VoiceTab => write!(f, "voice-tab"),
        }
    }
}

/// A recognition result the engine will not revise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalFragment {
    pub surface: EditorSurface,
    pub text: String,
}

struct ActiveStream {
    id: u64,
    surface: EditorSurface,
    stop: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

impl ActiveStream {
    fn halt(self) {
        let _ = self.stop.send(());
        self.pump.abort();
    }
}

struct Shared {
    state: StateMachine,
    active: Mutex<Option<ActiveStream>>,
    preview: watch::Sender<String>,
    events: EventBus,
}

impl Shared {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveStream>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, target: DictationState) {
        if self.state.current() == target {
            return;
        }
        match self.state.transition(target) {
            Ok(()) => self.events.publish(ClientEvent::DictationStateChanged {
                state: target.to_string(),
                timestamp: Utc::now(),
            }),
            Err(e) => tracing::debug!("Dictation state unchanged: {}", e),
        }
    }
}

/// Drives a [`DictationSource`] for one editor at a time.
///
/// Call [`start`](Self::start) from within a Tokio runtime; each stream is
/// pumped by a spawned task.
pub struct DictationController {
    source: Arc<dyn DictationSource>,
    language: String,
    fragments: mpsc::Sender<FinalFragment>,
    next_stream_id: AtomicU64,
    shared: Arc<Shared>,
}

impl fmt::Debug for DictationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DictationController")
            .field("language", &self.language)
            .field("state", &self.shared.state.current())
            .field("active_surface", &self.active_surface())
            .finish()
    }
}

impl DictationController {
    /// Create a controller and the receiver finalized fragments arrive on.
    pub fn new(
        source: Arc<dyn DictationSource>,
        language: impl Into<String>,
        events: EventBus,
    ) -> (Self, mpsc::Receiver<FinalFragment>) {
        let (fragments, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let (preview, _) = watch::channel(String::new());
        let controller = Self {
            source,
            language: language.into(),
            fragments,
            next_stream_id: AtomicU64::new(0),
            shared: Arc::new(Shared {
                state: StateMachine::new(),
                active: Mutex::new(None),
                preview,
                events,
            }),
        };
        (controller, rx)
    }

    pub fn state(&self) -> DictationState {
        self.shared.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DictationState> {
        self.shared.state.subscribe()
    }

    /// Latest interim text of the active stream; empty when there is none.
    pub fn subscribe_preview(&self) -> watch::Receiver<String> {
        self.shared.preview.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == DictationState::Listening
    }

    /// The surface the active stream writes into.
    pub fn active_surface(&self) -> Option<EditorSurface> {
        self.shared.lock_active().as_ref().map(|a| a.surface)
    }

    /// Start dictating into `surface`.
    ///
    /// Any stream already running is stopped first. Without a usable
    /// recognizer the state becomes `Unavailable` and never `Listening`.
    pub fn start(&self, surface: EditorSurface) -> Result<()> {
        let capabilities = self.source.capabilities();
        if !capabilities.supports_dictation() {
            tracing::warn!(?capabilities, "Speech recognition unavailable");
            self.stop();
            self.shared.set_state(DictationState::Unavailable);
            return Err(CortexError::CapabilityUnavailable(
                "continuous speech recognition with interim results is not supported".to_string(),
            ));
        }

        self.stop();

        let stream = match self.source.open(&self.language) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open recognition stream");
                if matches!(e, CortexError::CapabilityUnavailable(_)) {
                    self.shared.set_state(DictationState::Unavailable);
                }
                return Err(e);
            }
        };

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        // The lock is held until the stream is registered so a stream that
        // ends immediately still finds itself when the pump finishes.
        let mut active = self.shared.lock_active();
        let pump = tokio::spawn(pump(
            id,
            surface,
            stream.results,
            self.fragments.clone(),
            Arc::clone(&self.shared),
        ));
        *active = Some(ActiveStream {
            id,
            surface,
            stop: stream.stop,
            pump,
        });
        self.shared.set_state(DictationState::Listening);
        drop(active);

        tracing::info!(%surface, language = %self.language, "Dictation started");
        Ok(())
    }

    /// Stop the active stream. Does nothing when none is running.
    pub fn stop(&self) {
        let previous = self.shared.lock_active().take();
        if let Some(stream) = previous {
            tracing::info!(surface = %stream.surface, "Dictation stopped");
            stream.halt();
            self.shared.preview.send_replace(String::new());
            self.shared.set_state(DictationState::Idle);
        }
    }

    /// Make `surface` the displayed editor.
    ///
    /// A stream writing into any other surface is stopped. Returns whether a
    /// stream was stopped.
    pub fn switch_surface(&self, surface: EditorSurface) -> bool {
        match self.active_surface() {
            Some(current) if current != surface => {
                tracing::debug!(from = %current, to = %surface, "Editor surface switched");
                self.stop();
                true
            }
            _ => false,
        }
    }
}

impl Drop for DictationController {
    fn drop(&mut self) {
        if let Some(stream) = self.shared.lock_active().take() {
            stream.halt();
        }
    }
}

async fn pump(
    id: u64,
    surface: EditorSurface,
    mut results: mpsc::Receiver<RecognitionBatch>,
    fragments: mpsc::Sender<FinalFragment>,
    shared: Arc<Shared>,
) {
    'stream: while let Some(batch) = results.recv().await {
        for entry in batch.entries {
            if !entry.is_final {
                shared.preview.send_replace(entry.text);
                continue;
            }
            shared.preview.send_replace(String::new());
            if entry.text.trim().is_empty() {
                continue;
            }
            let fragment = FinalFragment {
                surface,
                text: entry.text,
            };
            if fragments.send(fragment).await.is_err() {
                tracing::debug!("Fragment receiver dropped");
                break 'stream;
            }
        }
    }

    let finished = {
        let mut active = shared.lock_active();
        if active.as_ref().map(|a| a.id) == Some(id) {
            active.take()
        } else {
            None
        }
    };
    if finished.is_some() {
        tracing::info!(%surface, "Recognition stream ended");
        shared.preview.send_replace(String::new());
        shared.set_state(DictationState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::source::{RecognitionCapabilities, RecognitionEntry, RecognitionStream};

    struct OpenedStream {
        tx: Option<mpsc::Sender<RecognitionBatch>>,
        stop: oneshot::Receiver<()>,
    }

    struct TestSource {
        capabilities: RecognitionCapabilities,
        open_error: Option<fn() -> CortexError>,
        opened: Mutex<Vec<OpenedStream>>,
    }

    impl TestSource {
        fn new(capabilities: RecognitionCapabilities) -> Arc<Self> {
            Arc::new(Self {
                capabilities,
                open_error: None,
                opened: Mutex::new(Vec::new()),
            })
        }

        fn failing(open_error: fn() -> CortexError) -> Arc<Self> {
            Arc::new(Self {
                capabilities: RecognitionCapabilities::full(),
                open_error: Some(open_error),
                opened: Mutex::new(Vec::new()),
            })
        }

        fn opened_count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        fn sender(&self, index: usize) -> mpsc::Sender<RecognitionBatch> {
            self.opened.lock().unwrap()[index].tx.clone().unwrap()
        }

        fn close(&self, index: usize) {
            self.opened.lock().unwrap()[index].tx = None;
        }

        fn stop_requested(&self, index: usize) -> bool {
            self.opened.lock().unwrap()[index].stop.try_recv().is_ok()
        }
    }

    impl DictationSource for TestSource {
        fn capabilities(&self) -> RecognitionCapabilities {
            self.capabilities
        }

        fn open(&self, _language: &str) -> Result<RecognitionStream> {
            if let Some(make_error) = self.open_error {
                return Err(make_error());
            }
            let (tx, results) = mpsc::channel(16);
            let (stop, stop_rx) = oneshot::channel();
            self.opened.lock().unwrap().push(OpenedStream {
                tx: Some(tx),
                stop: stop_rx,
            });
            Ok(RecognitionStream { results, stop })
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<DictationState>, target: DictationState) {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    // =========================================================================
    // Capability
    // =========================================================================

    #[tokio::test]
    async fn test_missing_capability_never_listens() {
        let source = TestSource::new(RecognitionCapabilities {
            continuous: true,
            interim_results: false,
            single_language: true,
        });
        let (controller, _rx) = DictationController::new(source.clone(), "en-US", EventBus::default());
        let mut states = controller.subscribe_state();

        let err = controller.start(EditorSurface::VoiceTab).unwrap_err();
        assert!(matches!(err, CortexError::CapabilityUnavailable(_)));
        assert_eq!(controller.state(), DictationState::Unavailable);
        assert_eq!(source.opened_count(), 0);

        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), DictationState::Unavailable);
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_open_denied_is_unavailable() {
        let source = TestSource::failing(|| {
            CortexError::CapabilityUnavailable("microphone permission denied".into())
        });
        let (controller, _rx) = DictationController::new(source, "en-US", EventBus::default());

        assert!(controller.start(EditorSurface::QuickNote).is_err());
        assert_eq!(controller.state(), DictationState::Unavailable);
    }

    #[tokio::test]
    async fn test_other_open_failure_stays_idle() {
        let source = TestSource::failing(|| CortexError::Transport("device busy".into()));
        let (controller, _rx) = DictationController::new(source, "en-US", EventBus::default());

        assert!(controller.start(EditorSurface::QuickNote).is_err());
        assert_eq!(controller.state(), DictationState::Idle);
    }

    // =========================================================================
    // Fragments
    // =========================================================================

    #[tokio::test]
    async fn test_only_final_entries_are_forwarded() {
        let source = TestSource::new(RecognitionCapabilities::full());
        let (controller, mut rx) = DictationController::new(source.clone(), "en-US", EventBus::default());

        controller.start(EditorSurface::QuickNote).unwrap();
        assert!(controller.is_listening());

        let tx = source.sender(0);
        tx.send(RecognitionBatch::new(vec![
            RecognitionEntry::interim("hel"),
            RecognitionEntry::finalized("hello"),
            RecognitionEntry::interim("wor"),
        ]))
        .await
        .unwrap();
        tx.send(RecognitionBatch::new(vec![
            RecognitionEntry::finalized("  "),
            RecognitionEntry::finalized("world"),
        ]))
        .await
        .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.text, "hello");
        assert_eq!(first.surface, EditorSurface::QuickNote);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.text, "world");
        assert!(rx.try_recv().is_err());

        assert_eq!(*controller.subscribe_preview().borrow(), "");
    }

    #[tokio::test]
    async fn test_interim_entries_drive_preview() {
        let source = TestSource::new(RecognitionCapabilities::full());
        let (controller, _rx) = DictationController::new(source.clone(), "en-US", EventBus::default());
        let mut preview = controller.subscribe_preview();

        controller.start(EditorSurface::VoiceTab).unwrap();
        source
            .sender(0)
            .send(RecognitionBatch::new(vec![RecognitionEntry::interim("draft")]))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), preview.wait_for(|p| p == "draft"))
            .await
            .unwrap()
            .unwrap();

        controller.stop();
        assert_eq!(*preview.borrow(), "");
    }

    // =========================================================================
    // Stream ownership
    // =========================================================================

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let source = TestSource::new(RecognitionCapabilities::full());
        let (controller, _rx) = DictationController::new(source.clone(), "en-US", EventBus::default());

        controller.stop();
        assert_eq!(controller.state(), DictationState::Idle);

        controller.start(EditorSurface::QuickNote).unwrap();
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), DictationState::Idle);
        assert!(source.stop_requested(0));
        assert!(controller.active_surface().is_none());
    }

    #[tokio::test]
    async fn test_start_while_listening_stops_previous_stream() {
        let source = TestSource::new(RecognitionCapabilities::full());
        let (controller, mut rx) = DictationController::new(source.clone(), "en-US", EventBus::default());

        controller.start(EditorSurface::QuickNote).unwrap();
        let old = source.sender(0);
        controller.start(EditorSurface::VoiceTab).unwrap();

        assert!(source.stop_requested(0));
        assert_eq!(controller.active_surface(), Some(EditorSurface::VoiceTab));
        assert!(controller.is_listening());

        tokio::time::timeout(Duration::from_secs(2), old.closed())
            .await
            .expect("old stream still read");

        source
            .sender(1)
            .send(RecognitionBatch::new(vec![RecognitionEntry::finalized("new")]))
            .await
            .unwrap();
        let fragment = rx.recv().await.unwrap();
        assert_eq!(fragment.surface, EditorSurface::VoiceTab);
        assert_eq!(fragment.text, "new");
    }

    #[tokio::test]
    async fn test_switch_surface_stops_stream() {
        let source = TestSource::new(RecognitionCapabilities::full());
        let (controller, _rx) = DictationController::new(source.clone(), "en-US", EventBus::default());

        controller.start(EditorSurface::QuickNote).unwrap();
        assert!(!controller.switch_surface(EditorSurface::QuickNote));
        assert!(controller.is_listening());

        assert!(controller.switch_surface(EditorSurface::VoiceTab));
        assert_eq!(controller.state(), DictationState::Idle);
        assert!(source.stop_requested(0));
        assert!(!controller.switch_surface(EditorSurface::QuickNote));
    }

    #[tokio::test]
    async fn test_stream_end_returns_to_idle() {
        let source = TestSource::new(RecognitionCapabilities::full());
        let (controller, _rx) = DictationController::new(source.clone(), "en-US", EventBus::default());
        let mut states = controller.subscribe_state();

        controller.start(EditorSurface::VoiceTab).unwrap();
        source.close(0);

        wait_for_state(&mut states, DictationState::Idle).await;
        assert!(controller.active_surface().is_none());
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let source = TestSource::new(RecognitionCapabilities::full());
        let (controller, _rx) = DictationController::new(source, "en-US", bus);

        controller.start(EditorSurface::QuickNote).unwrap();
        controller.stop();

        let mut names = Vec::new();
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                ClientEvent::DictationStateChanged { state, .. } => names.push(state),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(names, vec!["Listening", "Idle"]);
    }
}

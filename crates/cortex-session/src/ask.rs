//! Question/answer lifecycle.
//!
//! `AskSession` owns one observable state cell. Every submit bumps a
//! generation counter and moves the cell to `Pending`; the spawned request
//! resolves it to `Success` or `Error`. With
//! [`ResponseOrdering::LatestRequest`] a response belonging to a superseded
//! generation is dropped; with [`ResponseOrdering::LastResponse`] whichever
//! response resolves last is shown. Requests are never cancelled on the wire.
//!
//! A streamed ask also fills a partial-answer cell as pieces arrive. Only
//! pieces of the current generation are kept.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use cortex_client::{ask_failure_text, display_message, AnswerChunks, KnowledgeBase};
use cortex_core::config::{AskConfig, ResponseOrdering};
use cortex_core::events::{ClientEvent, EventBus};
use cortex_core::{AskRequest, AskResult, DocumentSummary, SessionId, SourceFilter};

/// Answer-panel text before the first question.
const IDLE_TEXT: &str = "Waiting for input...";

/// State of the answer panel.
#[derive(Debug, Clone, PartialEq)]
pub enum AskSessionState {
    Idle,
    Pending,
    Success(AskResult),
    /// Display-ready failure text.
    Error(String),
}

impl AskSessionState {
    pub fn name(&self) -> &'static str {
        match self {
            AskSessionState::Idle => "Idle",
            AskSessionState::Pending => "Pending",
            AskSessionState::Success(_) => "Success",
            AskSessionState::Error(_) => "Error",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AskSessionState::Pending)
    }
}

struct Inner {
    state: watch::Sender<AskSessionState>,
    partial: watch::Sender<String>,
    /// Only changed while the state cell is locked, so generation checks and
    /// state writes cannot interleave.
    generation: AtomicU64,
    ordering: ResponseOrdering,
    events: EventBus,
}

impl Inner {
    /// Start a new generation and move to `Pending`.
    ///
    /// Events are published while the state cell is locked, so the event
    /// stream follows the same order as the state writes.
    fn begin(&self) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = AskSessionState::Pending;
            self.partial.send_replace(String::new());
            self.publish(generation, "Pending");
        });
        tracing::debug!(generation, "Ask state: Pending");
        generation
    }

    /// Apply the outcome of `generation`, unless it has been superseded.
    fn resolve(&self, generation: u64, outcome: AskSessionState) {
        let name = outcome.name();
        let applied = self.state.send_if_modified(|state| {
            let latest = self.generation.load(Ordering::SeqCst);
            if self.ordering == ResponseOrdering::LatestRequest && generation != latest {
                return false;
            }
            *state = outcome;
            self.publish(generation, name);
            true
        });
        if applied {
            tracing::debug!(generation, "Ask state: {}", name);
        } else {
            tracing::debug!(generation, "Discarding response of superseded ask");
        }
    }

    /// Append a streamed piece, unless `generation` has been superseded.
    fn append_partial(&self, generation: u64, piece: &str) {
        self.partial.send_if_modified(|partial| {
            if generation != self.generation.load(Ordering::SeqCst) || piece.is_empty() {
                return false;
            }
            partial.push_str(piece);
            true
        });
    }

    fn publish(&self, generation: u64, state: &str) {
        self.events.publish(ClientEvent::AskStateChanged {
            generation,
            state: state.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// The question/answer state machine.
///
/// Dropping the session aborts the tasks waiting for responses.
pub struct AskSession {
    kb: Arc<dyn KnowledgeBase>,
    session_id: SessionId,
    placeholder: String,
    inner: Arc<Inner>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl AskSession {
    pub fn new(
        kb: Arc<dyn KnowledgeBase>,
        config: &AskConfig,
        session_id: SessionId,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(AskSessionState::Idle);
        let (partial, _) = watch::channel(String::new());
        Self {
            kb,
            session_id,
            placeholder: config.placeholder.clone(),
            inner: Arc::new(Inner {
                state,
                partial,
                generation: AtomicU64::new(0),
                ordering: config.response_ordering,
                events,
            }),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> AskSessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AskSessionState> {
        self.inner.state.subscribe()
    }

    /// Answer text streamed so far for the current generation.
    pub fn partial_answer(&self) -> String {
        self.inner.partial.borrow().clone()
    }

    pub fn subscribe_partial(&self) -> watch::Receiver<String> {
        self.inner.partial.subscribe()
    }

    /// Generation of the most recent submit; 0 before the first.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Text for the answer panel.
    pub fn display_text(&self) -> String {
        match &*self.inner.state.borrow() {
            AskSessionState::Idle => IDLE_TEXT.to_string(),
            AskSessionState::Pending => {
                let partial = self.inner.partial.borrow();
                if partial.is_empty() {
                    self.placeholder.clone()
                } else {
                    partial.clone()
                }
            }
            AskSessionState::Success(result) => result.answer.clone(),
            AskSessionState::Error(message) => message.clone(),
        }
    }

    /// Submit a question.
    ///
    /// A blank question does nothing and returns `None`. Otherwise the state
    /// becomes `Pending` and the generation of the new request is returned.
    /// The source filter is moved into this request and cannot reach any
    /// later one. Must be called within a Tokio runtime.
    pub fn submit(
        &self,
        question: &str,
        allow_fallback: bool,
        source_filter: Option<SourceFilter>,
    ) -> Option<u64> {
        let (generation, request) = self.start(question, allow_fallback, source_filter, false)?;

        let kb = Arc::clone(&self.kb);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = match kb.ask(&request).await {
                Ok(result) => {
                    tracing::info!(
                        generation,
                        confidence = result.confidence,
                        citations = result.citations.len(),
                        latency_ms = result.latency_ms,
                        "Ask answered"
                    );
                    AskSessionState::Success(result)
                }
                Err(e) => {
                    tracing::warn!(generation, error = %e, "Ask failed");
                    AskSessionState::Error(ask_failure_text(&display_message(&e)))
                }
            };
            inner.resolve(generation, outcome);
        });
        self.track(handle);
        Some(generation)
    }

    /// Submit a question and stream the answer.
    ///
    /// Behaves like [`submit`](Self::submit), except the answer text is
    /// published to the partial-answer cell as it arrives. The final
    /// `Success` carries the whole text with no citations.
    pub fn submit_streaming(
        &self,
        question: &str,
        allow_fallback: bool,
        source_filter: Option<SourceFilter>,
    ) -> Option<u64> {
        let (generation, request) = self.start(question, allow_fallback, source_filter, true)?;

        let kb = Arc::clone(&self.kb);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = match kb.ask_stream(&request).await {
                Ok(chunks) => collect_stream(&inner, generation, chunks).await,
                Err(e) => {
                    tracing::warn!(generation, error = %e, "Streamed ask failed to start");
                    AskSessionState::Error(ask_failure_text(&display_message(&e)))
                }
            };
            inner.resolve(generation, outcome);
        });
        self.track(handle);
        Some(generation)
    }

    /// Validate the question and begin a new generation.
    fn start(
        &self,
        question: &str,
        allow_fallback: bool,
        source_filter: Option<SourceFilter>,
        streaming: bool,
    ) -> Option<(u64, AskRequest)> {
        let request =
            match AskRequest::new(question, allow_fallback, self.session_id, source_filter) {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!("Ask ignored: {}", e);
                    return None;
                }
            };

        let generation = self.inner.begin();
        tracing::info!(
            generation,
            scoped = request.source_filter.is_some(),
            allow_fallback,
            streaming,
            "Ask submitted"
        );
        Some((generation, request))
    }

    /// Ask for a summary of one document, scoped to that document only.
    pub fn ask_about(&self, document: &DocumentSummary, allow_fallback: bool) -> Option<u64> {
        let prompt = format!(
            "Summarize the key points of \"{}\" and cite the most relevant sections.",
            document.title
        );
        self.submit(
            &prompt,
            allow_fallback,
            Some(SourceFilter::for_document(document)),
        )
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }
}

/// Drain a streamed answer into the partial cell and build the outcome.
async fn collect_stream(
    inner: &Inner,
    generation: u64,
    mut chunks: AnswerChunks,
) -> AskSessionState {
    let mut answer = String::new();
    while let Some(chunk) = chunks.recv().await {
        match chunk {
            Ok(piece) => {
                inner.append_partial(generation, &piece);
                answer.push_str(&piece);
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "Streamed ask broke off");
                return AskSessionState::Error(ask_failure_text(&display_message(&e)));
            }
        }
    }
    tracing::info!(generation, answer_len = answer.len(), "Streamed ask answered");
    AskSessionState::Success(AskResult::uncited(answer.trim()))
}

impl Drop for AskSession {
    fn drop(&mut self) {
        let in_flight = self.in_flight.get_mut().unwrap_or_else(|e| e.into_inner());
        for handle in in_flight.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cortex_core::CortexError;

    use crate::test_support::{summary, MockKnowledgeBase};

    fn session(kb: Arc<MockKnowledgeBase>) -> AskSession {
        AskSession::new(kb, &AskConfig::default(), SessionId::generate(), EventBus::default())
    }

    async fn settled(session: &AskSession) -> AskSessionState {
        let mut rx = session.subscribe();
        let state = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| !s.is_pending()),
        )
        .await
        .expect("ask never settled")
        .unwrap()
        .clone();
        state
    }

    // =========================================================================
    // Submit
    // =========================================================================

    #[tokio::test]
    async fn test_blank_question_is_noop() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let session = session(kb.clone());

        assert_eq!(session.submit("   \n", false, None), None);
        assert_eq!(session.state(), AskSessionState::Idle);
        assert_eq!(session.generation(), 0);
        assert_eq!(session.display_text(), "Waiting for input...");
        tokio::task::yield_now().await;
        assert!(kb.asks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_goes_pending_then_success() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let session = session(kb.clone());

        let generation = session.submit("What is the refund policy?", true, None);
        assert_eq!(generation, Some(1));
        assert!(session.state().is_pending());
        assert_eq!(session.display_text(), "...");

        match settled(&session).await {
            AskSessionState::Success(result) => {
                assert_eq!(result.answer, "answer to What is the refund policy?");
                assert!((0.0..=1.0).contains(&result.confidence));
            }
            other => panic!("expected success, got {:?}", other),
        }

        let asks = kb.asks.lock().unwrap();
        assert_eq!(asks[0].question, "What is the refund policy?");
        assert!(asks[0].allow_fallback);
        assert_eq!(asks[0].session_id, session.session_id());
    }

    #[tokio::test]
    async fn test_failure_uses_template_with_extracted_message() {
        let kb = Arc::new(MockKnowledgeBase::default());
        kb.fail_asks(r#"{"error":"Model timed out"}"#);
        let session = session(kb);

        session.submit("q", false, None);
        match settled(&session).await {
            AskSessionState::Error(text) => {
                assert!(text.starts_with("There was a problem generating an answer."));
                assert!(text.ends_with("Details: Model timed out"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert!(session.display_text().contains("Model timed out"));
    }

    // =========================================================================
    // One-shot filter
    // =========================================================================

    #[tokio::test]
    async fn test_ask_about_filter_does_not_leak() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let session = session(kb.clone());
        let doc = summary(4, "handbook.pdf");

        session.ask_about(&doc, false);
        session.submit("Unrelated question", false, None);
        settled(&session).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let asks = kb.asks.lock().unwrap();
        assert_eq!(asks.len(), 2);
        let scoped = asks
            .iter()
            .find(|r| r.question.contains("handbook.pdf"))
            .unwrap();
        assert_eq!(
            scoped.question,
            "Summarize the key points of \"handbook.pdf\" and cite the most relevant sections."
        );
        assert_eq!(
            scoped.source_filter.as_ref().unwrap().references(),
            &["handbook.pdf".to_string()]
        );
        let plain = asks
            .iter()
            .find(|r| r.question == "Unrelated question")
            .unwrap();
        assert!(plain.source_filter.is_none());
    }

    // =========================================================================
    // Streamed answers
    // =========================================================================

    async fn wait_for_asks(kb: &MockKnowledgeBase, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while kb.asks.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("streamed ask never sent");
    }

    #[tokio::test]
    async fn test_streamed_answer_fills_partial_then_succeeds() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let tx = kb.queue_stream();
        let session = session(kb.clone());
        let mut partial = session.subscribe_partial();

        assert_eq!(session.submit_streaming("What is the refund policy?", false, None), Some(1));
        assert_eq!(session.display_text(), "...");

        tx.send(Ok("Refunds".to_string())).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            partial.wait_for(|p| p.as_str() == "Refunds"),
        )
        .await
        .expect("partial answer never arrived")
        .unwrap();
        assert!(session.state().is_pending());
        assert_eq!(session.display_text(), "Refunds");

        tx.send(Ok(" are accepted. ".to_string())).await.unwrap();
        drop(tx);
        match settled(&session).await {
            AskSessionState::Success(result) => {
                assert_eq!(result.answer, "Refunds are accepted.");
                assert!(result.citations.is_empty());
                assert_eq!(result.confidence_label, "LOW");
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(session.partial_answer(), "Refunds are accepted. ");
        assert_eq!(kb.asks.lock().unwrap()[0].question, "What is the refund policy?");
    }

    #[tokio::test]
    async fn test_streaming_unsupported_is_error() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let session = session(kb);

        session.submit_streaming("q", false, None);
        match settled(&session).await {
            AskSessionState::Error(text) => {
                assert!(text.ends_with("Details: streaming answers are not supported"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_breaking_off_is_error() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let tx = kb.queue_stream();
        let session = session(kb);

        session.submit_streaming("q", false, None);
        tx.send(Ok("Refu".to_string())).await.unwrap();
        tx.send(Err(CortexError::Transport("connection reset".to_string())))
            .await
            .unwrap();
        match settled(&session).await {
            AskSessionState::Error(text) => assert!(text.ends_with("Details: connection reset")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_superseded_stream_pieces_are_ignored() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let stale = kb.queue_stream();
        let fresh = kb.queue_stream();
        let session = session(kb.clone());

        session.submit_streaming("first", false, None);
        wait_for_asks(&kb, 1).await;
        session.submit_streaming("second", false, None);
        wait_for_asks(&kb, 2).await;

        stale.send(Ok("stale".to_string())).await.unwrap();
        drop(stale);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.partial_answer(), "");
        assert!(session.state().is_pending());
        assert_eq!(session.generation(), 2);

        fresh.send(Ok("fresh".to_string())).await.unwrap();
        drop(fresh);
        match settled(&session).await {
            AskSessionState::Success(result) => assert_eq!(result.answer, "fresh"),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(session.partial_answer(), "fresh");
    }

    #[tokio::test]
    async fn test_new_submit_clears_partial() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let tx = kb.queue_stream();
        let session = session(kb.clone());

        session.submit_streaming("q", false, None);
        tx.send(Ok("partial".to_string())).await.unwrap();
        drop(tx);
        settled(&session).await;
        assert_eq!(session.partial_answer(), "partial");

        session.submit("again", false, None);
        assert_eq!(session.partial_answer(), "");
        assert_eq!(session.display_text(), "...");
    }

    // =========================================================================
    // Events and teardown
    // =========================================================================

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let kb = Arc::new(MockKnowledgeBase::default());
        let session = AskSession::new(kb, &AskConfig::default(), SessionId::generate(), bus);

        session.submit("q", false, None);
        settled(&session).await;

        let mut seen = Vec::new();
        for _ in 0..2 {
            if let ClientEvent::AskStateChanged { generation, state, .. } =
                events.recv().await.unwrap()
            {
                seen.push((generation, state));
            }
        }
        assert_eq!(
            seen,
            vec![(1, "Pending".to_string()), (1, "Success".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_events_follow_state_order_across_threads() {
        let bus = EventBus::new(1024);
        let mut events = bus.subscribe();
        let kb = Arc::new(MockKnowledgeBase::default());
        let config = AskConfig {
            response_ordering: ResponseOrdering::LastResponse,
            ..AskConfig::default()
        };
        let session = AskSession::new(kb.clone(), &config, SessionId::generate(), bus);

        for i in 0..50 {
            session.submit(&format!("question {}", i), false, None);
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while kb.asks.lock().unwrap().len() < 50 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("asks never sent");
        settled(&session).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut pending_seen = std::collections::HashSet::new();
        let mut last_state = None;
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::AskStateChanged { generation, state, .. } = event {
                if state == "Pending" {
                    pending_seen.insert(generation);
                } else {
                    assert!(
                        pending_seen.contains(&generation),
                        "generation {} resolved before it was pending",
                        generation
                    );
                }
                last_state = Some(state);
            }
        }
        assert_eq!(pending_seen.len(), 50);
        assert_eq!(last_state.as_deref(), Some(session.state().name()));
    }

    #[tokio::test]
    async fn test_drop_aborts_in_flight_without_panic() {
        let kb = Arc::new(MockKnowledgeBase::default());
        let session = session(kb);
        session.submit("q", false, None);
        drop(session);
        tokio::task::yield_now().await;
    }
}

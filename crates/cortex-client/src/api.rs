//! The knowledge-base service as seen by the client.

use async_trait::async_trait;
use tokio::sync::mpsc;

use cortex_core::{
    AskRequest, AskResult, CortexError, DocumentSummary, DocumentWithChunks, Result,
    WatcherSnapshot,
};

/// Answer text delivered piece by piece.
///
/// The channel closes when the service ends the stream. An `Err` item means
/// the stream broke off and nothing more will follow.
pub type AnswerChunks = mpsc::Receiver<Result<String>>;

/// Operations the client consumes from the knowledge-base service.
///
/// Every call is non-blocking and resolves independently; nothing here is
/// retried or timed out on the client side. Implementations report non-2xx
/// replies as [`cortex_core::CortexError::Service`] with the body verbatim and
/// network failures as [`cortex_core::CortexError::Transport`].
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Ask a question.
    async fn ask(&self, request: &AskRequest) -> Result<AskResult>;

    /// Ask a question and receive the answer text as it is generated.
    ///
    /// Streamed answers carry no citations or confidence. Services that do
    /// not stream report [`CortexError::CapabilityUnavailable`].
    async fn ask_stream(&self, request: &AskRequest) -> Result<AnswerChunks> {
        let _ = request;
        Err(CortexError::CapabilityUnavailable(
            "streaming answers are not supported".to_string(),
        ))
    }

    /// Upload one file for ingestion. Returns the service's reply body.
    async fn ingest_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String>;

    /// Ingest the page at `url`.
    async fn ingest_url(&self, url: &str) -> Result<String>;

    /// Ingest a pasted or dictated note.
    async fn ingest_text(
        &self,
        title: Option<&str>,
        content: &str,
        tags: &[String],
    ) -> Result<String>;

    /// Most recently indexed documents, newest first.
    async fn recent_documents(&self, limit: u32) -> Result<Vec<DocumentSummary>>;

    /// One document with its chunks, in the order the service returned them.
    async fn document(&self, id: i64) -> Result<DocumentWithChunks>;

    async fn delete_document(&self, id: i64) -> Result<()>;

    async fn watcher_status(&self) -> Result<WatcherSnapshot>;

    /// Ask the folder watcher to scan now. Completion is not awaited.
    async fn trigger_scan(&self) -> Result<()>;
}

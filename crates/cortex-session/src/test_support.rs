//! In-memory knowledge base for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cortex_client::{AnswerChunks, KnowledgeBase};
use cortex_core::{
    AskRequest, AskResult, CortexError, Document, DocumentSummary, DocumentWithChunks, Result,
    WatcherSnapshot,
};

pub(crate) fn sample_result(answer: &str) -> AskResult {
    AskResult {
        answer: answer.to_string(),
        citations: Vec::new(),
        confidence: 0.82,
        confidence_label: "HIGH".to_string(),
        provider: "OLLAMA".to_string(),
        trace_id: "trace".to_string(),
        latency_ms: 10,
        sensitivity: "NONE".to_string(),
    }
}

pub(crate) fn summary(id: i64, title: &str) -> DocumentSummary {
    DocumentSummary {
        id,
        title: title.to_string(),
        content_type: "text/plain".to_string(),
        indexed_at: None,
    }
}

fn service_error(status: u16, body: &str) -> CortexError {
    CortexError::Service {
        status,
        body: body.to_string(),
    }
}

#[derive(Default)]
pub(crate) struct MockKnowledgeBase {
    pub asks: Mutex<Vec<AskRequest>>,
    pub ask_error: Mutex<Option<String>>,
    pub ingests: Mutex<Vec<String>>,
    pub ingest_error: Mutex<Option<String>>,
    pub documents: Mutex<Vec<DocumentSummary>>,
    pub recent_calls: AtomicUsize,
    pub last_limit: AtomicU32,
    pub deleted: Mutex<Vec<i64>>,
    pub watcher: Mutex<Option<WatcherSnapshot>>,
    pub scans: AtomicUsize,
    /// Handed out in order by `ask_stream`; empty means streaming is unsupported.
    pub streams: Mutex<VecDeque<AnswerChunks>>,
}

impl MockKnowledgeBase {
    pub fn fail_asks(&self, body: &str) {
        *self.ask_error.lock().unwrap() = Some(body.to_string());
    }

    pub fn fail_ingests(&self, body: &str) {
        *self.ingest_error.lock().unwrap() = Some(body.to_string());
    }

    /// Queue a stream for the next streamed ask and return its sending side.
    pub fn queue_stream(&self) -> mpsc::Sender<Result<String>> {
        let (tx, rx) = mpsc::channel(16);
        self.streams.lock().unwrap().push_back(rx);
        tx
    }

    fn ingest_outcome(&self, call: String) -> Result<String> {
        self.ingests.lock().unwrap().push(call);
        match self.ingest_error.lock().unwrap().as_deref() {
            Some(body) => Err(service_error(500, body)),
            None => Ok("1".to_string()),
        }
    }
}

#[async_trait]
impl KnowledgeBase for MockKnowledgeBase {
    async fn ask(&self, request: &AskRequest) -> Result<AskResult> {
        self.asks.lock().unwrap().push(request.clone());
        match self.ask_error.lock().unwrap().as_deref() {
            Some(body) => Err(service_error(500, body)),
            None => Ok(sample_result(&format!("answer to {}", request.question))),
        }
    }

    async fn ask_stream(&self, request: &AskRequest) -> Result<AnswerChunks> {
        self.asks.lock().unwrap().push(request.clone());
        self.streams.lock().unwrap().pop_front().ok_or_else(|| {
            CortexError::CapabilityUnavailable("streaming answers are not supported".to_string())
        })
    }

    async fn ingest_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        self.ingest_outcome(format!("file:{}:{}", file_name, bytes.len()))
    }

    async fn ingest_url(&self, url: &str) -> Result<String> {
        self.ingest_outcome(format!("url:{}", url))
    }

    async fn ingest_text(
        &self,
        title: Option<&str>,
        content: &str,
        tags: &[String],
    ) -> Result<String> {
        self.ingest_outcome(format!(
            "text:{}:{}:{}",
            title.unwrap_or("-"),
            content,
            tags.join(",")
        ))
    }

    async fn recent_documents(&self, limit: u32) -> Result<Vec<DocumentSummary>> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        Ok(self.documents.lock().unwrap().clone())
    }

    async fn document(&self, id: i64) -> Result<DocumentWithChunks> {
        let docs = self.documents.lock().unwrap();
        let found = docs
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| service_error(404, r#"{"error":"Document not found"}"#))?;
        Ok(DocumentWithChunks {
            document: Document {
                id: found.id,
                source_id: None,
                external_id: None,
                title: found.title.clone(),
                content_hash: String::new(),
                content_type: found.content_type.clone(),
                raw_content: String::new(),
                metadata_json: String::new(),
                indexed_at: None,
                updated_at: None,
                created_at: None,
            },
            chunks: Vec::new(),
        })
    }

    async fn delete_document(&self, id: i64) -> Result<()> {
        let mut docs = self.documents.lock().unwrap();
        let before = docs.len();
        docs.retain(|d| d.id != id);
        if docs.len() == before {
            return Err(service_error(404, ""));
        }
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }

    async fn watcher_status(&self) -> Result<WatcherSnapshot> {
        self.watcher
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| service_error(403, r#"{"error":"Watcher disabled"}"#))
    }

    async fn trigger_scan(&self) -> Result<()> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

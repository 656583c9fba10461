use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{CortexError, Result};

/// Treat an explicit JSON `null` the same as a missing field.
fn null_to_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Keep an arbitrary JSON value as opaque serialized text.
fn opaque_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

// =============================================================================
// Ask
// =============================================================================

/// Conversation identifier sent with every ask.
///
/// One value is generated per process and never changes afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// The session id for this process, generated on first use.
    pub fn process() -> SessionId {
        static PROCESS_SESSION: OnceLock<SessionId> = OnceLock::new();
        *PROCESS_SESSION.get_or_init(|| SessionId(Uuid::new_v4()))
    }

    /// A fresh, unrelated session id.
    pub fn generate() -> SessionId {
        SessionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Document references that scope a single ask.
///
/// The filter is moved into the request it was built for, so it cannot leak
/// into a later, unrelated question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFilter(Vec<String>);

impl SourceFilter {
    pub fn new(references: Vec<String>) -> Self {
        Self(references)
    }

    /// A filter naming exactly one document.
    pub fn for_document(document: &DocumentSummary) -> Self {
        Self(vec![document.title.clone()])
    }

    pub fn references(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Body of `POST /v1/ask`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    pub source_filter: Option<SourceFilter>,
    pub allow_fallback: bool,
    pub session_id: SessionId,
}

impl AskRequest {
    /// Build a request, trimming the question.
    ///
    /// Blank questions are rejected. An empty filter is dropped.
    pub fn new(
        question: &str,
        allow_fallback: bool,
        session_id: SessionId,
        source_filter: Option<SourceFilter>,
    ) -> Result<Self> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CortexError::Validation(
                "question cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            question: question.to_string(),
            source_filter: source_filter.filter(|f| !f.is_empty()),
            allow_fallback,
            session_id,
        })
    }
}

/// A source passage supporting an answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<i64>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub document_title: String,
    /// Heading or page within the document.
    #[serde(default, deserialize_with = "null_to_default")]
    pub location: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub snippet: String,
}

/// Coarse confidence band reported alongside the numeric score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Band for a score, using the service's thresholds.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.80 {
            ConfidenceLevel::High
        } else if score >= 0.60 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(ConfidenceLevel::High),
            "MEDIUM" => Some(ConfidenceLevel::Medium),
            "LOW" => Some(ConfidenceLevel::Low),
            _ => None,
        }
    }

    /// Representative score for a label-only confidence.
    pub fn nominal_score(&self) -> f64 {
        match self {
            ConfidenceLevel::High => 0.9,
            ConfidenceLevel::Medium => 0.7,
            ConfidenceLevel::Low => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfidenceWire {
    Score(f64),
    Label(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskResultWire {
    answer: String,
    #[serde(default, deserialize_with = "null_to_default")]
    citations: Vec<Citation>,
    #[serde(default)]
    confidence: Option<ConfidenceWire>,
    #[serde(default)]
    confidence_label: Option<String>,
    #[serde(default, deserialize_with = "null_to_default")]
    provider: String,
    #[serde(default, deserialize_with = "null_to_default")]
    trace_id: String,
    #[serde(default, deserialize_with = "null_to_default")]
    latency_ms: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    sensitivity: String,
}

/// A successful answer from the knowledge base.
///
/// Decoding either yields a complete value or fails: the confidence score is
/// always within `[0, 1]` and the label is always present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "AskResultWire")]
pub struct AskResult {
    pub answer: String,
    /// Citations in the order the service returned them.
    pub citations: Vec<Citation>,
    pub confidence: f64,
    pub confidence_label: String,
    pub provider: String,
    pub trace_id: String,
    pub latency_ms: u64,
    pub sensitivity: String,
}

impl TryFrom<AskResultWire> for AskResult {
    type Error = String;

    fn try_from(wire: AskResultWire) -> std::result::Result<Self, Self::Error> {
        let label = wire
            .confidence_label
            .as_deref()
            .and_then(ConfidenceLevel::parse);
        let (confidence, level) = match (wire.confidence, label) {
            (Some(ConfidenceWire::Score(score)), label) => {
                if !score.is_finite() {
                    return Err(format!("confidence is not a finite number: {}", score));
                }
                let score = score.clamp(0.0, 1.0);
                (score, label.unwrap_or_else(|| ConfidenceLevel::from_score(score)))
            }
            (Some(ConfidenceWire::Label(text)), _) => {
                let level = ConfidenceLevel::parse(&text)
                    .ok_or_else(|| format!("unknown confidence label: {}", text))?;
                (level.nominal_score(), level)
            }
            (None, Some(level)) => (level.nominal_score(), level),
            (None, None) => return Err("missing confidence".to_string()),
        };

        Ok(AskResult {
            answer: wire.answer,
            citations: wire.citations,
            confidence,
            confidence_label: level.as_str().to_string(),
            provider: wire.provider,
            trace_id: wire.trace_id,
            latency_ms: wire.latency_ms,
            sensitivity: wire.sensitivity,
        })
    }
}

impl AskResult {
    /// Result for an answer that arrived as a stream: no citations, a zero
    /// confidence score and the LOW label.
    pub fn uncited(answer: impl Into<String>) -> Self {
        let level = ConfidenceLevel::from_score(0.0);
        AskResult {
            answer: answer.into(),
            citations: Vec::new(),
            confidence: 0.0,
            confidence_label: level.as_str().to_string(),
            provider: String::new(),
            trace_id: String::new(),
            latency_ms: 0,
            sensitivity: String::new(),
        }
    }
}

// =============================================================================
// Documents
// =============================================================================

/// Row of the recent-documents list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: i64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub content_type: String,
    #[serde(default)]
    pub indexed_at: Option<NaiveDateTime>,
}

impl DocumentSummary {
    /// Indexing time formatted for display, or an empty string.
    pub fn indexed_display(&self) -> String {
        self.indexed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

/// A stored document as returned by the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i64,
    #[serde(default)]
    pub source_id: Option<i64>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub content_hash: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub content_type: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub raw_content: String,
    #[serde(default, deserialize_with = "opaque_json")]
    pub metadata_json: String,
    #[serde(default)]
    pub indexed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

/// A slice of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    #[serde(default)]
    pub id: Option<i64>,
    pub document_id: i64,
    /// Position within the document; unique per document.
    pub chunk_index: i32,
    #[serde(default, deserialize_with = "null_to_default")]
    pub content: String,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub page_number: Option<i32>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub token_count: i32,
}

/// Body of `GET /v1/ingest/document/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentWithChunks {
    pub document: Document,
    #[serde(default, deserialize_with = "null_to_default")]
    pub chunks: Vec<Chunk>,
}

impl DocumentWithChunks {
    /// Sort chunks by `chunk_index` ascending, the order they are displayed in.
    pub fn into_display_order(mut self) -> Self {
        self.chunks.sort_by_key(|c| c.chunk_index);
        self
    }
}

// =============================================================================
// Folder watcher
// =============================================================================

/// Background-ingestion status, replaced wholesale on every poll.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherSnapshot {
    pub enabled: bool,
    pub root: String,
    pub processed_root: String,
    pub recursive: bool,
    /// Interval as reported by the service, e.g. `PT30S`.
    pub poll_interval: String,
    /// Epoch milliseconds; 0 means never.
    pub last_scan_start: i64,
    /// Epoch milliseconds; 0 means never.
    pub last_scan_end: i64,
    pub scanned: u64,
    pub ingested: u64,
    pub failed: u64,
}

impl WatcherSnapshot {
    pub fn has_scanned(&self) -> bool {
        self.last_scan_end > 0
    }

    /// A scan has started but not yet finished.
    pub fn is_scanning(&self) -> bool {
        self.last_scan_start > 0 && self.last_scan_start > self.last_scan_end
    }
}

// =============================================================================
// Ingestion
// =============================================================================

/// The kind of material being ingested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Url,
    TextNote,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::File => write!(f, "file"),
            SourceKind::Url => write!(f, "url"),
            SourceKind::TextNote => write!(f, "text-note"),
        }
    }
}

/// Payload of an ingestion request.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestSource {
    File { file_name: String, bytes: Vec<u8> },
    Url { url: String },
    TextNote {
        title: Option<String>,
        content: String,
        tags: Vec<String>,
    },
}

impl IngestSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            IngestSource::File { .. } => SourceKind::File,
            IngestSource::Url { .. } => SourceKind::Url,
            IngestSource::TextNote { .. } => SourceKind::TextNote,
        }
    }

    /// Short human-readable name for notifications.
    pub fn label(&self) -> String {
        match self {
            IngestSource::File { file_name, .. } => file_name.clone(),
            IngestSource::Url { url } => url.clone(),
            IngestSource::TextNote { title, .. } => {
                title.clone().unwrap_or_else(|| "Untitled note".to_string())
            }
        }
    }

    /// Reject payloads the service would refuse before anything is sent.
    pub fn validate(&self) -> Result<()> {
        match self {
            IngestSource::File { file_name, .. } if file_name.trim().is_empty() => Err(
                CortexError::Validation("file name cannot be empty".to_string()),
            ),
            IngestSource::Url { url } if url.trim().is_empty() => {
                Err(CortexError::Validation("URL cannot be empty".to_string()))
            }
            IngestSource::TextNote { content, .. } if content.trim().is_empty() => Err(
                CortexError::Validation("note content cannot be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Lifecycle of an ingestion job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    InFlight,
    Succeeded,
    Failed,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Queued => write!(f, "Queued"),
            UploadStatus::InFlight => write!(f, "InFlight"),
            UploadStatus::Succeeded => write!(f, "Succeeded"),
            UploadStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl UploadStatus {
    pub fn can_transition_to(&self, target: &UploadStatus) -> bool {
        matches!(
            (self, target),
            (UploadStatus::Queued, UploadStatus::InFlight)
                | (UploadStatus::InFlight, UploadStatus::Succeeded)
                | (UploadStatus::InFlight, UploadStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Succeeded | UploadStatus::Failed)
    }
}

/// One ingestion attempt. Lives only until its outcome has been surfaced.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadJob {
    pub id: Uuid,
    pub kind: SourceKind,
    pub label: String,
    pub status: UploadStatus,
    pub error_message: Option<String>,
}

impl UploadJob {
    pub fn new(kind: SourceKind, label: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            label,
            status: UploadStatus::Queued,
            error_message: None,
        }
    }

    /// Move to `target`, rejecting anything outside the lifecycle.
    pub fn transition(&mut self, target: UploadStatus) -> Result<()> {
        if !self.status.can_transition_to(&target) {
            return Err(CortexError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        tracing::debug!(job_id = %self.id, "Upload job: {} -> {}", self.status, target);
        self.status = target;
        Ok(())
    }
}

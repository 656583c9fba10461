//! `reqwest` implementation of [`KnowledgeBase`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use cortex_core::config::ApiConfig;
use cortex_core::{
    AskRequest, AskResult, CortexError, DocumentSummary, DocumentWithChunks, Result,
    WatcherSnapshot,
};

use crate::api::{AnswerChunks, KnowledgeBase};
use crate::sse::SseDecoder;

/// Streamed pieces buffered ahead of a slow consumer.
const ANSWER_CHUNK_CAPACITY: usize = 64;

fn transport(err: reqwest::Error) -> CortexError {
    CortexError::Transport(err.to_string())
}

#[derive(Serialize)]
struct UrlIngestBody<'a> {
    url: &'a str,
}

#[derive(Serialize)]
struct TextIngestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    content: &'a str,
    tags: &'a [String],
}

/// HTTP client for the knowledge-base service.
///
/// Only the connect phase has a timeout. Once a request is on the wire it
/// stays pending until the service answers or the caller drops the future.
#[derive(Debug, Clone)]
pub struct HttpKnowledgeBase {
    base_url: String,
    client: reqwest::Client,
}

impl HttpKnowledgeBase {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| CortexError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, turning non-2xx replies into `Service` errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), body_len = body.len(), "Service returned error");
        Err(CortexError::Service {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let text = response.text().await.map_err(transport)?;
        serde_json::from_str(&text).map_err(|e| {
            CortexError::Serialization(format!("Failed to parse service response: {}", e))
        })
    }

    async fn text(response: reqwest::Response) -> Result<String> {
        response.text().await.map_err(transport)
    }
}

/// Forward the events of a streamed answer until the body ends or the
/// receiver is dropped.
async fn pump_answer(mut response: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut decoder = SseDecoder::new();
    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                for event in decoder.push(&bytes) {
                    if tx.send(Ok(event)).await.is_err() {
                        tracing::debug!("Answer stream receiver dropped");
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Answer stream broke off");
                let _ = tx.send(Err(transport(e))).await;
                return;
            }
        }
    }
    if let Some(event) = decoder.finish() {
        let _ = tx.send(Ok(event)).await;
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn ask(&self, request: &AskRequest) -> Result<AskResult> {
        let response = self
            .send(self.client.post(self.url("/v1/ask")).json(request))
            .await?;
        Self::decode(response).await
    }

    async fn ask_stream(&self, request: &AskRequest) -> Result<AnswerChunks> {
        let response = self
            .send(
                self.client
                    .post(self.url("/v1/ask/stream"))
                    .header(ACCEPT, "text/event-stream")
                    .json(request),
            )
            .await?;
        let (tx, rx) = mpsc::channel(ANSWER_CHUNK_CAPACITY);
        tokio::spawn(pump_answer(response, tx));
        Ok(rx)
    }

    async fn ingest_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| CortexError::Transport(format!("Failed to create multipart: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .send(self.client.post(self.url("/v1/ingest/upload")).multipart(form))
            .await?;
        Self::text(response).await
    }

    async fn ingest_url(&self, url: &str) -> Result<String> {
        let response = self
            .send(
                self.client
                    .post(self.url("/v1/ingest/url"))
                    .json(&UrlIngestBody { url }),
            )
            .await?;
        Self::text(response).await
    }

    async fn ingest_text(
        &self,
        title: Option<&str>,
        content: &str,
        tags: &[String],
    ) -> Result<String> {
        let body = TextIngestBody {
            title,
            content,
            tags,
        };
        let response = self
            .send(self.client.post(self.url("/v1/ingest/text")).json(&body))
            .await?;
        Self::text(response).await
    }

    async fn recent_documents(&self, limit: u32) -> Result<Vec<DocumentSummary>> {
        let response = self
            .send(
                self.client
                    .get(self.url("/v1/ingest/recent"))
                    .query(&[("limit", limit)]),
            )
            .await?;
        Self::decode(response).await
    }

    async fn document(&self, id: i64) -> Result<DocumentWithChunks> {
        let path = format!("/v1/ingest/document/{}", id);
        let response = self.send(self.client.get(self.url(&path))).await?;
        Self::decode(response).await
    }

    async fn delete_document(&self, id: i64) -> Result<()> {
        let path = format!("/v1/ingest/document/{}", id);
        self.send(self.client.delete(self.url(&path))).await?;
        Ok(())
    }

    async fn watcher_status(&self) -> Result<WatcherSnapshot> {
        let response = self
            .send(self.client.get(self.url("/v1/watcher/status")))
            .await?;
        Self::decode(response).await
    }

    async fn trigger_scan(&self) -> Result<()> {
        self.send(self.client.post(self.url("/v1/watcher/scan")))
            .await?;
        Ok(())
    }
}

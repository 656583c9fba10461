//! Line-based dictation source for terminals.
//!
//! Each input line is one recognition result. A line starting with `~` is an
//! interim hypothesis; every other non-blank line is final.

use std::sync::Mutex;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};

use cortex_core::{CortexError, Result};
use cortex_dictation::{
    DictationSource, RecognitionBatch, RecognitionCapabilities, RecognitionEntry,
    RecognitionStream,
};

/// Reads recognition results from a line-oriented reader.
///
/// The reader can be consumed by one stream only.
pub struct LineSource<R> {
    reader: Mutex<Option<R>>,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
        }
    }
}

/// Interpret one input line.
pub fn parse_line(line: &str) -> Option<RecognitionEntry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.strip_prefix('~') {
        Some(interim) => Some(RecognitionEntry::interim(interim.trim())),
        None => Some(RecognitionEntry::finalized(line)),
    }
}

impl<R> DictationSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn capabilities(&self) -> RecognitionCapabilities {
        let available = self
            .reader
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false);
        if available {
            RecognitionCapabilities::full()
        } else {
            RecognitionCapabilities::default()
        }
    }

    fn open(&self, language: &str) -> Result<RecognitionStream> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| {
                CortexError::CapabilityUnavailable("input has already been consumed".to_string())
            })?;
        tracing::debug!(language, "Line dictation source opened");

        let (results_tx, results) = mpsc::channel(16);
        let (stop, mut stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                let line = tokio::select! {
                    _ = &mut stop_rx => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        let Some(entry) = parse_line(&line) else {
                            continue;
                        };
                        if results_tx.send(RecognitionBatch::new(vec![entry])).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dictation input failed");
                        break;
                    }
                }
            }
            tracing::debug!("Line dictation source closed");
        });

        Ok(RecognitionStream { results, stop })
    }
}

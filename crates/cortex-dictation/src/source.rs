//! The speech-recognition capability the controller depends on.

use tokio::sync::{mpsc, oneshot};

use cortex_core::error::Result;

/// What a recognition source can do on this host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecognitionCapabilities {
    /// Keeps recognizing across pauses instead of stopping after one phrase.
    pub continuous: bool,
    /// Reports provisional results before they are final.
    pub interim_results: bool,
    /// Can be pinned to a single language.
    pub single_language: bool,
}

impl RecognitionCapabilities {
    /// A source with every capability dictation needs.
    pub fn full() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            single_language: true,
        }
    }

    pub fn supports_dictation(&self) -> bool {
        self.continuous && self.interim_results && self.single_language
    }
}

/// One recognition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionEntry {
    pub text: String,
    /// The engine will not revise this result any further.
    pub is_final: bool,
}

impl RecognitionEntry {
    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}

/// Results delivered together by one recognizer callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionBatch {
    pub entries: Vec<RecognitionEntry>,
}

impl RecognitionBatch {
    pub fn new(entries: Vec<RecognitionEntry>) -> Self {
        Self { entries }
    }
}

/// An open recognition stream.
///
/// The source keeps sending batches on `results` until `stop` fires (or is
/// dropped) or it runs out of input, then closes the channel.
#[derive(Debug)]
pub struct RecognitionStream {
    pub results: mpsc::Receiver<RecognitionBatch>,
    pub stop: oneshot::Sender<()>,
}

/// A host speech-recognition capability.
pub trait DictationSource: Send + Sync {
    fn capabilities(&self) -> RecognitionCapabilities;

    /// Open a stream recognizing `language` (a BCP-47 tag).
    ///
    /// Returns [`cortex_core::CortexError::CapabilityUnavailable`] when the
    /// recognizer cannot be started, e.g. permission was denied.
    fn open(&self, language: &str) -> Result<RecognitionStream>;
}

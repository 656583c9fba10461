//! Cortex dictation crate - transcript merging and the dictation stream lifecycle.
//!
//! A recognition source re-delivers overlapping text across "final"
//! boundaries. [`merger::merge`] folds each finalized fragment into the
//! growing transcript without duplicating words. [`DictationController`] owns
//! the single active recognition stream, drives the Idle/Listening state
//! machine, and forwards finalized fragments over a channel to whichever
//! [`TranscriptBuffer`] owns the displayed editor.

pub mod buffer;
pub mod controller;
pub mod merger;
pub mod source;
pub mod state;

pub use buffer::TranscriptBuffer;
pub use controller::{DictationController, EditorSurface, FinalFragment};
pub use merger::merge;
pub use source::{
    DictationSource, RecognitionBatch, RecognitionCapabilities, RecognitionEntry,
    RecognitionStream,
};
pub use state::DictationState;

//! Editable text owned by the displayed editor.

use tokio::sync::mpsc;

use crate::controller::{EditorSurface, FinalFragment};
use crate::merger::merge;

/// Text of one editor surface.
///
/// Changed only by finalized fragments addressed to this surface and by
/// direct user edits. The interim preview is kept apart and never committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptBuffer {
    surface: EditorSurface,
    text: String,
    preview: String,
}

impl TranscriptBuffer {
    pub fn new(surface: EditorSurface) -> Self {
        Self {
            surface,
            text: String::new(),
            preview: String::new(),
        }
    }

    pub fn surface(&self) -> EditorSurface {
        self.surface
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Merge a finalized fragment. Fragments for other surfaces are ignored.
    pub fn apply(&mut self, fragment: &FinalFragment) -> bool {
        if fragment.surface != self.surface {
            tracing::debug!(
                buffer = %self.surface,
                fragment = %fragment.surface,
                "Dropping fragment for another surface"
            );
            return false;
        }
        self.text = merge(&self.text, &fragment.text);
        self.preview.clear();
        true
    }

    /// Apply every fragment already queued on `rx` without waiting.
    ///
    /// Returns how many fragments were merged.
    pub fn drain(&mut self, rx: &mut mpsc::Receiver<FinalFragment>) -> usize {
        let mut applied = 0;
        while let Ok(fragment) = rx.try_recv() {
            if self.apply(&fragment) {
                applied += 1;
            }
        }
        applied
    }

    /// Replace the text with what the user typed.
    pub fn edit(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn preview(&self) -> &str {
        &self.preview
    }

    pub fn set_preview(&mut self, interim: impl Into<String>) {
        self.preview = interim.into();
    }

    /// Committed text followed by the uncommitted preview, for display.
    pub fn display_text(&self) -> String {
        match (self.text.trim().is_empty(), self.preview.trim().is_empty()) {
            (_, true) => self.text.clone(),
            (true, false) => self.preview.clone(),
            (false, false) => format!("{} {}", self.text.trim_end(), self.preview.trim()),
        }
    }

    /// Take the committed text, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        self.preview.clear();
        std::mem::take(&mut self.text)
    }
}

//! Incremental decoding of `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary pieces, so lines are only decoded once their
//! terminating newline has been seen. That keeps multi-byte characters split
//! across pieces intact.
//!
//! The service writes each answer token as `data:<token>` with no separator
//! space, and tokens carry their own leading spaces. The payload after
//! `data:` is therefore kept verbatim.

/// Buffers partial lines and yields one payload per complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of the body. Returns the payloads of every event
    /// completed by it, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush an event left unterminated when the body ended.
    pub fn finish(mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            if let Some(event) = self.line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(payload) = line.strip_prefix("data:") {
            self.data.push(payload.to_string());
        }
        // event:, id: and retry: carry nothing the client uses.
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}

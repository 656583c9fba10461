//! Turns transport and service failures into one user-facing message.
//!
//! Service error bodies are usually JSON with a human-readable field, but a
//! proxy or a crashed handler can return plain text or nothing at all. The
//! structured field is preferred; the raw text is the fallback.

use cortex_core::CortexError;

/// JSON fields checked for a human-readable message, in priority order.
const MESSAGE_FIELDS: [&str; 3] = ["error", "message", "detail"];

const EMPTY_FALLBACK: &str = "Request failed";

/// Extract the most readable message from a raw error body.
pub fn extract_message(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return EMPTY_FALLBACK.to_string();
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => MESSAGE_FIELDS
            .iter()
            .filter_map(|field| map.get(*field).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|msg| !msg.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string()),
        Ok(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => trimmed.to_string(),
    }
}

/// The message to show for any error, structured body first.
pub fn display_message(err: &CortexError) -> String {
    extract_message(&err.raw_message())
}

/// Answer-panel text for a failed ask.
pub fn ask_failure_text(message: &str) -> String {
    format!(
        "There was a problem generating an answer.\n\
         Possible causes: local model timeout or context size limits.\n\
         Details: {}",
        message
    )
}

//! Cortex client crate - access to the knowledge-base service.
//!
//! [`KnowledgeBase`] is the seam every client flow depends on; the
//! [`HttpKnowledgeBase`] implementation talks to the service over HTTP with
//! `reqwest`, decoding streamed answers with [`sse`]. [`normalize`] turns
//! failures into the single message string shown to the user.

pub mod api;
pub mod http;
pub mod normalize;
pub mod sse;

pub use api::{AnswerChunks, KnowledgeBase};
pub use http::HttpKnowledgeBase;
pub use normalize::{ask_failure_text, display_message, extract_message};

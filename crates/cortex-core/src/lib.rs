//! Cortex core crate - shared domain types, errors, configuration, and events.
//!
//! Every other crate in the workspace speaks in these types: the request and
//! result shapes exchanged with the knowledge-base service, the ingestion job
//! lifecycle, the error taxonomy, and the event bus the client flows use to
//! notify each other.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::CortexConfig;
pub use error::{CortexError, Result};
pub use events::{ClientEvent, EventBus, NotificationLevel};
pub use types::*;

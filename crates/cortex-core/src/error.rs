use thiserror::Error;

/// Top-level error type for the Cortex client.
///
/// The first four variants form the user-facing taxonomy: a missing host
/// capability, a transport failure, a non-2xx service reply, and input that
/// was rejected before anything was dispatched. The rest are ambient
/// failures (configuration, persistence, serialization) that subsystem crates
/// convert into via `From` so the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CortexError {
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service error ({status}): {body}")]
    Service { status: u16, body: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Preferences error: {0}")]
    Preferences(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CortexError {
    /// The raw text a user should see for this error, before any template.
    ///
    /// Service errors expose their body verbatim; everything else uses the
    /// inner message without the variant prefix.
    pub fn raw_message(&self) -> String {
        match self {
            CortexError::CapabilityUnavailable(msg)
            | CortexError::Transport(msg)
            | CortexError::Validation(msg)
            | CortexError::Config(msg)
            | CortexError::Preferences(msg)
            | CortexError::Serialization(msg) => msg.clone(),
            CortexError::Service { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for CortexError {
    fn from(err: toml::de::Error) -> Self {
        CortexError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CortexError {
    fn from(err: toml::ser::Error) -> Self {
        CortexError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CortexError {
    fn from(err: serde_json::Error) -> Self {
        CortexError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Cortex operations.
pub type Result<T> = std::result::Result<T, CortexError>;

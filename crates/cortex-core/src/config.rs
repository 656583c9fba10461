use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CortexError, Result};

/// Upper bound the service applies to the recent-documents limit.
pub const MAX_RECENT_LIMIT: u32 = 50;

/// Top-level configuration for the Cortex client.
///
/// Loaded from `~/.cortex/config.toml` by default. Each section corresponds
/// to one of the client flows or to a cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CortexConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ask: AskConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub dictation: DictationConfig,
    #[serde(default)]
    pub widget: WidgetConfig,
}

impl CortexConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CortexConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CortexError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory for client-side state (widget position, preferences).
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.cortex/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Knowledge-base service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the knowledge-base service.
    pub base_url: String,
    /// TCP connect timeout. Requests themselves never time out client-side.
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Which response is shown when asks overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrdering {
    /// Only the most recently issued ask may update the state.
    #[default]
    LatestRequest,
    /// Whichever response resolves last is shown.
    LastResponse,
}

/// Question/answer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AskConfig {
    /// Initial value of the "allow general knowledge fallback" flag.
    pub allow_fallback: bool,
    /// Policy for overlapping asks.
    pub response_ordering: ResponseOrdering,
    /// Answer text shown while a request is pending.
    pub placeholder: String,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            allow_fallback: false,
            response_ordering: ResponseOrdering::default(),
            placeholder: "...".to_string(),
        }
    }
}

/// Recent-documents list settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Number of documents fetched for the recent list.
    pub recent_limit: u32,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self { recent_limit: 10 }
    }
}

impl DocumentsConfig {
    /// The configured limit clamped into the range the service accepts.
    pub fn effective_limit(&self) -> u32 {
        self.recent_limit.clamp(1, MAX_RECENT_LIMIT)
    }
}

/// Folder-watcher status polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between background status refreshes.
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
        }
    }
}

/// Dictation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DictationConfig {
    /// BCP-47 language tag requested from the recognition source.
    pub language: String,
}

impl Default for DictationConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
        }
    }
}

/// Floating quick-add widget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Minimum distance kept between the widget and the viewport edges.
    pub margin: f64,
    /// Widget width in pixels.
    pub width: f64,
    /// Widget height in pixels.
    pub height: f64,
    /// Preference key under which the last position is persisted.
    pub position_key: String,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            margin: 16.0,
            width: 56.0,
            height: 56.0,
            position_key: "quick-add.position".to_string(),
        }
    }
}

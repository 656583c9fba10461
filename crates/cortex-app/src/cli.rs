//! CLI argument definitions for the Cortex client.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cortex - ask questions of your knowledge base, feed it documents, dictate notes.
#[derive(Parser, Debug)]
#[command(name = "cortex", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the knowledge-base service.
    #[arg(long = "api-url", global = true)]
    pub api_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask a question and print the cited answer.
    Ask {
        question: String,
        /// Let the service answer from general knowledge when nothing matches.
        #[arg(long)]
        fallback: bool,
        /// Restrict the answer to one document.
        #[arg(long = "document", value_name = "ID")]
        document: Option<i64>,
        /// Print the answer as it is generated. Streamed answers carry no sources.
        #[arg(long)]
        stream: bool,
    },
    /// Ingest a file. Only the first path is uploaded.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ingest a web page.
    IngestUrl { url: String },
    /// Ingest a text note. Reads stdin when no content is given.
    Note {
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        content: Option<String>,
    },
    /// List recently indexed documents.
    Recent {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Print a document and its chunks.
    Show { id: i64 },
    /// Delete a document.
    Delete { id: i64 },
    /// Folder-watcher status and scans.
    Watcher {
        #[command(subcommand)]
        action: WatcherAction,
    },
    /// Dictate from stdin. Lines starting with `~` are interim results.
    Dictate {
        /// Ingest the transcript as a note when input ends.
        #[arg(long)]
        save: bool,
        #[arg(long)]
        title: Option<String>,
    },
    /// Show or move the quick-add widget position.
    Widget {
        /// Viewport size as WIDTHxHEIGHT.
        #[arg(long, value_parser = parse_viewport, default_value = "1280x800")]
        viewport: (f64, f64),
        /// Forget the saved position.
        #[arg(long)]
        reset: bool,
        /// Drag the widget by DX,DY.
        #[arg(long = "drag", value_parser = parse_offset, value_name = "DX,DY", allow_hyphen_values = true)]
        drag: Option<(f64, f64)>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherAction {
    /// Print the current status.
    Status,
    /// Request a scan, then print the status.
    Scan,
    /// Poll the status until interrupted.
    Watch,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CORTEX_CONFIG env var > platform default (~/.cortex/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CORTEX_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the service base URL.
    ///
    /// Priority: --api-url flag > CORTEX_API_URL env var > config file value.
    pub fn resolve_api_url(&self, config_url: &str) -> String {
        if let Some(ref url) = self.api_url {
            return url.clone();
        }
        if let Ok(url) = std::env::var("CORTEX_API_URL") {
            if !url.trim().is_empty() {
                return url;
            }
        }
        config_url.to_string()
    }

    /// Resolve the log filter.
    ///
    /// Priority: --log-level flag > RUST_LOG > config file value > info.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                return filter;
            }
        }
        if !config_level.trim().is_empty() {
            return config_level.to_string();
        }
        "info".to_string()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".cortex").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".cortex").join("config.toml");
    }
    PathBuf::from("config.toml")
}

fn parse_pair(raw: &str, sep: char) -> Option<(f64, f64)> {
    let (a, b) = raw.split_once(sep)?;
    let a = a.trim().parse::<f64>().ok()?;
    let b = b.trim().parse::<f64>().ok()?;
    (a.is_finite() && b.is_finite()).then_some((a, b))
}

fn parse_viewport(raw: &str) -> Result<(f64, f64), String> {
    match parse_pair(&raw.to_ascii_lowercase(), 'x') {
        Some((w, h)) if w > 0.0 && h > 0.0 => Ok((w, h)),
        _ => Err(format!("expected WIDTHxHEIGHT, got '{}'", raw)),
    }
}

fn parse_offset(raw: &str) -> Result<(f64, f64), String> {
    parse_pair(raw, ',').ok_or_else(|| format!("expected DX,DY, got '{}'", raw))
}

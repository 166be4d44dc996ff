// ============================================================
// Layer 3 — Error Kinds
// ============================================================
// Every stage fails fast. These are the kinds a caller can tell
// apart; anyhow carries them (plus context) up to main.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FinetuneError>;

#[derive(Debug, Error)]
pub enum FinetuneError {
    /// Missing, invalid or insufficient hub credentials
    #[error("authentication failed for '{model}': {reason}")]
    Authentication { model: String, reason: String },

    /// Unknown model identifier or missing file in the repository
    #[error("'{0}' was not found")]
    NotFound(String),

    /// A setting that cannot work with the loaded model or itself
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Malformed input data: dataset lines, config.json, weight files
    #[error("{location}: {reason}")]
    Format { location: String, reason: String },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FinetuneError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn format(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format { location: location.into(), reason: reason.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

//! Error types for the browscap engine.
//! One error enum covering loading, compiling, caching and configuration.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BrowscapError {
    // Loading
    #[error("Definitions source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Transport '{transport}' failed for {url}: {message}")]
    Transport {
        transport: &'static str,
        url: String,
        message: String,
    },

    #[error("Bad datetime format from {url}: {value:?}")]
    BadTimestamp { url: String, value: String },

    // Compiling
    #[error("Malformed definitions: {0}")]
    MalformedDefinitions(String),

    // Cache
    #[error("Could not write {path}: {message}")]
    StaleWriteConflict { path: PathBuf, message: String },

    #[error("Cache artifact not found at {0}")]
    CacheNotFound(PathBuf),

    #[error("Cache artifact {path} is corrupt: {message}")]
    CacheCorrupt { path: PathBuf, message: String },

    // Config
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BrowscapError {
    pub(crate) fn transport(transport: &'static str, url: &str, message: impl ToString) -> Self {
        BrowscapError::Transport {
            transport,
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn write_conflict(path: &std::path::Path, message: impl ToString) -> Self {
        BrowscapError::StaleWriteConflict {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn corrupt(path: &std::path::Path, message: impl ToString) -> Self {
        BrowscapError::CacheCorrupt {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrowscapError>;

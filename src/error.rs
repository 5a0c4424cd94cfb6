//! Crate-wide error type.
//!
//! Any error that escapes a dispatch tier becomes a 500 whose body carries
//! the error chain (development posture).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A document route pointed at a source with no compiled artifact.
    #[error("document source not found: {}", .0.display())]
    SourceMissing(PathBuf),

    /// A handler failed with an application-level message.
    #[error("{0}")]
    Handler(String),

    /// A compile function reported failure for a watched source.
    #[error("compilation of {} failed: {message}", path.display())]
    Compile { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid route pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("invalid bind address: {0}")]
    BindAddress(String),
}

impl Error {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

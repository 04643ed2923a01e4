//! CLI error types.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The database file does not exist.
    ///
    /// This typically means `serve` has never run with the sqlite backend.
    #[error("database not found at {path}. Run 'wikistats serve' with the sqlite backend first")]
    DatabaseNotFound { path: PathBuf },

    /// Configuration is invalid or could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The event stream could not be opened.
    #[error(transparent)]
    Connection(#[from] stream::ConnectionError),

    /// Consuming the event stream failed.
    #[error(transparent)]
    Consume(#[from] stream::ConsumeError),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// A supervised task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is an orderly shutdown rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Connection(err) => err.is_cancelled(),
            Self::Consume(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

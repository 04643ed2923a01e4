use reqwest::StatusCode;
use std::io;
use thiserror::Error;

/// A failed attempt to open the event stream.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("connecting to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("server response: {0}")]
    Status(StatusCode),

    /// The caller cancelled while the attempt was in flight.
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Why [`StreamConsumer::consume`](crate::StreamConsumer::consume) stopped.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConsumeError {
    /// The caller cancelled. This is an orderly shutdown, not a failure.
    #[error("stream consumption cancelled")]
    Cancelled,

    /// The stream was closed by the server but could not be reopened.
    #[error("reconnecting to stream: {0}")]
    Reconnect(#[source] ConnectionError),

    #[error("reading stream: {0}")]
    Read(#[source] io::Error),

    #[error("stream line exceeds {max} bytes")]
    LineTooLong { max: usize },
}

impl ConsumeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ConnectionError> for ConsumeError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Cancelled => Self::Cancelled,
            other => Self::Reconnect(other),
        }
    }
}

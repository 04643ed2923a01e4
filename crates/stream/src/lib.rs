//! Event stream consumer for wikistats.
//!
//! Reads the Wikimedia recent-changes stream (server-sent events over a
//! long-lived HTTP response), decodes each `data:` line into an
//! [`EventRecord`] and feeds it to an [`AggregateStore`](storage::AggregateStore).
//!
//! # Reconnecting
//!
//! The upstream ends every long-lived response after a while by resetting the
//! HTTP/2 stream with `CANCEL`. [`StreamConsumer`] treats that reset as benign:
//! it waits [`DEFAULT_RECONNECT_DELAY`] and reconnects with `since=<dt>` set
//! to the timestamp of the last decoded event. Events replayed by the upstream
//! are absorbed by the store, which counts each message id once.
//!
//! Any other read error ends consumption with a [`ConsumeError`].
//!
//! # Example
//!
//! ```no_run
//! use storage::LocalStore;
//! use stream::StreamConsumer;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cancel = CancellationToken::new();
//! let store = LocalStore::new();
//! let mut consumer = StreamConsumer::new(
//!     "https://stream.wikimedia.org/v2/stream/recentchange",
//!     "wikistats/0.1 (ops@example.org)",
//! )?;
//!
//! let stream = consumer.connect(&cancel).await?;
//! consumer.consume(&cancel, stream, &store).await?;
//! # Ok(())
//! # }
//! ```

mod connector;
mod consumer;
mod error;
mod event;

pub use connector::{ByteStream, Connector, HttpConnector};
pub use consumer::{
    DEFAULT_RECONNECT_DELAY, MAX_LINE_LENGTH, RESUME_PARAM, StreamConsumer, is_benign_termination,
    resume_url,
};
pub use error::{ConnectionError, ConsumeError};
pub use event::{DATA_PREFIX, EventRecord};

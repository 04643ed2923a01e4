//! Stream consumer and its reconnect/resume state machine.

use crate::{ByteStream, ConnectionError, ConsumeError, Connector, EventRecord, HttpConnector};
use futures::StreamExt;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use storage::AggregateStore;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Wait between a server-initiated close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(120);

/// Longest line accepted from the stream.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Query parameter carrying the resume timestamp.
pub const RESUME_PARAM: &str = "since";

/// How one connection's stream came to an end.
enum StreamEnd {
    /// End of input without an error.
    Finished,
    /// The server closed the stream in the expected way; resume.
    Terminated,
}

enum State {
    Reading(ByteStream),
    AwaitingBackoff,
    Reconnecting,
}

/// Reads change events from the upstream and feeds them to a store.
pub struct StreamConsumer<C = HttpConnector> {
    connector: C,
    url: Url,
    reconnect_delay: Duration,
}

impl StreamConsumer<HttpConnector> {
    /// Consumer for `url` over HTTP, identifying itself with `user_agent`.
    pub fn new(url: &str, user_agent: impl Into<String>) -> Result<Self, ConnectionError> {
        Ok(Self::with_connector(
            HttpConnector::new(user_agent)?,
            Url::parse(url)?,
        ))
    }
}

impl<C: Connector> StreamConsumer<C> {
    pub fn with_connector(connector: C, url: Url) -> Self {
        Self {
            connector,
            url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// The URL the next connection attempt will use.
    pub fn current_url(&self) -> &Url {
        &self.url
    }

    /// Open the stream at the current URL.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<ByteStream, ConnectionError> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            result = self.connector.connect(&self.url) => result?,
        };
        info!(url = %self.url, "connected to event stream");
        Ok(stream)
    }

    /// Feed every event on `stream` into `store` until the input ends.
    ///
    /// When the server closes the stream with its benign termination signal,
    /// the consumer waits for the reconnect delay and connects again, asking
    /// the upstream to replay from the last decoded event. Replayed events are
    /// absorbed by the store's idempotence. Returns `Ok(())` once a stream
    /// ends cleanly.
    pub async fn consume<S>(
        &mut self,
        cancel: &CancellationToken,
        stream: ByteStream,
        store: &S,
    ) -> Result<(), ConsumeError>
    where
        S: AggregateStore + ?Sized,
    {
        let mut resume_from: Option<String> = None;
        let mut state = State::Reading(stream);

        loop {
            state = match state {
                State::Reading(stream) => {
                    match self.read(cancel, stream, store, &mut resume_from).await? {
                        StreamEnd::Finished => return Ok(()),
                        StreamEnd::Terminated => {
                            self.url = resume_url(&self.url, resume_from.as_deref().unwrap_or(""));
                            info!(
                                url = %self.url,
                                delay_secs = self.reconnect_delay.as_secs(),
                                "stream closed by server, reconnecting after delay"
                            );
                            State::AwaitingBackoff
                        }
                    }
                }
                State::AwaitingBackoff => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ConsumeError::Cancelled),
                        _ = tokio::time::sleep(self.reconnect_delay) => State::Reconnecting,
                    }
                }
                State::Reconnecting => State::Reading(self.connect(cancel).await?),
            };
        }
    }

    async fn read<S>(
        &self,
        cancel: &CancellationToken,
        stream: ByteStream,
        store: &S,
        resume_from: &mut Option<String>,
    ) -> Result<StreamEnd, ConsumeError>
    where
        S: AggregateStore + ?Sized,
    {
        let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
        let mut lines = FramedRead::new(stream, codec);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConsumeError::Cancelled),
                next = lines.next() => next,
            };

            let line = match next {
                None => return Ok(StreamEnd::Finished),
                Some(Ok(line)) => line,
                Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                    return Err(ConsumeError::LineTooLong {
                        max: MAX_LINE_LENGTH,
                    });
                }
                Some(Err(AnyDelimiterCodecError::Io(err))) => {
                    if cancel.is_cancelled() {
                        return Err(ConsumeError::Cancelled);
                    }
                    if is_benign_termination(&err) {
                        debug!(error = %err, "server cancelled the stream");
                        return Ok(StreamEnd::Terminated);
                    }
                    return Err(ConsumeError::Read(err));
                }
            };

            let record = match EventRecord::from_line(&line) {
                None => continue,
                Some(Ok(record)) => record,
                Some(Err(err)) => {
                    warn!(error = %err, "skipping undecodable event");
                    continue;
                }
            };

            *resume_from = Some(record.observed_at.clone());
            if let Err(err) = store
                .update(&record.id, &record.user, &record.server, record.is_bot)
                .await
            {
                warn!(id = %record.id, error = %err, "failed to record event");
            }
        }
    }
}

/// `base` with its resume parameter set to `since`.
///
/// Any earlier resume parameter is replaced; other query parameters are kept.
pub fn resume_url(base: &Url, since: &str) -> Url {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != RESUME_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = base.clone();
    url.set_query(None);
    url.query_pairs_mut()
        .extend_pairs(kept)
        .append_pair(RESUME_PARAM, since);
    url
}

/// Whether a read error is the upstream closing the stream on purpose.
///
/// The upstream ends long-lived responses by resetting the HTTP/2 stream with
/// `CANCEL`. That reset may be wrapped several layers deep (reqwest, hyper,
/// `io::Error`), so the whole source chain is searched.
pub fn is_benign_termination(err: &io::Error) -> bool {
    let mut cause = next_cause(err);
    while let Some(err) = cause {
        if let Some(h2_err) = err.downcast_ref::<h2::Error>() {
            return h2_err.reason() == Some(h2::Reason::CANCEL);
        }
        cause = next_cause(err);
    }
    false
}

// `io::Error::source` skips the wrapped error itself, so unwrap it explicitly.
fn next_cause<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a (dyn StdError + 'static)> {
    match err.downcast_ref::<io::Error>() {
        Some(io_err) => io_err
            .get_ref()
            .map(|inner| inner as &(dyn StdError + 'static)),
        None => err.source(),
    }
}

//! Transports that open the event stream.

use crate::ConnectionError;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::USER_AGENT;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

/// A live response body. Dropping it closes the connection.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens a byte stream for a URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<ByteStream, ConnectionError>;
}

/// HTTP(S) connector.
///
/// Sends the identifying `User-Agent` the upstream requires and accepts only
/// success statuses. No overall request timeout is set: the body is expected
/// to stay open indefinitely.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpConnector {
    pub fn new(user_agent: impl Into<String>) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ConnectionError::Client)?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, url: &Url) -> Result<ByteStream, ConnectionError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| ConnectionError::Transport {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::Status(status));
        }

        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}

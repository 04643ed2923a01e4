//! Runs the stream consumer and the HTTP API until shutdown.
//!
//! Both units share one cancellation token. A signal, or a fatal error in
//! either unit, cancels it; the supervisor then waits for both to finish.
//! A stream that ends cleanly stops only the consumer: the API keeps serving
//! the counts gathered so far.

use crate::api::{self, AppState};
use crate::config::{Backend, Config};
use crate::error::{Error, Result};
use auth::TokenCache;
use std::sync::Arc;
use std::time::Duration;
use storage::{AggregateStore, LocalStore, ReplicatedStore, SqliteKeySpace};
use stream::{Connector, StreamConsumer};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long open connections may keep the API alive after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Start everything described by `config` and block until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let store = build_store(&config).await?;
    let tokens = Arc::new(TokenCache::new());
    let listener = TcpListener::bind(config.api.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "api listening");

    let consumer = StreamConsumer::new(&config.stream.url, config.stream.user_agent.clone())?
        .reconnect_delay(config.stream.reconnect_delay());

    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    let app = api::router(AppState {
        store: store.clone(),
        tokens,
    });
    let server = tokio::spawn(supervise(
        "api",
        cancel.clone(),
        serve(listener, app, cancel.clone(), SHUTDOWN_GRACE),
    ));
    let ingest = tokio::spawn(supervise(
        "consumer",
        cancel.clone(),
        consume(consumer, store.clone(), cancel.clone()),
    ));

    let (server, ingest) = tokio::join!(server, ingest);

    match store.stats().await {
        Ok(stats) => info!(
            messages = stats.messages,
            users = stats.users,
            bots = stats.bots,
            servers = stats.servers,
            "final stats"
        ),
        Err(err) => warn!(error = %err, "could not read final stats"),
    }
    info!("shutdown complete");

    // The first real failure decides the exit status.
    server??;
    ingest??;
    Ok(())
}

/// Construct the configured aggregate store and seed the bootstrap account.
pub async fn build_store(config: &Config) -> Result<Arc<dyn AggregateStore>> {
    let username = config.auth.username.clone();
    let password = config.auth.password.clone();
    let cost = config.auth.bcrypt_cost;

    match config.storage.backend {
        Backend::Memory => {
            info!("using in-memory store");
            let store = tokio::task::spawn_blocking(move || {
                LocalStore::new()
                    .with_cost(cost)
                    .with_account(&username, &password)
            })
            .await??;
            Ok(Arc::new(store))
        }
        Backend::Sqlite => {
            let path = config.storage.path.clone();
            info!(path = %path.display(), "using replicated store on sqlite key space");
            let keys = tokio::task::spawn_blocking(move || SqliteKeySpace::open(path)).await??;
            let store = ReplicatedStore::new(keys).with_cost(cost);
            if store.provision(&username, &password).await? {
                info!(%username, "provisioned bootstrap account");
            }
            Ok(Arc::new(store))
        }
    }
}

/// Run one unit; on a real failure, take everything else down with it.
async fn supervise<F>(unit: &'static str, cancel: CancellationToken, work: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match work.await {
        Err(err) if err.is_cancelled() => {
            info!(unit, "stopped");
            Ok(())
        }
        Err(err) => {
            error!(unit, error = %err, "failed, shutting down");
            cancel.cancel();
            Err(err)
        }
        Ok(()) => {
            info!(unit, "finished");
            Ok(())
        }
    }
}

/// Serve `app` until cancelled, then drain connections for at most `grace`.
async fn serve(
    listener: TcpListener,
    app: axum::Router,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let shutdown = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = cancel.cancelled() => {
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!(
                    grace_secs = grace.as_secs_f64(),
                    "connections still open after grace period, closing api"
                ),
            }
        }
    }
    Ok(())
}

async fn consume<C: Connector>(
    mut consumer: StreamConsumer<C>,
    store: Arc<dyn AggregateStore>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(url = %consumer.current_url(), "starting consumer");
    let stream = consumer.connect(&cancel).await?;
    consumer.consume(&cancel, stream, store.as_ref()).await?;
    info!("event stream ended");
    Ok(())
}

async fn watch_signals(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use stream::{ByteStream, ConnectionError};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Upstream that answers with an empty body.
    struct EmptyUpstream;

    #[async_trait]
    impl Connector for EmptyUpstream {
        async fn connect(
            &self,
            _url: &url::Url,
        ) -> std::result::Result<ByteStream, ConnectionError> {
            Ok(Box::pin(tokio::io::empty()))
        }
    }

    async fn start_api(
        store: Arc<dyn AggregateStore>,
        cancel: CancellationToken,
        grace: Duration,
    ) -> (SocketAddr, tokio::task::JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = api::router(AppState {
            store,
            tokens: Arc::new(TokenCache::new()),
        });
        (addr, tokio::spawn(serve(listener, app, cancel, grace)))
    }

    async fn healthcheck(addr: SocketAddr) -> String {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let request = "GET /healthcheck HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        conn.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).await.unwrap();
        response
    }

    fn config(backend: Backend, path: std::path::PathBuf) -> Config {
        let mut config = Config::default();
        config.storage.backend = backend;
        config.storage.path = path;
        config.auth.bcrypt_cost = 4;
        config
    }

    #[tokio::test]
    async fn memory_store_has_bootstrap_account() {
        let store = build_store(&config(Backend::Memory, "unused.db".into()))
            .await
            .unwrap();
        assert!(store.validate_login("admin", "admin").await);
        assert!(!store.validate_login("admin", "wrong").await);
    }

    #[tokio::test]
    async fn sqlite_store_persists_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(Backend::Sqlite, dir.path().join("stats.db"));

        let store = build_store(&config).await.unwrap();
        store.update("1", "alice", "s1", false).await.unwrap();
        assert!(store.validate_login("admin", "admin").await);
        drop(store);

        let reopened = build_store(&config).await.unwrap();
        assert_eq!(reopened.stats().await.unwrap().messages, 1);
        assert!(reopened.validate_login("admin", "admin").await);
    }

    #[tokio::test]
    async fn api_keeps_serving_after_stream_ends() {
        let store: Arc<dyn AggregateStore> = Arc::new(LocalStore::new());
        let cancel = CancellationToken::new();
        let (addr, server) = start_api(store.clone(), cancel.clone(), SHUTDOWN_GRACE).await;

        let consumer = StreamConsumer::with_connector(
            EmptyUpstream,
            url::Url::parse("http://upstream.invalid/stream").unwrap(),
        );
        let ingest = consume(consumer, store, cancel.clone());
        let result = supervise("consumer", cancel.clone(), ingest).await;
        assert!(result.is_ok());
        assert!(!cancel.is_cancelled());

        let response = healthcheck(addr).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("Service active"), "{response}");
        assert!(!server.is_finished());

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stalled_client_cannot_block_shutdown() {
        let store: Arc<dyn AggregateStore> = Arc::new(LocalStore::new());
        let cancel = CancellationToken::new();
        let (addr, server) = start_api(store, cancel.clone(), Duration::from_millis(200)).await;

        // Headers never terminated by the blank line.
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        stalled.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        let finished = tokio::time::timeout(Duration::from_secs(5), server).await;
        assert!(matches!(finished, Ok(Ok(Ok(())))));
        drop(stalled);
    }

    #[tokio::test]
    async fn supervise_cancels_siblings_on_failure() {
        let cancel = CancellationToken::new();
        let result = supervise("test", cancel.clone(), async {
            Err(Error::DatabaseNotFound {
                path: "missing.db".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn supervise_treats_cancellation_as_shutdown() {
        let cancel = CancellationToken::new();
        let result = supervise("test", cancel.clone(), async {
            Err(stream::ConsumeError::Cancelled.into())
        })
        .await;
        assert!(result.is_ok());
        assert!(!cancel.is_cancelled());
    }
}

//! HTTP API: health, login/logout and the stats read.

use auth::{AuthError, Credentials, TokenCache, bearer_token};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use storage::AggregateStore;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Upper bound on handling one request; slower requests get 408.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AggregateStore>,
    pub tokens: Arc<TokenCache>,
}

/// Build the router. `/stats` and `/logout` require a bearer token.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/stats", get(stats))
        .route("/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/login", post(login))
        .merge(protected)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthcheck() -> &'static str {
    "Service active"
}

async fn stats(State(state): State<AppState>) -> Response {
    match state.store.stats().await {
        Ok(snapshot) => snapshot.to_string().into_response(),
        Err(err) => {
            error!(error = %err, "failed to read stats");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

async fn login(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(creds) = serde_json::from_slice::<Credentials>(&body) else {
        return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
    };

    if !state
        .store
        .validate_login(&creds.username, &creds.password)
        .await
    {
        info!(username = %creds.username, "login rejected");
        return rejection(AuthError::InvalidCredentials);
    }

    let token = state.tokens.issue(&creds.username);
    info!(username = %creds.username, "issued session token");
    token.value().to_string().into_response()
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = presented_token(&headers) {
        state.tokens.revoke(token);
    }
    StatusCode::NO_CONTENT
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let checked = match presented_token(request.headers()) {
        Some(token) => state.tokens.check(token),
        None => Err(AuthError::MissingToken),
    };

    match checked {
        Ok(_) => next.run(request).await,
        Err(err) => rejection(err),
    }
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

fn rejection(err: AuthError) -> Response {
    let message = match err {
        AuthError::MissingToken => "Missing token",
        AuthError::InvalidToken => "Invalid token",
        AuthError::TokenExpired => "Token expired",
        AuthError::InvalidCredentials => "Unauthorized",
    };
    (StatusCode::UNAUTHORIZED, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::{ManualClock, TOKEN_TTL_SECS};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use chrono::TimeDelta;
    use storage::LocalStore;
    use tower::util::ServiceExt;

    struct Harness {
        app: Router,
        store: Arc<LocalStore>,
        tokens: Arc<TokenCache>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(
            LocalStore::new()
                .with_cost(4)
                .with_account("admin", "admin")
                .unwrap(),
        );
        let clock = Arc::new(ManualClock::default());
        let tokens = Arc::new(TokenCache::with_clock(clock.clone()));
        let app = router(AppState {
            store: store.clone(),
            tokens: tokens.clone(),
        });
        Harness {
            app,
            store,
            tokens,
            clock,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn login_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authed(method: Method, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn log_in(app: &Router) -> String {
        let (status, token) =
            send(app, login_request(r#"{"username":"admin","password":"admin"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        token
    }

    #[tokio::test]
    async fn healthcheck_needs_no_token() {
        let h = harness();
        let request = Request::builder()
            .uri("/healthcheck")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            send(&h.app, request).await,
            (StatusCode::OK, "Service active".to_string())
        );
    }

    #[tokio::test]
    async fn login_stats_logout_flow() {
        let h = harness();
        h.store.record("1", "alice", "https://en.wikipedia.org", false);
        h.store.record("2", "bot", "https://de.wikipedia.org", true);

        let token = log_in(&h.app).await;
        assert_eq!(token.len(), 64);
        assert!(h.tokens.validate(&token));

        let (status, body) = send(&h.app, authed(Method::GET, "/stats", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "2 messages\n1 users\n1 bots\n2 servers");

        let (status, _) = send(&h.app, authed(Method::POST, "/logout", &token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!h.tokens.contains(&token));

        let (status, body) = send(&h.app, authed(Method::GET, "/stats", &token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Invalid token");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            login_request(r#"{"username":"admin","password":"nope"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Unauthorized");

        let (status, _) = send(
            &h.app,
            login_request(r#"{"username":"mallory","password":"admin"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(h.tokens.is_empty());
    }

    #[tokio::test]
    async fn malformed_login_body() {
        let h = harness();
        let (status, body) = send(&h.app, login_request("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid request body");
    }

    #[tokio::test]
    async fn stats_without_token() {
        let h = harness();
        let request = Request::builder().uri("/stats").body(Body::empty()).unwrap();
        assert_eq!(
            send(&h.app, request).await,
            (StatusCode::UNAUTHORIZED, "Missing token".to_string())
        );

        let request = Request::builder()
            .uri("/stats")
            .header(AUTHORIZATION, "Basic YWRtaW46YWRtaW4=")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            send(&h.app, request).await,
            (StatusCode::UNAUTHORIZED, "Missing token".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let h = harness();
        let (status, body) = send(&h.app, authed(Method::GET, "/stats", "deadbeef")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Invalid token");
    }

    #[tokio::test]
    async fn expired_token_is_rejected_then_forgotten() {
        let h = harness();
        let token = log_in(&h.app).await;

        h.clock.advance(TimeDelta::seconds(TOKEN_TTL_SECS + 1));
        let (status, body) = send(&h.app, authed(Method::GET, "/stats", &token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Token expired");

        let (_, body) = send(&h.app, authed(Method::GET, "/stats", &token)).await;
        assert_eq!(body, "Invalid token");
    }

    /// Store whose reads never complete.
    struct StuckStore;

    #[async_trait::async_trait]
    impl AggregateStore for StuckStore {
        async fn update(&self, _: &str, _: &str, _: &str, _: bool) -> storage::Result<()> {
            Ok(())
        }

        async fn stats(&self) -> storage::Result<storage::StatsSnapshot> {
            std::future::pending().await
        }

        async fn validate_login(&self, _: &str, _: &str) -> bool {
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out() {
        let tokens = Arc::new(TokenCache::new());
        let token = tokens.issue("admin");
        let app = router(AppState {
            store: Arc::new(StuckStore),
            tokens,
        });

        let (status, _) = send(&app, authed(Method::GET, "/stats", token.value())).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn logout_requires_token() {
        let h = harness();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/logout")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Missing token");
    }
}

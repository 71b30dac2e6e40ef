//! HTTP layer: router, handlers and the bearer-token extractor

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, SET_COOKIE},
        request::Parts,
        HeaderValue, Method,
    },
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal::{self, unix::SignalKind};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::auth::{bearer_token, Claims, TokenVerifier};
use crate::config::Config;
use crate::error::ApiError;
use crate::search::{filter, validate};
use crate::worker::{ResultSet, SearchGateway};

/// Shared handler state
pub struct AppState {
    pub gateway: SearchGateway,
    pub tokens: TokenVerifier,
}

impl AppState {
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            gateway: SearchGateway::new(config.gateway.clone()),
            tokens: TokenVerifier::new(&config.jwt_secret),
        })
    }
}

/// Claims of an authenticated caller
pub struct AuthUser(pub Claims);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_token(header)?;
        let claims = state.tokens.verify(token)?;
        Ok(AuthUser(claims))
    }
}

pub fn build_router(state: Arc<AppState>, cors_origin: Option<&str>) -> Result<Router> {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/search", post(search_handler))
        .route("/api/query", post(search_handler))
        .route("/api/user/verify-token", get(verify_token_handler))
        .with_state(state);

    if let Some(origin) = cors_origin {
        let origin = origin
            .parse::<HeaderValue>()
            .with_context(|| format!("Invalid CORS_ORIGIN: {}", origin))?;
        let cors = CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .expose_headers([SET_COOKIE])
            .max_age(Duration::from_secs(60 * 60));
        app = app.layer(cors);
    }

    Ok(app)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "worker": state.gateway.config().command.program,
    }))
}

async fn verify_token_handler(AuthUser(claims): AuthUser) -> Json<Value> {
    Json(json!({ "success": true, "user": claims }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ResultSet>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::MalformedPayload(e.body_text()))?;
    let request = validate(&body)?;

    info!(
        "Search: user_id={}, query={:?}, platform={:?}",
        claims.user_id, request.query, request.platform
    );

    let results = state
        .gateway
        .invoke(&request.query)
        .await
        .map_err(|source| ApiError::Search {
            source,
            timeout_ms: state.gateway.config().timeout_ms(),
        })?;

    Ok(Json(filter(results, request.platform.as_deref())))
}

/// Bind and serve until Ctrl+C or SIGTERM
pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::new(&config);
    let app = build_router(state, config.cors_origin.as_deref())?;

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Server running on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DEFAULT_TOKEN_TTL;
    use crate::config::GatewayConfig;
    use crate::worker::WorkerCommand;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SECRET: &str = "test-secret";

    struct TestServer {
        addr: SocketAddr,
        _dir: TempDir,
    }

    async fn start(worker_script: &str, timeout: Duration) -> TestServer {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, worker_script).unwrap();

        let config = Config {
            port: 0,
            jwt_secret: SECRET.into(),
            cors_origin: None,
            gateway: GatewayConfig::new(
                WorkerCommand::new("/bin/sh").with_args([script.to_str().unwrap()]),
                timeout,
            ),
        };
        let app = build_router(AppState::new(&config), None).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer { addr, _dir: dir }
    }

    fn token() -> String {
        TokenVerifier::new(SECRET)
            .issue(1, "alice", "alice@example.com", DEFAULT_TOKEN_TTL)
            .unwrap()
    }

    async fn send(
        addr: SocketAddr,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: &str,
    ) -> (u16, Value) {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut req = format!(
            "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
            body.len()
        );
        if let Some(token) = token {
            req.push_str(&format!("Authorization: Bearer {token}\r\n"));
        }
        req.push_str("\r\n");
        req.push_str(body);
        stream.write_all(req.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        let status = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap();
        (status, serde_json::from_str(body).unwrap_or(Value::Null))
    }

    const TWO_PLATFORMS_WORKER: &str = r#"cat > /dev/null
printf '%s' '[{"platform":"LeetCode","problem_name":"Binary Search","problem_link":"https://x"},{"platform":"Codeforces","problem_name":"BS","problem_link":"https://y"}]'
"#;

    #[tokio::test]
    async fn test_search_filters_by_platform() {
        let server = start(TWO_PLATFORMS_WORKER, Duration::from_secs(10)).await;
        let (status, body) = send(
            server.addr,
            "POST",
            "/search",
            Some(&token()),
            r#"{"query":"binary search","filters":{"platform":"LeetCode"}}"#,
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(
            body,
            json!([{"platform":"LeetCode","problem_name":"Binary Search","problem_link":"https://x"}])
        );
    }

    #[tokio::test]
    async fn test_search_without_filter_returns_all() {
        let server = start(TWO_PLATFORMS_WORKER, Duration::from_secs(10)).await;
        let (status, body) = send(
            server.addr,
            "POST",
            "/api/query",
            Some(&token()),
            r#"{"query":"binary search","filters":{"platform":"all"}}"#,
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_requires_token() {
        let server = start(TWO_PLATFORMS_WORKER, Duration::from_secs(10)).await;

        let (status, body) =
            send(server.addr, "POST", "/search", None, r#"{"query":"dp"}"#).await;
        assert_eq!(status, 401);
        assert_eq!(body["message"], "Authorization token required");

        let forged = TokenVerifier::new("other")
            .issue(1, "eve", "e@x", DEFAULT_TOKEN_TTL)
            .unwrap();
        let (status, body) =
            send(server.addr, "POST", "/search", Some(&forged), r#"{"query":"dp"}"#).await;
        assert_eq!(status, 401);
        assert_eq!(body["message"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn test_search_rejects_non_string_query() {
        let server = start(TWO_PLATFORMS_WORKER, Duration::from_secs(10)).await;
        let (status, body) =
            send(server.addr, "POST", "/search", Some(&token()), r#"{"query":5}"#).await;

        assert_eq!(status, 400);
        assert_eq!(body["error"], "Invalid request");
        assert_eq!(body["details"], "Query parameter must be a string");
    }

    #[tokio::test]
    async fn test_search_rejects_malformed_json() {
        let server = start(TWO_PLATFORMS_WORKER, Duration::from_secs(10)).await;
        let (status, body) =
            send(server.addr, "POST", "/search", Some(&token()), r#"{"query":"#).await;

        assert_eq!(status, 400);
        assert_eq!(body["error"], "Invalid request");
    }

    #[tokio::test]
    async fn test_worker_failure_is_500_with_timeout() {
        let server = start(
            "cat > /dev/null\necho boom >&2\nexit 1\n",
            Duration::from_millis(4000),
        )
        .await;
        let (status, body) =
            send(server.addr, "POST", "/search", Some(&token()), r#"{"query":"dp"}"#).await;

        assert_eq!(status, 500);
        assert_eq!(body["error"], "Search processing failed");
        assert!(body["details"].as_str().unwrap().contains("boom"));
        assert_eq!(body["timeout"], 4000);
    }

    #[tokio::test]
    async fn test_worker_timeout_is_500() {
        let server = start("exec sleep 30\n", Duration::from_millis(300)).await;
        let (status, body) =
            send(server.addr, "POST", "/search", Some(&token()), r#"{"query":"dp"}"#).await;

        assert_eq!(status, 500);
        assert_eq!(body["details"], "Query timed out after 300 ms");
        assert_eq!(body["timeout"], 300);
    }

    #[tokio::test]
    async fn test_verify_token_and_health() {
        let server = start(TWO_PLATFORMS_WORKER, Duration::from_secs(10)).await;

        let (status, body) =
            send(server.addr, "GET", "/api/user/verify-token", Some(&token()), "").await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["username"], "alice");
        assert_eq!(body["user"]["userId"], 1);

        let (status, body) = send(server.addr, "GET", "/health", None, "").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "healthy");
    }

    #[test]
    fn test_invalid_cors_origin() {
        let config = Config {
            port: 0,
            jwt_secret: SECRET.into(),
            cors_origin: None,
            gateway: GatewayConfig::new(WorkerCommand::new("true"), Duration::from_secs(1)),
        };
        assert!(build_router(AppState::new(&config), Some("bad\norigin")).is_err());
        assert!(build_router(AppState::new(&config), Some("https://example.com")).is_ok());
    }
}

//! HTTP listener wiring the full request lifecycle:
//! authenticate → decode → borrow connection → execute → encode → release.
//!
//! Three logical request shapes, matching the hosted REST API:
//!
//! - `POST /` with `["SET", "foo", "bar"]` — single command, body-encoded
//! - any `/COMMAND/arg/...` path — single command, path-encoded
//! - `POST /pipeline` and `POST /multi-exec` — batches

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::auth::{AuthContext, Authenticator};
use crate::command::{self, BatchMode, CommandBatch};
use crate::config::GatewayConfig;
use crate::encode::{encode_response, ResponseBody};
use crate::error::GatewayError;
use crate::executor;
use crate::pool::{ConnectionPool, RedisDialer};

/// Shared per-request dependencies.
pub struct GatewayState {
    authenticator: Authenticator,
    pool: ConnectionPool,
    command_timeout: Duration,
}

impl GatewayState {
    fn authorize(&self, headers: &HeaderMap, query: Option<&str>) -> Result<(), GatewayError> {
        match self.authenticator.authenticate(headers, query) {
            AuthContext::Authenticated => Ok(()),
            AuthContext::Rejected => Err(GatewayError::Unauthorized),
        }
    }

    /// Borrow → execute → encode. Empty batches never touch the pool.
    async fn run_batch(&self, batch: &CommandBatch) -> Result<Response, GatewayError> {
        if batch.is_empty() {
            return Ok(ok_json(encode_response(batch.mode, &[])));
        }
        let mut guard = self.pool.acquire().await?;
        let results = executor::execute(&mut guard, batch, self.command_timeout).await?;
        Ok(ok_json(encode_response(batch.mode, &results)))
    }
}

fn ok_json(body: ResponseBody) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// The gateway's HTTP front end.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Builds a server dialing the configured upstream.
    ///
    /// # Errors
    /// `UpstreamUnavailable` when the upstream address cannot be parsed.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let dialer = RedisDialer::new(
            &config.redis_addr,
            config.redis_username.clone(),
            config.redis_password.clone(),
        )?;
        let pool = ConnectionPool::new(Box::new(dialer), config.pool_config());
        Ok(Self::with_pool(config, pool))
    }

    /// Builds a server on an existing pool. Tests use this with mock dialers.
    #[must_use]
    pub fn with_pool(config: GatewayConfig, pool: ConnectionPool) -> Self {
        let state = Arc::new(GatewayState {
            authenticator: Authenticator::new(config.token.clone()),
            pool,
            command_timeout: config.command_timeout(),
        });
        Self { config, state }
    }

    /// Axum router for the REST surface.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers(Any)
            .allow_origin(Any);

        Router::new()
            .route("/", post(handle_command))
            .route("/pipeline", post(handle_pipeline))
            .route("/multi-exec", post(handle_transaction))
            .fallback(handle_path_command)
            .with_state(Arc::clone(&self.state))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Binds the listener and serves until ctrl-c / SIGTERM.
    ///
    /// # Errors
    /// Propagates bind and serve failures.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.listen_addr.parse()?;

        info!("redis-rest-gateway listening on {addr}");
        info!("  POST /            - single command (JSON array body)");
        info!("  POST /pipeline    - ordered batch, per-command results");
        info!("  POST /multi-exec  - atomic MULTI/EXEC batch");
        info!("  /COMMAND/arg/...  - path-encoded single command");
        info!("upstream: {}", self.config.redis_addr);

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

#[instrument(skip_all)]
async fn handle_command(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, GatewayError> {
    state.authorize(&headers, query.as_deref())?;
    let batch = command::decode_single_body(&body)?;
    state.run_batch(&batch).await
}

#[instrument(skip_all)]
async fn handle_pipeline(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, GatewayError> {
    state.authorize(&headers, query.as_deref())?;
    let batch = command::decode_batch(&body, BatchMode::Pipeline)?;
    state.run_batch(&batch).await
}

#[instrument(skip_all)]
async fn handle_transaction(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, GatewayError> {
    state.authorize(&headers, query.as_deref())?;
    let batch = command::decode_batch(&body, BatchMode::Transaction)?;
    state.run_batch(&batch).await
}

/// Fallback: every other path is a path-encoded single command.
#[instrument(skip_all, fields(path = uri.path()))]
async fn handle_path_command(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, GatewayError> {
    state.authorize(&headers, uri.query())?;
    let batch = command::decode_single_path(uri.path())?;
    state.run_batch(&batch).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
}

//! Ready-made HTTP server around the upload pipeline.
//!
//! This module handles the axum server setup including:
//! - Router with the wildcard upload endpoint
//! - Middleware stack (request id, logging, timeout, tracing)
//! - Graceful shutdown handling
//!
//! The upload endpoint is mounted at `/fgw/upload/{*path}`; the wildcard
//! remainder (with its leading slash restored) is the key used for size-limit
//! lookup, so `/fgw/upload/archive/doc` resolves limits for route
//! `/archive/doc`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{Next, from_fn};
use axum::response::Response;
use axum::routing::post;
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{DEFAULT_MEMORY_LIMIT, UploadConfig};
use crate::trace::REQUEST_ID_HEADER;
use crate::upload::handle_request;

/// Server configuration, loaded from file and environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Log level / env-filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path to the YAML size-rule table
    #[serde(default = "default_size_rules_path")]
    pub size_rules_path: String,

    /// In-memory budget for parsed file content, in bytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
            size_rules_path: default_size_rules_path(),
            memory_limit: default_memory_limit(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional `upload-server` config file,
    /// overridden by `UPLOAD_SERVER__*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("upload-server").required(false))
            .add_source(config::Environment::with_prefix("UPLOAD_SERVER").separator("__"));

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_size_rules_path() -> String {
    "conf/sizeconfig.yml".to_string()
}

fn default_memory_limit() -> i64 {
    DEFAULT_MEMORY_LIMIT
}

/// Initialize structured JSON logging.
pub fn init_tracing(config: &ServerConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .json()
        .init();
}

/// Build the axum router with the upload endpoint and middleware.
///
/// axum's default 2 MiB body limit is disabled: body sizing is governed by
/// the resolved per-route ceiling inside the pipeline, which would otherwise
/// never see bodies past the framework cutoff.
pub fn build_router(upload: Arc<UploadConfig>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/fgw/upload/{*path}", post(upload_route))
        .fallback(not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.timeout(),
        ))
        .layer(from_fn(request_id))
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(upload)
}

async fn upload_route(
    State(upload): State<Arc<UploadConfig>>,
    Path(path): Path<String>,
    req: Request,
) -> Response {
    let key = route_key(&path);
    handle_request(&upload, Some(&key), req).await
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn route_key(wildcard: &str) -> String {
    format!("/{}", wildcard.trim_start_matches('/'))
}

/// Request ID injection middleware
///
/// Writes the id into the request headers too, so the pipeline's per-request
/// correlation id matches the one echoed to the client.
async fn request_id(mut request: Request, next: Next) -> Response {
    let request_id = crate::trace::trace_id(request.headers());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Logging middleware
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let request_id = request
        .extensions()
        .get::<String>()
        .cloned()
        .unwrap_or_default();

    tracing::info!(
        method = %method,
        uri = %uri,
        request_id = %request_id,
        "Request started"
    );

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        request_id = %request_id,
        "Request completed"
    );

    response
}

/// Start the upload HTTP server.
///
/// Binds to the configured address and serves until SIGTERM or Ctrl+C.
pub async fn start_server(config: ServerConfig, upload: Arc<UploadConfig>) -> anyhow::Result<()> {
    let app = build_router(upload, &config);
    let addr: SocketAddr = config.socket_addr()?;

    tracing::info!(
        "Starting upload server on {} (timeout: {}s, rules: {})",
        addr,
        config.timeout_secs,
        config.size_rules_path
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

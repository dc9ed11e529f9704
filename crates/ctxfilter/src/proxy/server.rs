//! HTTP proxy server
//!
//! Every path is relayed to the configured upstream. Chat routes get their
//! JSON body filtered on the way; OPTIONS preflights are answered locally.

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use url::Url;

use super::error::json_error;
use super::relay::forward_request;
use crate::audit::AuditSink;
use crate::config::Config;
use crate::error::{CtxFilterError, Result};

/// Shared application state for all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Read-only configuration
    pub config: Arc<Config>,
    /// HTTP client for upstream requests
    pub client: reqwest::Client,
    /// Parsed upstream base URL
    pub upstream: Url,
    /// Audit sink, when enabled
    pub audit: Option<AuditSink>,
}

impl AppState {
    pub fn new(config: Arc<Config>, audit: Option<AuditSink>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.proxy.timeout_secs))
            .build()
            .map_err(|e| CtxFilterError::Proxy(format!("Failed to create HTTP client: {e}")))?;

        let upstream = Url::parse(&config.proxy.upstream_url).map_err(|e| {
            CtxFilterError::Config(format!(
                "Invalid upstream URL '{}': {e}",
                config.proxy.upstream_url
            ))
        })?;

        Ok(Self {
            config,
            client,
            upstream,
            audit,
        })
    }
}

/// The main proxy server
pub struct ProxyServer {
    config: Arc<Config>,
}

impl ProxyServer {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Start the proxy server and listen until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let (audit, writer) = if self.config.audit.enabled {
            tracing::info!("Audit records: {}", self.config.audit.dir.display());
            let (sink, writer) = AuditSink::spawn(&self.config.audit);
            (Some(sink), Some(writer))
        } else {
            (None, None)
        };

        let state = Arc::new(AppState::new(self.config.clone(), audit)?);
        let app = create_router(state);

        let addr: SocketAddr = self
            .config
            .proxy
            .listen_addr
            .parse()
            .map_err(|e| CtxFilterError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting proxy server on {addr}");
        tracing::info!("Forwarding to {}", self.config.proxy.upstream_url);
        tracing::info!(
            "Small models with context filtering: {}",
            self.config.filter.small_models.join(", ")
        );
        if !self.config.filter.enabled {
            tracing::info!("System prompt filtering disabled");
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CtxFilterError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| CtxFilterError::Proxy(format!("Server error: {e}")))?;

        // The router owned the last sink handle; wait for queued records.
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                tracing::warn!("Audit writer ended abnormally: {e}");
            }
        }

        tracing::info!("Proxy server shut down gracefully");
        Ok(())
    }
}

/// Create the router: every path and method goes through `proxy_handler`
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response<Body> {
    let method = request.method().clone();
    match method {
        Method::OPTIONS => cors_preflight(),
        Method::GET | Method::POST => match forward_request(&state, request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        },
        other => json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            &format!("Method {other} is not supported"),
        ),
    }
}

/// Permissive CORS answer for browser preflights
fn cors_preflight() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

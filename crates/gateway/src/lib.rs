//! HTTP gateway for kbrelay.
//!
//! Exposes the orchestrator over three transports:
//!
//! - `POST /v1/chat`        : run to completion, JSON result (pieces optionally
//!   pushed to a connection)
//! - `POST /v1/chat/stream` : SSE stream of pieces
//! - `GET  /v1/ws`          : WebSocket; each `sendMessage` frame starts a run
//!   whose pieces are pushed back on the same socket
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    extract::State,
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use kbrelay_agent::Orchestrator;
use kbrelay_channels::{CallbackConfig, CallbackSink, ConnectionRegistry};
use kbrelay_core::channel::DeliverySink;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Orchestrator,
    pub connections: Arc<ConnectionRegistry>,

    /// When set, connection pieces are POSTed to an external connection
    /// manager instead of the local registry.
    pub callback: Option<CallbackConfig>,
    pub http_client: reqwest::Client,
    pub allowed_origins: Vec<String>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(orchestrator: Orchestrator, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            orchestrator,
            connections,
            callback: None,
            http_client: reqwest::Client::new(),
            allowed_origins: Vec::new(),
        }
    }

    /// The sink for pieces addressed to a connection id.
    pub fn connection_sink(&self, connection_id: &str) -> Box<dyn DeliverySink> {
        match &self.callback {
            Some(callback) => Box::new(CallbackSink::new(
                callback.clone(),
                connection_id,
                self.http_client.clone(),
            )),
            None => Box::new(self.connections.sink(connection_id)),
        }
    }
}

/// Build the full router.
///
/// Layers applied:
/// - CORS limited to the configured origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Wire everything from configuration and serve until shutdown.
pub async fn start(config: kbrelay_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let backend = kbrelay_providers::build_from_config(&config)?;
    let analytics = kbrelay_telemetry::build_from_config(&config.analytics);
    let orchestrator = kbrelay_agent::build_from_config(&config, backend, analytics.clone());

    let mut state = GatewayState::new(
        orchestrator,
        Arc::new(ConnectionRegistry::from_config(&config.delivery)),
    );
    state.callback = CallbackConfig::from_config(&config.delivery);
    state.allowed_origins = config.gateway.allowed_origins.clone();

    info!(
        addr = %addr,
        backend = %config.backend.base_url,
        analytics = %analytics.name(),
        callback = state.callback.is_some(),
        "Gateway starting"
    );

    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active_connections: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_connections: state.connections.active_connections().await,
    })
}

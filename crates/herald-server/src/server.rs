use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use herald_broker::Broker;
use herald_core::ChannelRegistry;
use herald_telemetry::StreamMetrics;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers;
use crate::shutdown::ShutdownCoordinator;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub registry: Arc<ChannelRegistry>,
    pub metrics: Arc<StreamMetrics>,
    pub config: Arc<ServerConfig>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        broker: Arc<dyn Broker>,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            broker,
            registry,
            metrics: Arc::new(StreamMetrics::new()),
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/notifications", get(handlers::stream_notifications))
        .route("/channels/{channel}/publish", post(handlers::publish))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    broker: Arc<dyn Broker>,
    registry: Arc<ChannelRegistry>,
) -> Result<ServerHandle, std::io::Error> {
    if let Err(err) = config.identity_header_name() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid identity header {:?}: {err}", config.identity_header),
        ));
    }
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);

    let state = AppState::new(config, broker, registry);
    let metrics = Arc::clone(&state.metrics);
    let shutdown = Arc::clone(&state.shutdown);
    let token = shutdown.token();
    let router = build_router(state);

    tracing::info!(addr = %local_addr, "herald server started");

    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "server terminated");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        port: local_addr.port(),
        metrics,
        shutdown,
        shutdown_timeout,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    pub metrics: Arc<StreamMetrics>,
    shutdown: Arc<ShutdownCoordinator>,
    shutdown_timeout: Duration,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting, close every open stream, then wait for the listener.
    pub async fn shutdown(self) {
        let drained = self
            .shutdown
            .graceful_shutdown(Some(self.shutdown_timeout))
            .await;
        if !drained {
            self.server.abort();
            return;
        }
        if tokio::time::timeout(self.shutdown_timeout, self.server)
            .await
            .is_err()
        {
            tracing::warn!("server did not stop within the shutdown timeout");
        }
        tracing::info!("herald server stopped");
    }
}

//! `SwitchboardServer`: axum HTTP + web-socket listener plus an optional raw
//! TCP listener, sharing one dispatcher and hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use switchboard_core::{EventHandler, Hub, Switchboard};
use switchboard_settings::{ServerSettings, SettingsError, SwitchboardSettings};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::tcp::serve_tcp;
use crate::upgrade::ws_handler;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dispatcher that runs accepted sessions.
    pub switchboard: Arc<Switchboard>,
    /// Hub every session joins.
    pub hub: Hub,
    /// Prometheus handle when `/metrics` is served.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The Switchboard server.
pub struct SwitchboardServer {
    settings: ServerSettings,
    switchboard: Arc<Switchboard>,
    hub: Hub,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl SwitchboardServer {
    /// Build the dispatcher and hub from `settings`.
    ///
    /// Must be called inside a Tokio runtime (the hub starts its workers).
    pub fn new(
        settings: &SwitchboardSettings,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, ServerError> {
        if !settings.server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "wsPath must start with '/': {:?}",
                settings.server.ws_path
            ))
            .into());
        }
        let hub = Hub::new(&settings.hub_config()?)?;
        let switchboard = Switchboard::new(settings.session_config()?, handler)?.with_hub(hub.clone());
        let timeout = Duration::from_millis(settings.server.shutdown_timeout_ms);
        Ok(Self {
            settings: settings.server.clone(),
            switchboard: Arc::new(switchboard),
            hub,
            shutdown: Arc::new(ShutdownCoordinator::with_timeout(timeout)),
            metrics: None,
            start_time: Instant::now(),
        })
    }

    /// Serve `/metrics` from `handle` (when enabled in settings).
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let metrics = self.metrics.clone().filter(|_| self.settings.metrics_enabled);
        let serve_metrics = metrics.is_some();
        let state = AppState {
            switchboard: Arc::clone(&self.switchboard),
            hub: self.hub.clone(),
            metrics,
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route(&self.settings.ws_path, get(ws_handler))
            .route("/health", get(health_handler));
        if serve_metrics {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the HTTP listener on `host:ws_port` and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener =
            TcpListener::bind((self.settings.host.as_str(), self.settings.ws_port)).await?;
        let addr = listener.local_addr()?;
        let service = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        info!(%addr, path = %self.settings.ws_path, "web-socket server listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, service)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "http server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Bind the raw TCP listener when `tcp_port` is configured.
    pub async fn listen_tcp(&self) -> Result<Option<(SocketAddr, JoinHandle<()>)>, ServerError> {
        let Some(port) = self.settings.tcp_port else {
            return Ok(None);
        };
        let listener = TcpListener::bind((self.settings.host.as_str(), port)).await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(serve_tcp(
            listener,
            Arc::clone(&self.switchboard),
            self.shutdown.token(),
        ));
        Ok(Some((addr, handle)))
    }

    /// Close every session and stop the listeners behind `handles`.
    pub async fn shutdown_gracefully(&self, handles: Vec<JoinHandle<()>>) {
        self.shutdown.graceful_shutdown(&self.hub, handles).await;
    }

    /// Dispatcher shared by both listeners.
    pub fn switchboard(&self) -> &Arc<Switchboard> {
        &self.switchboard
    }

    /// Hub every session joins.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Listener settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// Run a server from `settings` until Ctrl-C, then shut down gracefully.
///
/// Installs the global Prometheus recorder when metrics are enabled.
pub async fn run(
    settings: &SwitchboardSettings,
    handler: Arc<dyn EventHandler>,
) -> Result<(), ServerError> {
    let mut server = SwitchboardServer::new(settings, handler)?;
    if settings.server.metrics_enabled {
        server = server.with_metrics(crate::metrics::install_recorder()?);
    }

    let (_, http) = server.listen().await?;
    let mut handles = vec![http];
    if let Some((_, tcp)) = server.listen_tcp().await? {
        handles.push(tcp);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c, shutting down");
    }
    info!("shutdown signal received");
    server.shutdown_gracefully(handles).await;
    Ok(())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.switchboard.is_accepting(),
        state.switchboard.active_sessions(),
        state.hub.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

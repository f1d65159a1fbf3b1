//! Gateway daemon: builds the axum router, binds with port fallback, and
//! serves until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admission::AdmissionController;
use crate::config::AppConfig;
use crate::connection::{ConnectionManager, ConnectionRateLimiter};
use crate::execution::ExecutionDispatcher;
use crate::metrics::MetricsTicker;
use crate::registry::SessionRegistry;
use crate::router::EventRouter;

use super::routes::{
    create_session, delete_session, get_session, health, join_session, list_sessions,
    regenerate_key, runtimes, GatewayState,
};
use super::ws::ws_handler;

const MAX_PORT_ATTEMPTS: u16 = 10;

/// Build the shared application state. Split out from [`run`] so tests and
/// alternate binaries can assemble it without binding a real socket.
pub fn build_state(config: AppConfig) -> GatewayState {
    let registry = Arc::new(SessionRegistry::new());
    let admission = Arc::new(AdmissionController::new(registry.clone(), config.clone()));
    let connections = Arc::new(ConnectionManager::new(ConnectionRateLimiter::new(
        config.rate_limit.window_secs,
        config.rate_limit.max_connections,
    )));
    let execution = Arc::new(ExecutionDispatcher::new(config.clone()));
    let metrics = Arc::new(MetricsTicker::new());
    metrics.clone().spawn();

    let router = Arc::new(EventRouter::new(
        registry.clone(),
        admission.clone(),
        execution.clone(),
        metrics,
    ));

    GatewayState {
        config: Arc::new(config),
        registry,
        admission,
        connections,
        router,
        execution,
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/runtimes", get(runtimes))
        .route("/api/v1/ws", get(ws_handler))
        .route("/sessions/create", post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/regenerate-key", post(regenerate_key))
        .route("/sessions/{id}", delete(delete_session))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway: bind starting at `config.server.port`, stepping +1 up
/// to +9 on failure (§6). Blocks until the server shuts down or the
/// `shutdown` future resolves. Returns an error (exit code 1, per §6) if no
/// port in the probe range is available.
pub async fn run(config: AppConfig, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<(), String> {
    let bind_addr = config.server.bind_addr.clone();
    let start_port = config.server.port;
    let state = build_state(config);
    let app = build_router(state);

    let listener = bind_with_fallback(&bind_addr, start_port).await?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;
    info!(%addr, "sessionhub gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| format!("gateway error: {e}"))
}

async fn bind_with_fallback(bind_addr: &str, start_port: u16) -> Result<TcpListener, String> {
    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port + offset;
        let addr: SocketAddr = format!("{bind_addr}:{port}")
            .parse()
            .map_err(|e| format!("invalid bind address {bind_addr}:{port}: {e}"))?;
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < MAX_PORT_ATTEMPTS => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {start_port}-{}: {e}",
                    start_port + MAX_PORT_ATTEMPTS - 1
                ));
            }
        }
    }
    unreachable!()
}

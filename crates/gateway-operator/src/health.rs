//! Health check HTTP server for Kubernetes probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) endpoints.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default port for health check server.
pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Default bind address; kubelet probes target the pod IP.
pub const DEFAULT_HEALTH_BIND_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Shared state for health check endpoints.
#[derive(Debug, Default)]
pub struct HealthState {
    /// Whether the probe server is listening.
    started: AtomicBool,
    /// Whether the first event batch has been handled.
    synced: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the operator as started.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!("Health check: operator marked as started");
    }

    /// Mark the cluster view as synced; only the first call logs.
    pub fn mark_synced(&self) {
        if !self.synced.swap(true, Ordering::SeqCst) {
            info!("Health check: first event batch handled");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// Run the health check HTTP server until the token is cancelled.
///
/// The operator is marked as started only after the server successfully binds.
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
    token: CancellationToken,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;

    info!(address = %listener.local_addr()?, "Health check server listening");

    state.mark_started();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> StatusCode {
    debug!("Liveness probe: OK");
    StatusCode::OK
}

/// Readiness probe endpoint.
///
/// Returns 503 Service Unavailable until the server is bound and the first
/// event batch has been handled.
async fn readyz(State(state): State<Arc<HealthState>>) -> StatusCode {
    if !state.is_started() {
        debug!("Readiness probe: NOT READY (startup incomplete)");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    if !state.is_synced() {
        debug!("Readiness probe: NOT READY (first batch not handled)");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    debug!("Readiness probe: OK");
    StatusCode::OK
}

//! Session Coordinator
//!
//! Real-time presence fan-out and WebRTC signaling relay for browser
//! meetings, served over one HTTP listener:
//!
//! - `GET /api/ws/{meetingId}` - WebSocket join
//! - `/api/meetings/{id}/...` - participant REST endpoints
//! - `/health`, `/ready`, `/metrics` - operational endpoints
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Install the Prometheus metrics recorder
//! 4. Open the storage backend
//! 5. Start the hub, storage mirror and retention sweep
//! 6. Bind the listener (fail fast), then serve
//! 7. Mark ready and wait for a shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use session_coordinator::auth::JwtTokenValidator;
use session_coordinator::config::{Config, LogFormat};
use session_coordinator::observability::{init_metrics_recorder, HealthState};
use session_coordinator::routes::build_routes;
use session_coordinator::services::{Services, Stores};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound for each shutdown stage.
const SHUTDOWN_STAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so the log format can be honored; errors are
    // reported once tracing is up.
    let config = Config::from_env();
    let log_format = config
        .as_ref()
        .map_or(LogFormat::Text, |c| c.log_format);
    init_tracing(log_format);

    info!("Starting Session Coordinator");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        store_backend = ?config.store_backend,
        hub_channel_capacity = config.hub_channel_capacity,
        outbound_queue_capacity = config.outbound_queue_capacity,
        inactivity_timeout_seconds = config.inactivity_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let stores = Stores::from_config(&config).await.map_err(|e| {
        error!(error = %e, "Failed to open storage backend");
        e
    })?;

    let validator = Arc::new(JwtTokenValidator::new(&config.auth_token_secret));
    let root_token = CancellationToken::new();
    let bind_address = config.bind_address.clone();
    let services = Services::start(config, stores, validator, root_token.clone());
    info!("Hub, storage mirror and retention sweep started");

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let app = build_routes(
        Arc::clone(&services.state),
        Arc::clone(&health_state),
        prometheus_handle,
    );

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        format!("Failed to bind listener to {addr}: {e}")
    })?;
    info!(addr = %addr, "Listener bound successfully");

    let server_token = root_token.child_token();
    let server = tokio::spawn(async move {
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!(addr = %addr, "Session Coordinator running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Closing the hub first ends every WebSocket, which lets the server drain.
    services.shutdown(SHUTDOWN_STAGE_TIMEOUT).await;
    root_token.cancel();
    if tokio::time::timeout(SHUTDOWN_STAGE_TIMEOUT, server).await.is_err() {
        error!("HTTP server did not stop in time");
    }

    info!("Session Coordinator shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "session_coordinator=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

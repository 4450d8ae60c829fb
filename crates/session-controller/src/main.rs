//! Session Controller
//!
//! Session-orchestration and metered-billing service for Tollgate.
//!
//! # Servers
//!
//! - Wire protocol server for signaling and billing control
//!   (default: 0.0.0.0:7410, newline-delimited JSON over TCP)
//! - HTTP server for health endpoints and Prometheus metrics
//!   (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Construct the session registry and collaborator backends
//! 4. Initialize the actor system (`SessionSupervisorHandle`)
//! 5. Start the health HTTP server (liveness, readiness, metrics)
//! 6. Start the wire protocol server
//! 7. Wait for shutdown signal, then drain sessions gracefully

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use session_controller::actors::SessionSupervisorHandle;
use session_controller::config::Config;
use session_controller::observability::{health_router, CoreMetrics, HealthState};
use session_controller::payment::RecordingGateway;
use session_controller::registry::SessionRegistry;
use session_controller::server::run_wire_server;
use session_controller::store::InMemorySessionStore;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        sc_id = %config.sc_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_sessions = config.max_sessions,
        billing_interval_secs = config.billing_interval.as_secs(),
        reconnect_max_attempts = config.reconnect_max_attempts,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before anything records
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Collaborator backends. The in-memory store and recording gateway are
    // the development defaults; production deployments wire the platform's
    // persistence and payment services behind the same traits.
    let registry = Arc::new(SessionRegistry::new());
    let store = Arc::new(InMemorySessionStore::new());
    let gateway = Arc::new(RecordingGateway::new());
    let metrics = CoreMetrics::new();

    // Initialize actor system
    info!("Initializing actor system...");
    let supervisor = SessionSupervisorHandle::new(
        config.clone(),
        registry,
        store,
        gateway,
        Arc::clone(&metrics),
    );
    info!("Actor system initialized");

    let shutdown_token = supervisor.child_token();

    // Start health HTTP server (fail startup if it cannot bind)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // Bind the wire listener before declaring readiness to fail fast
    let wire_listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind wire server");
            format!("Failed to bind wire server to {}: {e}", config.bind_address)
        })?;
    info!(addr = %config.bind_address, "Wire server bound successfully");

    let wire_token = shutdown_token.child_token();
    let wire_supervisor = supervisor.clone();
    tokio::spawn(async move {
        run_wire_server(wire_listener, wire_supervisor, wire_token).await;
    });

    health_state.set_ready();
    info!("Session Controller running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop accepting traffic immediately, then drain sessions. Every open
    // session settles with reason `cancelled` on the way down.
    health_state.set_not_ready();
    shutdown_token.cancel();

    if let Err(e) = supervisor.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    // Give child tasks time to finish settling
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Session Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable
/// because without signal handlers the service cannot shut down cleanly.
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

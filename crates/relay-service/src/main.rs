//! Signal Relay
//!
//! Clustered WebSocket signaling relay for WebRTC session negotiation.
//!
//! # Endpoints
//!
//! - `GET /connect`, `GET /ws` - WebSocket signaling
//! - `GET /health` - liveness (always `200 OK`)
//! - `GET /ready` - readiness
//! - `GET /metrics` - Prometheus metrics
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Connect to the Redis bus if clustering is enabled (standalone on failure)
//! 5. Build registry, manager and, when clustered, the bus bridge
//! 6. Bind the listener (fail fast), mark ready, serve
//! 7. Wait for shutdown signal, then cancel every session and the bridge

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use relay_service::bus::{RedisRelayBus, RelayPublisher, RelaySubscriber};
use relay_service::cluster::ClusterBridge;
use relay_service::config::Config;
use relay_service::manager::RoomManager;
use relay_service::observability::{init_metrics_recorder, HealthState};
use relay_service::registry::RoomRegistry;
use relay_service::routes::{app_router, SignalingState};
use relay_service::session::SessionConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to sessions and the bridge to wind down after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signal Relay");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address(),
        clustering_enabled = config.clustering_enabled,
        bus_configured = config.redis_url.is_some(),
        mailbox_capacity = config.mailbox_capacity,
        keepalive_interval_seconds = config.keepalive_interval_seconds,
        "Configuration loaded successfully"
    );

    // Must happen before any metric is recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let bus = connect_bus(&config).await;

    let registry = Arc::new(RoomRegistry::new());
    let manager = match &bus {
        Some(bus) => {
            let publisher: Arc<dyn RelayPublisher> = Arc::new(bus.clone());
            Arc::new(RoomManager::with_relay(Arc::clone(&registry), publisher))
        }
        None => Arc::new(RoomManager::new(Arc::clone(&registry))),
    };

    // Resubscribes on its own if the bus drops the subscription
    let bridge_task = bus.as_ref().map(|bus| {
        let subscriber: Arc<dyn RelaySubscriber> = Arc::new(bus.clone());
        ClusterBridge::new(Arc::clone(&manager)).spawn(subscriber, shutdown_token.child_token())
    });

    let state = SignalingState {
        manager,
        session_config: Arc::new(SessionConfig::from_config(&config)),
        shutdown_token: shutdown_token.clone(),
    };

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = app_router(state, Arc::clone(&health_state))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address().parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address(), "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    // Bind listener BEFORE serving to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        format!("Failed to bind {addr}: {e}")
    })?;

    health_state.set_ready();
    info!(addr = %addr, "Signal Relay listening");

    let server_token = shutdown_token.clone();
    let server_health = Arc::clone(&health_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            // Stop receiving traffic, then end every session and the bridge
            server_health.set_not_ready();
            server_token.cancel();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Server failed");
            e
        })?;

    if let Some(task) = bridge_task {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("Cluster bridge did not stop in time");
        }
    }

    info!("Signal Relay shutdown complete");
    Ok(())
}

/// Connect to the bus when clustering is enabled and a URL is configured.
///
/// An unreachable bus is not fatal: the relay runs standalone and drops
/// messages for clients it does not host.
async fn connect_bus(config: &Config) -> Option<RedisRelayBus> {
    if !config.wants_bus() {
        if config.clustering_enabled {
            warn!("No Redis configured, running standalone");
        } else {
            info!("Clustering disabled, running standalone");
        }
        return None;
    }

    let redis_url = config.redis_url.as_ref()?;

    info!("Connecting to Redis bus...");
    match RedisRelayBus::connect(redis_url).await {
        Ok(bus) => {
            info!("Redis bus connected, clustering enabled");
            Some(bus)
        }
        Err(e) => {
            warn!(error = %e, "Redis bus unavailable, running standalone");
            None
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// cannot shut down gracefully.
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

//! Auth Gateway
//!
//! Entry point for the authenticating gateway in front of the streaming relay.

use auth_gateway::config::Config;
use auth_gateway::handlers::{relay_router, RelayState};
use auth_gateway::observability::metrics;
use auth_gateway::routes::{self, GatewayState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Auth Gateway");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        jwks_uri = %config.jwks_uri,
        jwt_issuer = ?config.jwt_issuer,
        jwt_audience = ?config.jwt_audience,
        jwks_requests_per_minute = config.jwks_requests_per_minute.get(),
        jwks_cache_enabled = config.jwks_cache_enabled,
        jwks_cache_ttl_seconds = ?config.jwks_cache_ttl.map(|ttl| ttl.as_secs()),
        jwks_fetch_timeout_seconds = config.jwks_fetch_timeout.as_secs(),
        jwt_clock_skew_seconds = config.jwt_clock_skew.as_secs(),
        drain_seconds = config.drain_period.as_secs(),
        "Configuration loaded successfully"
    );

    // Metrics are optional; without an exporter the facade records nothing.
    if let Some(metrics_address) = &config.metrics_bind_address {
        let metrics_addr: SocketAddr = metrics_address.parse().map_err(|e| {
            error!("Invalid metrics bind address: {}", e);
            e
        })?;
        metrics::init_metrics_exporter(metrics_addr).map_err(|e| {
            error!(error = %e, "Failed to initialize metrics exporter");
            e
        })?;
        info!("Prometheus metrics served on {}", metrics_addr);
    }

    // Build gateway state (key cache, validator, CORS policy)
    let state = Arc::new(GatewayState::from_config(&config).map_err(|e| {
        error!("Failed to build gateway state: {}", e);
        e
    })?);

    // The relay is the default downstream
    let app = routes::build_routes(state, relay_router(Arc::new(RelayState::new())));

    // Parse bind address
    let addr: SocketAddr = config.bind_address().parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Auth Gateway listening on {}", addr);

    // Start server with graceful shutdown support
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.drain_period))
    .await?;

    info!("Auth Gateway shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
async fn shutdown_signal(drain: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if !drain.is_zero() {
        warn!("Draining connections for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (GATEWAY_DRAIN_SECONDS=0)");
    }
}

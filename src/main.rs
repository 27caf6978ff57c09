//! Proxy Pool - Entry Point
//!
//! Fetches and validates the configured sources, then keeps reporting pool
//! health until shut down.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxy_pool::config::LogConfig;
use proxy_pool::{Config, ProxyFilter, ProxyManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting Proxy Pool");
    if config.sources.urls.is_empty() {
        warn!("PROXY_POOL_SOURCES is empty, relying on the cache only");
    }

    let manager = ProxyManager::new(config).context("failed to build proxy manager")?;
    info!("Using rotation strategy: {}", manager.strategy_name());

    // Log roughly every tenth of the batch
    let last_logged = AtomicUsize::new(0);
    let on_progress = |completed: usize, total: usize| {
        let step = (total / 10).max(1);
        if completed == total || completed >= last_logged.load(Ordering::Relaxed) + step {
            last_logged.store(completed, Ordering::Relaxed);
            info!(completed, total, "validation progress");
        }
    };

    match manager
        .get_validated_proxies(&ProxyFilter::default(), Some(&on_progress))
        .await
    {
        Ok(validated) => info!("{} proxies validated", validated.len()),
        Err(e) => error!("Initial validation failed: {}", e),
    }

    manager.start_health_monitor();
    let mut snapshots = manager.health_monitor().subscribe();
    let reporter = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let Some(snapshot) = snapshots.borrow_and_update().clone() else {
                continue;
            };
            info!(
                total = snapshot.total_proxies,
                healthy = snapshot.healthy_proxies,
                percentage = snapshot.health_percentage,
                status = %snapshot.health_status,
                "pool health"
            );
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received");

    manager.dispose().await;
    reporter.abort();

    let analytics = manager.get_analytics();
    info!(
        requests = analytics.total_requests,
        validations = analytics.validations,
        "Proxy Pool stopped"
    );
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxy_pool={}", log.level).into());

    if log.format.eq_ignore_ascii_case("pretty") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! Macrodash - market-data dashboard backend
//!
//! Serves macro indicators, the Treasury yield curve and Fed rate odds from a
//! disk-backed cache that refreshes itself in the background.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use macrodash::api;
use macrodash::cli::{Cli, ServerConfig};
use macrodash::data::{MarketDataFetcher, UpstreamSource};
use macrodash::refresh::{CacheService, SweepHandle, WarmUp};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is normal
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "macrodash=info,tower_http=info".into()),
        )
        .init();

    let config = match ServerConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    let source = UpstreamSource::new(config.fred_api_key.clone(), config.fetch_timeout)?;
    if !source.has_fred() {
        warn!("FRED_API_KEY not set, FRED-backed series will be unavailable");
    }
    let fetcher =
        MarketDataFetcher::new(source).with_fedwatch_snapshot(config.fedwatch_snapshot.clone());

    info!(cache_dir = %config.cache_dir.display(), "Using cache directory");
    let service = CacheService::new(config.cache_dir.clone(), config.policy, Arc::new(fetcher));

    if config.warm_up {
        info!("Warming up caches...");
        for (key, outcome) in service.warm_up().await {
            match outcome {
                WarmUp::Loaded => info!(key = %key, "Loaded from disk"),
                WarmUp::Fetched => info!(key = %key, "Fetched fresh data"),
                WarmUp::Failed(e) => warn!(
                    key = %key,
                    error = %e,
                    "Warm-up failed, requests will get 503 until a refresh succeeds"
                ),
            }
        }
    }

    let sweep = SweepHandle::spawn(service.clone(), config.sweep.clone());

    let app = api::app(service, config.static_dir.clone());
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.shutdown().await;
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

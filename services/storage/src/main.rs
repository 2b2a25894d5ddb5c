use anyhow::{Context, Result};
use reflections_storage::api::{start_api_server, ApiSettings, AppState};
use reflections_storage::{Config, S3ObjectStore, UnsplashClient};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting Reflections storage service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let store = Arc::new(S3ObjectStore::new(&config.s3).await);

    let unsplash = Arc::new(
        UnsplashClient::new(&config.unsplash).context("Failed to build Unsplash client")?,
    );
    if !unsplash.is_configured() {
        warn!("Unsplash access key not set, image search will fail");
    }

    let state = AppState {
        store,
        unsplash,
        settings: Arc::new(ApiSettings::from_config(&config)),
    };

    if let Err(e) = start_api_server(state, &config.api, shutdown_signal()).await {
        error!(error = %format!("{:#}", e), "API server error");
        return Err(e);
    }

    info!("Storage service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down storage service");
}

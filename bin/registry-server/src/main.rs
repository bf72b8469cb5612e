use anyhow::{Context, Result};
use clap::Parser;
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::tokio::TokioIo;
use registry_core::{EndpointCoordinator, FileEndpointStore, FsCredentialStore, ProxyRegistry};
use registry_proxy::TlsRouteFactory;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod config;
mod metrics;

use api::ApiState;
use config::{Cli, LogFormat, ServerConfig};
use metrics::ServerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(&cli)?;
    init_logging(&config)?;

    info!("Starting registry-server...");

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let store = FileEndpointStore::open(config.records_path()).await?;
    info!("Endpoint store opened at {}", config.records_path().display());

    let credentials = FsCredentialStore::new(&config.data_dir);
    let proxies = ProxyRegistry::new(Arc::new(TlsRouteFactory::new()));

    let coordinator = Arc::new(
        EndpointCoordinator::new(Arc::new(store), Arc::new(credentials), Arc::new(proxies))
            .with_management_enabled(config.management_enabled),
    );
    if !config.management_enabled {
        warn!("Endpoint management disabled: endpoints are managed externally");
    }

    let summary = coordinator.restore_routes().await?;
    if summary.failed > 0 {
        warn!("{} endpoint route(s) could not be restored", summary.failed);
    }

    let metrics = ServerMetrics::new()?;
    let state = Arc::new(ApiState::new(coordinator, metrics));

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("HTTP server listening on {}", config.listen_addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| api::handle_request(state.clone(), req));

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(config: &ServerConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("Invalid log level: {}", config.log_level))?,
    };

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .try_init()?,
        LogFormat::Plain => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()?,
    }
    Ok(())
}

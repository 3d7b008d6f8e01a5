//! Offline Cache - offline-first caching proxy for a static site

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;
use offline_api::{AppState, create_router};
use offline_core::{CacheManager, OfflineWorker, spawn_cleanup_task};
use offline_proxy::HttpFetcher;
use offline_storage::{CacheStorage, FileSubmissionStore, LocalStorage, MemoryStorage};

/// Offline Cache - offline-first caching proxy for a static site
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "OFFLINE_CACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "OFFLINE_CACHE_PORT")]
    port: Option<u16>,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    write_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration; command line overrides are checked like the file
    let mut config = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    if let Some(path) = &args.write_config {
        config.save(path)?;
        return Ok(());
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Offline Cache v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage backend
    let storage: Arc<dyn CacheStorage> = match config.storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory cache storage");
            Arc::new(MemoryStorage::new())
        }
        _ => {
            tokio::fs::create_dir_all(&config.storage.local.path).await?;
            info!("Using local cache storage at {}", config.storage.local.path);
            Arc::new(LocalStorage::new(&config.storage.local.path).await?)
        }
    };

    // Pending form submissions survive restarts
    let submissions = Arc::new(
        FileSubmissionStore::new(&config.sync.queue_path)
            .await
            .with_context(|| {
                format!("Failed to open submission queue {}", config.sync.queue_path)
            })?,
    );

    // Initialize network client
    let fetcher = Arc::new(HttpFetcher::new(config.fetcher_config())?);

    // Initialize cache manager and worker
    let worker_config = config.worker_config()?;
    let cache = Arc::new(CacheManager::new(
        storage,
        worker_config.partitions(),
        config.cache_config(),
    ));
    let worker = Arc::new(OfflineWorker::new(
        worker_config,
        cache.clone(),
        fetcher,
        submissions,
    ));

    // A failed install leaves the worker redundant; requests then go straight to the network
    match worker.install().await {
        Ok(report) => info!(
            "Worker {} installed ({} assets cached)",
            worker.version(),
            report.cached.len()
        ),
        Err(e) => error!("Worker installation failed, serving from network only: {}", e),
    }

    // Start background cleanup task
    let cleanup = spawn_cleanup_task(cache);

    // Install the Prometheus recorder
    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(Arc::new(handle)),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    // Create router
    let state = AppState::new(worker.clone());
    let app = create_router(state, metrics_handle).layer(TraceLayer::new_for_http());

    let addr: SocketAddr =
        format!("{}:{}", config.server.bind_address, config.server.port).parse()?;

    info!("Listening on {}", addr);
    info!("Origin: {}", config.worker.origin);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    worker.retire().await;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

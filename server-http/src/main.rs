use anyhow::Context;
use axum::ServiceExt;
use axum::extract::Request;
use server_http::{AppState, build_app, init_tracing};
use shared::config::Config;
use storage_engine::{CacheServiceRegistry, spawn_sweeper};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if exists) before the filter reads RUST_LOG
    let dotenv = dotenvy::dotenv();

    init_tracing();

    info!("Starting Tessera HTTP Server...");

    match dotenv {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    if let Err(e) = run().await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    // Construct the backend now so a bad configuration stops startup
    let registry = CacheServiceRegistry::initialize(config.cache.clone())
        .context("failed to initialize cache backend")?;
    let cache = registry.cache_service()?;

    let sweeper = config
        .cache
        .sweep_interval
        .map(|period| spawn_sweeper(cache.clone(), period));

    let state = AppState::new(cache, config.session.clone());
    let app = build_app(state);

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    info!("HTTP Server listening on http://{}", address);

    // Graceful shutdown handler
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}

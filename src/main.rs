use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use freeway::catalog::{self, Catalog};
use freeway::client::OpenRouterClient;
use freeway::config::Config;
use freeway::failures::FailureStore;
use freeway::filter::ModelFilter;
use freeway::limiter::GlobalRateLimiter;
use freeway::permanent::PermanentFailureTracker;
use freeway::{AppContext, AppState, build_router};

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let api_key = config.api_key()?;
    let free_mode = config.free_mode();
    let tool_use_only = config.tool_use_only();

    let provider = OpenRouterClient::new(api_key);

    let catalog = if free_mode {
        let catalog = catalog::ensure_catalog(
            &provider,
            &config.free_models_cache,
            config.cache_ttl(),
            tool_use_only,
        )
        .await
        .context("failed to load free models")?;
        if catalog.is_empty() {
            warn!("free model catalog is empty, every chat request will fail");
        }
        info!(
            models = catalog.len(),
            cache_file = %config.free_models_cache.display(),
            db_file = %config.failure_db.display(),
            "Free mode enabled"
        );
        catalog
    } else {
        Catalog::default()
    };

    let filter = ModelFilter::load(&config.model_filter_path).with_context(|| {
        format!(
            "error loading model filter from {}",
            config.model_filter_path.display()
        )
    })?;
    if filter.is_empty() {
        debug!(
            path = %config.model_filter_path.display(),
            "model filter not found, all models will be available"
        );
    } else {
        info!(
            patterns = ?filter.patterns().collect::<Vec<_>>(),
            path = %config.model_filter_path.display(),
            "model filter loaded"
        );
    }

    let failures = FailureStore::open(
        &config.failure_db,
        config.failure_cooldown(),
        config.ratelimit_cooldown(),
    )
    .context("failed to init failure store")?;

    let ctx = AppContext {
        free_mode,
        tool_use_only,
        catalog,
        filter,
        failures,
        permanent: PermanentFailureTracker::new(),
        limiter: GlobalRateLimiter::new(),
    };
    let router = build_router(AppState::new(provider, ctx));

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, free_mode, "Starting server");

    // Stop accepting on SIGINT/SIGTERM, then give in-flight requests up to
    // SHUTDOWN_GRACE before exiting anyway.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining connections");
        let _ = shutdown_tx.send(true);
    });

    let mut graceful_rx = shutdown_rx.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = graceful_rx.changed().await;
    });

    let mut deadline_rx = shutdown_rx;
    tokio::select! {
        result = server => result.context("server error")?,
        _ = async {
            let _ = deadline_rx.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => warn!("graceful shutdown timed out, aborting in-flight requests"),
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
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

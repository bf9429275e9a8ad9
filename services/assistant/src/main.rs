// assistant: Calendar voice assistant entry point.

use assistant::fetch::FetchOrchestrator;
use assistant::refresh::RefreshScheduler;
use assistant::state::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Config decides the default level; RUST_LOG still wins when set.
    let config = match assistant::config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        sources = config.sources.len(),
        bind = %config.bind_addr(),
        production = config.production,
        "assistant starting"
    );
    if config.test_time.is_some() {
        info!("TEST_TIME set, clock is pinned");
    }

    let bind_addr = config.bind_addr();
    let state = AppState::new(config);

    // Background refresh loop.
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(FetchOrchestrator::new(
        &state.config,
        Arc::clone(&state.http_client),
        Arc::clone(&state.health),
    ));
    let scheduler = RefreshScheduler::new(state.clone(), fetcher, cancel.clone());
    let scheduler_task = tokio::spawn(scheduler.run());

    // HTTP surface.
    let router = assistant::handlers::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "assistant listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Stop the refresher after the HTTP surface drains.
    cancel.cancel();
    let _ = scheduler_task.await;
    info!("assistant shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}

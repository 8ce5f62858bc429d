mod app_state;
mod backend;
mod config;
mod core;
mod realtime;
mod web;

use std::sync::Arc;

use app_state::AppState;
use backend::{http::HttpBackend, traits::RealtimeBackend};
use config::AppConfig;
use realtime::{
    allocator::{AllocatorSettings, StreamAllocator},
    driver::{WallHandle, WallTimers, spawn_wall},
};
use tracing::{error, info, warn};
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env()?;
    let backend: Arc<dyn RealtimeBackend> =
        Arc::new(HttpBackend::new(&config.backend_url, config.backend_timeout)?);

    if std::env::args().any(|arg| arg == "--list-cameras") {
        let cameras = backend.list_cameras().await?;
        println!("{}", serde_json::to_string_pretty(&cameras)?);
        return Ok(());
    }

    tokio::fs::create_dir_all("logs").await?;
    let file_appender = rolling::daily("logs", "realtime-wall.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::INFO)
        .init();

    let allocator = StreamAllocator::new(
        AllocatorSettings {
            max_slots: config.max_streams,
            refresh_after: config.stream_refresh,
        },
        rand::random::<u64>(),
    );
    let (wall, driver) = spawn_wall(backend.clone(), allocator, WallTimers::from(&config));

    let state = Arc::new(AppState::new(config.clone(), wall.clone(), backend));
    let app = web::routes::build_router(state);

    info!(
        "{} listening on {} (backend {}, max {} streams)",
        config.app_name, config.bind_addr, config.backend_url, config.max_streams
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(wall))
        .await?;

    if let Err(err) = driver.await {
        error!("wall driver task failed: {err}");
    }
    info!("{} stopped", config.app_name);

    Ok(())
}

/// Waits for Ctrl+C, then tears the wall down so open stream proxies close
/// before the server drains.
async fn shutdown_signal(wall: WallHandle) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }

    info!("shutdown requested, tearing down wall");
    if let Err(err) = wall.shutdown().await {
        warn!("wall teardown failed: {err:#}");
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::{Level, info};

use mq::{IngestQueue, QueueConfig};
use server::cache::CacheLayer;
use server::config::AppConfig;
use server::consumers;
use server::database;
use server::diskmon::DiskMonitor;
use server::lifecycle;
use server::partitions;
use server::state::AppState;
use server::volumes::VolumeManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = database::init_db(&config.database.url)
        .await
        .context("Failed to initialize database")?;

    let queue = Arc::new(
        IngestQueue::connect(&QueueConfig {
            url: config.queue.url.clone(),
            pool_size: config.queue.pool_size,
        })
        .await
        .context("Failed to connect to ingest queue")?,
    );

    let volumes = Arc::new(
        VolumeManager::load(db.clone(), config.storage.default_template.clone())
            .await
            .context("Failed to load volume registry")?,
    );
    let caches = Arc::new(
        CacheLayer::from_config(&config.cache)
            .await
            .context("Failed to initialize cache layer")?,
    );
    let disk = Arc::new(DiskMonitor::new(config.storage.disk_threshold_mb));

    let state = AppState {
        db,
        config: config.clone(),
        queue,
        volumes: volumes.clone(),
        caches,
        disk: disk.clone(),
    };

    // Background machinery: disk watchdog, indexing consumers, lifecycle
    // scheduler, partition maintenance.
    disk.refresh(&volumes).await;
    let _disk_task = disk.spawn(volumes.clone());
    let _consumer_pool = consumers::spawn_consumers(state.clone());
    let _lifecycle_tasks = lifecycle::spawn_scheduler(state.clone());
    let _partition_task = partitions::spawn_partition_job(state.clone());
    if let Err(e) = partitions::ensure_partitions(&state).await {
        tracing::warn!(error = ?e, "Initial partition maintenance failed");
    }

    let origins: Vec<HeaderValue> = config
        .server
        .cors
        .allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-tenant-id"),
        ])
        .max_age(Duration::from_secs(config.server.cors.max_age));

    let app = server::build_router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Bad server.host/server.port")?;
    info!("SPAX archive listening at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

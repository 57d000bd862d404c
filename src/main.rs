use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rendition_worker::app;
use rendition_worker::config::settings::AppConfig;
use rendition_worker::infrastructure::db::pool::connect_to_db;
use rendition_worker::infrastructure::db::PgDocumentStore;
use rendition_worker::infrastructure::media::FfmpegEngine;
use rendition_worker::infrastructure::queue::RabbitMqService;
use rendition_worker::infrastructure::redis::{RedisLease, RedisService};
use rendition_worker::infrastructure::storage::StorageService;
use rendition_worker::state::AppState;
use rendition_worker::workers::transcoder::start_transcoder_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting rendition worker...");

    let config = AppConfig::new().context("Invalid configuration")?;
    info!(
        queue = %config.queue_name,
        storage = ?config.storage_backend,
        keys = config.keys.len(),
        "Configuration loaded"
    );

    let db = connect_to_db(&config.database_url, &config.db_pool)
        .await
        .context("Failed to connect to PostgreSQL")?;
    PgDocumentStore::ensure_schema(&db)
        .await
        .context("Failed to prepare document schema")?;

    let redis = RedisService::new(&config.redis_url, &config.redis_namespace)
        .await
        .context("Failed to connect to Redis")?;
    let queue = RabbitMqService::new(&config.amqp_url).await?;

    let storage = match &config.s3 {
        Some(s3) => Some(StorageService::new(&s3.endpoint, &s3.bucket, &s3.access_key, &s3.secret_key).await),
        None => None,
    };

    let engine = Arc::new(FfmpegEngine::discover()?);
    let lock = Arc::new(RedisLease::new(redis.clone()));

    let port = config.server_port;
    let state = AppState::new(config, db, redis, queue, storage, engine, lock);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Health endpoint on http://0.0.0.0:{}/health", port);
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let served = axum::serve(listener, app::create_app())
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("Health server error: {}", e);
        }
    });

    start_transcoder_worker(state, shutdown).await
}

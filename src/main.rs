use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use encode_sweep::app;
use encode_sweep::config::settings::AppConfig;
use encode_sweep::infrastructure::db::pool::{connect_to_db, run_migrations};
use encode_sweep::infrastructure::queue::RabbitMqQueue;
use encode_sweep::infrastructure::storage::S3Storage;
use encode_sweep::modules::jobs::repository::PgJobStore;
use encode_sweep::modules::summary::repository::PgSummaryStore;
use encode_sweep::state::AppState;
use encode_sweep::workers::ffmpeg::{FfmpegEncoder, FfmpegSsimScorer};
use encode_sweep::workers::reaper::StaleJobReaper;
use encode_sweep::workers::spawn_workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("invalid configuration")?;

    let pool = connect_to_db(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    run_migrations(&pool).await.context("failed to run migrations")?;

    let storage = S3Storage::new(
        &config.minio_url,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    );

    let prefetch = u16::try_from(config.worker_count).unwrap_or(u16::MAX);
    let queue = RabbitMqQueue::new(&config.amqp_url, &config.queue_name, prefetch).await?;

    let state = AppState::new(
        config.clone(),
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(PgSummaryStore::new(pool)),
        Arc::new(storage),
        Arc::new(queue),
    );

    let shutdown = CancellationToken::new();

    let mut tasks = spawn_workers(
        &state,
        Arc::new(FfmpegEncoder::new(&config.ffmpeg_bin, &config.encoder_preset)),
        Arc::new(FfmpegSsimScorer::new(&config.ffmpeg_bin)),
        config.worker_count,
        &shutdown,
    );
    info!("🎥 Spawned {} transcode workers", tasks.len());

    tasks.push(tokio::spawn(StaleJobReaper::new(&state).run(shutdown.clone())));

    let app = app::create_app(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server running on http://{}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task ended abnormally: {}", e);
        }
    }

    info!("Server stopped");
    Ok(())
}

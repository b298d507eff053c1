//! Monolith Binary - single-server deployment
//!
//! Wires up:
//! - Storage backend (local filesystem or S3-compatible)
//! - ffmpeg transcoder and the worker pool
//! - Federation to the configured followers over HTTP
//! - HTTP API and static file serving

use encore::adapters::ffmpeg::FfmpegTranscoder;
use encore::adapters::http::{router, AppState, HttpTransport};
use encore::adapters::storage_from_config;
use encore::config::{Config, StorageConfig};
use encore::Pipeline;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "monolith stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Config::from_env()?;

    // 1. Adapters
    let storage = storage_from_config(&config).await?;
    let transcoder = Arc::new(FfmpegTranscoder::new());

    // 2. Pipeline (starts the workers)
    let pipeline = Pipeline::new(
        config.server_id.clone(),
        storage,
        transcoder,
        config.pipeline_options(),
    );
    info!(workers = config.workers, server = %config.server_id, "transcoding workers started");

    // 3. Federation
    let client = HttpTransport::default_client()?;
    for follower in &config.followers {
        pipeline.add_follower(
            follower.id.clone(),
            Arc::new(HttpTransport::new(client.clone(), &follower.url)),
        );
    }

    // 4. HTTP Layer
    let static_dir = match &config.storage {
        StorageConfig::Local { dir } => Some(dir.clone()),
        StorageConfig::ObjectStorage { .. } => None,
    };
    let app = router(
        AppState {
            pipeline,
            upload_dir: config.upload_dir.clone(),
        },
        static_dir,
    );

    // 5. Start Server
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %config.bind_addr(), public_url = %config.public_url, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

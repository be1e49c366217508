//! Upload a local video and enqueue a frame extraction job for it.
//!
//! Usage: submit <video-path> [job-id]

use std::path::PathBuf;

use frame_extract_worker::{
    config::AppConfig,
    models::job::JobData,
    scheduler::resolve_queue,
    services::{
        queue,
        storage::{ObjectStore, S3Store},
    },
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        eprintln!("usage: submit <video-path> [job-id]");
        std::process::exit(2);
    };
    let job_id = args.next().unwrap_or_else(|| Uuid::new_v4().to_string());

    let config = AppConfig::from_env()?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or("video path has no file name")?
        .to_string();
    let data = tokio::fs::read(&path).await?;
    let key = format!("videos/{}_{}", Uuid::new_v4(), name);

    let store = S3Store::new(&config.aws())?;
    store
        .upload(&config.s3_bucket, &key, &data, "application/octet-stream")
        .await?;
    tracing::info!(bucket = %config.s3_bucket, key = %key, bytes = data.len(), "Video uploaded");

    let gateway = queue::connect(&config).await?;
    let address = resolve_queue(
        gateway.as_ref(),
        &config.queue_name,
        config.queue_url.as_deref(),
    )
    .await?;

    let job = JobData {
        job_id: job_id.clone(),
        source_key: key,
        original_name: name,
        job_type: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string(),
        requester: None,
    };
    let message_id = gateway
        .send(&address, &serde_json::to_string(&job)?)
        .await?;

    tracing::info!(job_id = %job_id, message_id = ?message_id, queue_url = %address, "Job submitted");
    Ok(())
}

use std::sync::Arc;

use frame_extract_worker::{
    app_state::AppState,
    config::AppConfig,
    pipeline::Processor,
    routes::{self, health::HealthState},
    scheduler::{resolve_queue, PollLoop},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        queue = %config.queue_name,
        bucket = %config.s3_bucket,
        interval_ms = config.poll_interval_ms,
        "Initializing frame extraction worker"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("frame_jobs_received_total", "Queue messages picked up for processing");
    metrics::describe_counter!("frame_jobs_completed_total", "Jobs whose archive was uploaded");
    metrics::describe_counter!("frame_jobs_failed_total", "Jobs that failed, labelled by failure kind");
    metrics::describe_histogram!(
        "frame_job_processing_seconds",
        "Time from message pickup to acknowledgement"
    );
    metrics::describe_counter!("frames_extracted_total", "Frames written by ffmpeg");
    metrics::describe_counter!("queue_receive_errors_total", "Failed receive calls against the queue");

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize services");

    let queue = match resolve_queue(
        state.queue.as_ref(),
        &config.queue_name,
        config.queue_url.as_deref(),
    )
    .await
    {
        Ok(queue) => queue,
        Err(e) => {
            tracing::error!(queue = %config.queue_name, error = %e, "Failed to resolve queue, exiting");
            std::process::exit(1);
        }
    };

    if !config.bind_addr.is_empty() {
        let app = routes::router(HealthState::new(state.clone(), queue.clone()), prometheus_handle);
        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .expect("Failed to bind to address");
        tracing::info!("Health server listening on {}", config.bind_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Health server stopped");
            }
        });
    }

    let processor = Arc::new(Processor::new(state, config.pipeline()));
    let runs = PollLoop::new(processor, queue, config.poll_interval())
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!(runs, "Worker stopped");
}

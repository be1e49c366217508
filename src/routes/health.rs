use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::queue::QueueAddress;

/// State behind the operational endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub app: AppState,
    pub queue: QueueAddress,
    pub started_at: Instant,
}

impl HealthState {
    pub fn new(app: AppState, queue: QueueAddress) -> Self {
        Self {
            app,
            queue,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub queue: ComponentHealth,
    pub ffmpeg: ComponentHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(started: Instant, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                status: "up".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => Self {
                status: "down".to_string(),
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

/// GET /health: queue reachability and ffmpeg availability.
pub async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let queue_start = Instant::now();
    let queue = ComponentHealth::from_result(
        queue_start,
        state.app.queue.health_check(&state.queue).await,
    );

    let ffmpeg_start = Instant::now();
    let ffmpeg = ComponentHealth::from_result(ffmpeg_start, state.app.extractor.probe().await);

    let healthy = queue.is_up() && ffmpeg.is_up();
    if !healthy {
        tracing::warn!(queue = %queue.status, ffmpeg = %ffmpeg.status, "Health check failed");
    }

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { queue, ffmpeg },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// GET /ping
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        message: "pong".to_string(),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub description: String,
    pub queue_url: String,
    pub uptime_secs: u64,
    pub endpoints: Vec<&'static str>,
}

pub const ENDPOINTS: [&str; 4] = ["/health", "/ping", "/info", "/metrics"];

/// GET /info
pub async fn info(State(state): State<HealthState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: env!("CARGO_PKG_DESCRIPTION").to_string(),
        queue_url: state.queue.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        endpoints: ENDPOINTS.to_vec(),
    })
}

#[derive(Debug, Serialize)]
pub struct NotFoundResponse {
    pub error: String,
    pub path: String,
    pub endpoints: Vec<&'static str>,
}

pub async fn not_found(uri: Uri) -> (StatusCode, Json<NotFoundResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            error: "Not found".to_string(),
            path: uri.path().to_string(),
            endpoints: ENDPOINTS.to_vec(),
        }),
    )
}

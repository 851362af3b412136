use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::job::JobStatus;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
    pub queue: QueueHealth,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub ffmpeg: ComponentHealth,
    pub storage: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct QueueHealth {
    pub depth: usize,
    pub active_workers: usize,
    pub concurrency: usize,
    pub jobs_total: usize,
    pub jobs_failed: usize,
}

/// GET /health: tool availability, storage configuration and queue load.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let tools_ok = (state.tools_available)();
    let ffmpeg = ComponentHealth {
        status: if tools_ok { "ok" } else { "error" }.to_string(),
        latency_ms: tools_ok.then(|| start.elapsed().as_millis() as u64),
    };

    // Unconfigured storage only disables the upload endpoint.
    let storage = ComponentHealth {
        status: if state.storage.is_some() { "ok" } else { "disabled" }.to_string(),
        latency_ms: None,
    };

    let queue = QueueHealth {
        depth: state.queue.queue_depth(),
        active_workers: state.queue.active_workers(),
        concurrency: state.queue.concurrency(),
        jobs_total: state.store.len(),
        jobs_failed: state.store.count_by_status(JobStatus::Failed),
    };

    let status_code = if tools_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if tools_ok { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { ffmpeg, storage },
        queue,
    };

    (status_code, Json(response))
}

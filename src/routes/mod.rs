pub mod batch;
pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Routes of the job service. Metrics and middleware are added by the binary.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/compress-video", post(jobs::submit_video))
        .route("/api/job-status/{id}", get(jobs::job_status))
        .route("/api/download-video/{id}", get(jobs::download_video))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/api/download-zip", post(batch::download_zip))
        .route("/api/upload-storage", post(batch::upload_storage))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

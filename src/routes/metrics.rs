use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Register descriptions for the job and batch metrics.
pub fn describe_metrics() {
    metrics::describe_counter!("media_jobs_submitted_total", "Total media jobs submitted");
    metrics::describe_counter!("media_jobs_completed_total", "Total media jobs completed");
    metrics::describe_counter!("media_jobs_failed_total", "Total media jobs that failed");
    metrics::describe_counter!(
        "batch_items_succeeded_total",
        "Batch items written to a sink"
    );
    metrics::describe_counter!("batch_items_failed_total", "Batch items that failed");
    metrics::describe_gauge!("media_jobs_queue_depth", "Jobs waiting for a worker");
    metrics::describe_gauge!("media_jobs_active", "Jobs currently being processed");
    metrics::describe_histogram!(
        "media_job_processing_seconds",
        "Time spent processing a media job"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

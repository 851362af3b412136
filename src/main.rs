use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use media_jobs::app_state::AppState;
use media_jobs::config::AppConfig;
use media_jobs::models::media::VideoOptions;
use media_jobs::routes;
use media_jobs::services::{
    batch::BatchProcessor,
    image_pipeline::{http_client, ImageAdapter, Watermark},
    queue::JobQueue,
    storage::R2Client,
    store::JobStore,
    video::VideoAdapter,
};

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

    tracing::info!("Initializing media-jobs server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // Video adapter and job queue
    let video = Arc::new(VideoAdapter::new(
        &config.ffmpeg_path,
        &config.ffprobe_path,
        &config.output_dir,
    ));
    if !video.tools_available() {
        tracing::warn!(
            ffmpeg = %config.ffmpeg_path.display(),
            ffprobe = %config.ffprobe_path.display(),
            "ffmpeg/ffprobe not found; video jobs will fail"
        );
    }
    let store = Arc::new(JobStore::new());
    let queue = JobQueue::<VideoOptions>::start(store, video.clone(), config.worker_concurrency);

    // Image pipeline
    let http = http_client(config.fetch_timeout()).expect("Failed to build HTTP client");
    let watermark = match &config.watermark_source {
        Some(source) => {
            match Watermark::load(source, &http, config.watermark_opacity, config.watermark_scale)
                .await
            {
                Ok(mark) => {
                    tracing::info!(source = %source, "Loaded watermark");
                    Some(mark)
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Watermark unavailable; continuing without it");
                    None
                }
            }
        }
        None => None,
    };
    let images = ImageAdapter::new(http, config.image_max_width, config.image_quality, watermark);
    let batch = BatchProcessor::new(Arc::new(images), config.batch_concurrency);

    // Optional object storage sink
    let storage = config.storage().map(|s| {
        tracing::info!(bucket = s.bucket, "Initializing R2 storage client");
        R2Client::new(s.bucket, s.endpoint, s.access_key, s.secret_key)
            .expect("Failed to initialize R2 client")
    });

    let state = AppState::new(queue, batch, storage, &config.upload_dir, move || {
        video.tools_available()
    });
    let queue = Arc::clone(&state.queue);

    let cors = match &config.allowed_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .expect("ALLOWED_ORIGIN is not a valid header value"),
            )
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([
                HeaderName::from_static(routes::jobs::ORIGINAL_NAME_HEADER),
                HeaderName::from_static(routes::batch::SUCCEEDED_HEADER),
                HeaderName::from_static(routes::batch::FAILED_HEADER),
            ]),
        None => CorsLayer::permissive(),
    };

    let app = routes::router(state, config.max_upload_bytes)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    queue.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

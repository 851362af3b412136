use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::StorageUploadResponse;
use crate::models::media::{BatchRequest, ImageOptions, StorageUploadRequest};
use crate::routes::error::ApiError;
use crate::services::archive::{ZipSink, ARCHIVE_DISPOSITION};
use crate::services::storage::StorageSink;

pub const SUCCEEDED_HEADER: &str = "x-batch-succeeded";
pub const FAILED_HEADER: &str = "x-batch-failed";

/// POST /api/download-zip: Process remote images into a ZIP archive.
pub async fn download_zip(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;

    let options = ImageOptions {
        watermark: request.watermark,
    };
    let mut sink = ZipSink::new();
    let report = state
        .batch
        .run_batch(&request.images, &options, &mut sink)
        .await?;
    let archive = sink.finish()?;

    tracing::info!(
        entries = report.succeeded_count,
        failed = report.failed_count(),
        size_bytes = archive.len(),
        "Archive built"
    );

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
        (
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static(ARCHIVE_DISPOSITION),
        ),
        (HeaderName::from_static(SUCCEEDED_HEADER), HeaderValue::from(report.succeeded_count)),
        (HeaderName::from_static(FAILED_HEADER), HeaderValue::from(report.failed_count())),
    ];

    Ok((headers, archive).into_response())
}

/// POST /api/upload-storage: Process remote images and upload them to object storage.
pub async fn upload_storage(
    State(state): State<AppState>,
    Json(request): Json<StorageUploadRequest>,
) -> Result<Json<StorageUploadResponse>, ApiError> {
    let client = state.storage.clone().ok_or(ApiError::StorageUnavailable)?;
    request.validate()?;

    let options = ImageOptions {
        watermark: request.watermark,
    };
    let mut sink = StorageSink::new(client, request.prefix.as_str());
    let report = state
        .batch
        .run_batch(&request.images, &options, &mut sink)
        .await?;

    Ok(Json(StorageUploadResponse {
        success: true,
        count: report.succeeded_count,
        failed_sources: report.failed_sources,
    }))
}

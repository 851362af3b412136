use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{CancelResponse, SubmitResponse};
use crate::models::job::Job;
use crate::models::media::VideoOptions;
use crate::routes::error::ApiError;
use crate::services::queue::CancelOutcome;
use crate::services::status::ResultBody;
use crate::services::transform::JobInput;

pub const ORIGINAL_NAME_HEADER: &str = "x-original-name";

/// POST /api/compress-video: Upload a video and queue it for compression.
///
/// Fields: `video` (file), optional `targetMB` and `width`.
pub async fn submit_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut upload = None;
    let mut options = VideoOptions::default();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video") => {
                let original_name = field.file_name().map(str::to_string);

                tokio::fs::create_dir_all(&state.upload_dir).await?;
                let temp = tempfile::Builder::new()
                    .prefix("upload_")
                    .tempfile_in(&state.upload_dir)?;
                let (file, path) = temp.into_parts();

                let mut file = tokio::fs::File::from_std(file);
                let mut written = 0u64;
                while let Some(chunk) = field.chunk().await? {
                    written += chunk.len() as u64;
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;

                if written == 0 {
                    return Err(ApiError::Validation("Uploaded video is empty".to_string()));
                }
                tracing::debug!(bytes = written, name = ?original_name, "Received upload");
                upload = Some((path, original_name));
            }
            Some("targetMB") => options.target_mb = parse_field(&field.text().await?, "targetMB")?,
            Some("width") => options.width = parse_field(&field.text().await?, "width")?,
            _ => {}
        }
    }

    let (path, original_name) =
        upload.ok_or_else(|| ApiError::Validation("No video file uploaded".to_string()))?;
    options.validate()?;

    let job_id = state
        .queue
        .submit(JobInput::Upload { path, original_name }, options)?;

    Ok(Json(SubmitResponse { job_id }))
}

/// Blank form values count as absent.
fn parse_field<T: std::str::FromStr>(value: &str, name: &str) -> Result<Option<T>, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ApiError::Validation(format!("Invalid {}: {}", name, value)))
}

/// GET /api/job-status/{id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.status.get_status(job_id)?))
}

/// GET /api/download-video/{id}: Stream the compressed video.
pub async fn download_video(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let result = state.status.fetch_result(job_id).await?;

    let original = result
        .original_name
        .unwrap_or_else(|| format!("{}.{}", result.job_id, result.artifact.extension));
    let original = header_safe(&original);
    let disposition = format!("attachment; filename=\"compressed_{}\"", original);

    let (body, len) = match result.body {
        ResultBody::File { file, len } => (Body::from_stream(ReaderStream::new(file)), len),
        ResultBody::Memory(bytes) => {
            let len = bytes.len() as u64;
            (Body::from(bytes), len)
        }
    };

    let headers = [
        (header::CONTENT_TYPE, header_value(&result.artifact.content_type)),
        (header::CONTENT_LENGTH, HeaderValue::from(len)),
        (header::CONTENT_DISPOSITION, header_value(&disposition)),
        (HeaderName::from_static(ORIGINAL_NAME_HEADER), header_value(&original)),
    ];

    Ok((headers, body).into_response())
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let outcome = state.queue.cancel(job_id)?;
    let job = state.status.get_status(job_id)?;

    let message = match outcome {
        CancelOutcome::Dequeued => "Job removed from the queue",
        CancelOutcome::Signalled => "Cancellation requested",
        CancelOutcome::AlreadyFinished => "Job already finished",
    };

    Ok(Json(CancelResponse {
        job_id,
        status: job.status,
        message: message.to_string(),
    }))
}

/// Strip characters that cannot appear inside a quoted header parameter.
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("download"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field::<f64>("50", "targetMB").unwrap(), Some(50.0));
        assert_eq!(parse_field::<u32>(" 1280 ", "width").unwrap(), Some(1280));
        assert_eq!(parse_field::<u32>("", "width").unwrap(), None);
        assert!(matches!(
            parse_field::<u32>("wide", "width"),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_header_safe() {
        assert_eq!(header_safe("holiday \"final\".mov"), "holiday _final_.mov");
        assert_eq!(header_safe("clip\r\n.mp4"), "clip__.mp4");
        assert_eq!(header_safe("plain.mp4"), "plain.mp4");
    }
}

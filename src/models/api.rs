use serde::{Deserialize, Serialize};

use crate::models::job::{JobId, JobStatus};
use crate::models::media::BatchFailure;

/// Response after submitting a video for compression.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Response after a cancellation request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

/// Response after uploading a batch to object storage.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUploadResponse {
    pub success: bool,
    pub count: usize,
    pub failed_sources: Vec<BatchFailure>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

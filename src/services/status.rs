use std::sync::Arc;

use bytes::Bytes;

use crate::models::job::{Artifact, ArtifactData, Job, JobId, JobStatus};
use crate::services::store::JobStore;

/// Body of a completed job's artifact.
pub enum ResultBody {
    File { file: tokio::fs::File, len: u64 },
    Memory(Bytes),
}

/// A completed job's artifact, opened for reading.
pub struct ResultStream {
    pub job_id: JobId,
    pub original_name: Option<String>,
    pub artifact: Artifact,
    pub body: ResultBody,
}

/// Read-only view over the job store for pollers and downloaders.
pub struct StatusService {
    store: Arc<JobStore>,
}

impl StatusService {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// Latest state of a job. Failures are reported in the record, not here.
    pub fn get_status(&self, job_id: JobId) -> Result<Job, StatusError> {
        self.store.get(job_id).ok_or(StatusError::NotFound(job_id))
    }

    /// Open the artifact of a completed job.
    ///
    /// The backing file may have been removed by retention cleanup after
    /// completion; that surfaces as `ArtifactMissing`.
    pub async fn fetch_result(&self, job_id: JobId) -> Result<ResultStream, StatusError> {
        let job = self.get_status(job_id)?;

        let artifact = match (job.status, job.result) {
            (JobStatus::Completed, Some(artifact)) => artifact,
            (status, _) => return Err(StatusError::NotReady { job_id, status }),
        };

        let body = match &artifact.data {
            ArtifactData::Memory(bytes) => ResultBody::Memory(bytes.clone()),
            ArtifactData::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        StatusError::ArtifactMissing(job_id)
                    } else {
                        StatusError::Io(e)
                    }
                })?;
                let len = file.metadata().await?.len();
                ResultBody::File { file, len }
            }
        };

        Ok(ResultStream {
            job_id,
            original_name: job.original_name,
            artifact,
            body,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id} is not ready (status: {status})")]
    NotReady { job_id: JobId, status: JobStatus },

    #[error("Artifact for job {0} no longer exists")]
    ArtifactMissing(JobId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

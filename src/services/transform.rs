//! Uniform contract over the opaque media engines.
//!
//! An adapter receives the job input and options, may report progress zero
//! or more times, and finally resolves to exactly one [`Artifact`] or one
//! [`TransformError`].

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Artifact, JobId};
use crate::services::store::JobStore;

/// Source data of a job. Owned by the queue entry until the worker drops it.
#[derive(Debug)]
pub enum JobInput {
    /// Uploaded file in temporary storage; deleted from disk on drop.
    Upload {
        path: TempPath,
        original_name: Option<String>,
    },
    /// File owned by someone else; left in place.
    Path(PathBuf),
    /// Remote source fetched by the adapter.
    Url(String),
    Bytes(Bytes),
}

impl JobInput {
    /// Short description stored on the job record.
    pub fn describe(&self) -> String {
        match self {
            JobInput::Upload { original_name: Some(name), .. } => name.clone(),
            JobInput::Upload { path, .. } => path.display().to_string(),
            JobInput::Path(path) => path.display().to_string(),
            JobInput::Url(url) => url.clone(),
            JobInput::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }

    pub fn original_name(&self) -> Option<String> {
        match self {
            JobInput::Upload { original_name, .. } => original_name.clone(),
            JobInput::Path(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    /// Byte size of the input, when it can be known without fetching it.
    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            JobInput::Bytes(bytes) => Some(bytes.len() as u64),
            JobInput::Url(_) => None,
            _ => self
                .local_path()
                .and_then(|path| std::fs::metadata(path).ok())
                .map(|meta| meta.len()),
        }
    }

    /// Path on the local filesystem, if the input lives there.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            JobInput::Upload { path, .. } => Some(&**path),
            JobInput::Path(path) => Some(path.as_path()),
            _ => None,
        }
    }
}

/// Progress and cancellation handle passed into an adapter run.
#[derive(Clone)]
pub struct Progress {
    target: Option<(Arc<JobStore>, JobId)>,
    cancel: CancellationToken,
}

impl Progress {
    pub fn for_job(store: Arc<JobStore>, job_id: JobId, cancel: CancellationToken) -> Self {
        Self {
            target: Some((store, job_id)),
            cancel,
        }
    }

    /// Handle for runs that are not tracked as jobs (batch items).
    pub fn detached() -> Self {
        Self {
            target: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.target.as_ref().map(|(_, id)| *id)
    }

    /// Report a percentage. Out-of-range values are clamped by the store.
    pub fn report(&self, percent: f64) {
        if let Some((store, id)) = &self.target {
            tracing::debug!(job_id = %id, percent, "Progress");
            store.update(*id, |job| job.record_progress(percent));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A long-running media operation behind a uniform interface.
#[async_trait]
pub trait TransformAdapter: Send + Sync {
    type Options: Send + Sync;

    fn name(&self) -> &'static str;

    async fn run(
        &self,
        input: &JobInput,
        options: &Self::Options,
        progress: &Progress,
    ) -> Result<Artifact, TransformError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Failed to fetch source: {0}")]
    Fetch(String),

    #[error("Failed to decode input: {0}")]
    Decode(String),

    #[error("Failed to encode output: {0}")]
    Encode(String),

    #[error("Failed to probe input: {0}")]
    Probe(String),

    #[error("{0} not found on PATH")]
    ToolNotFound(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Transform panicked: {0}")]
    Panicked(String),
}

/// Text of a caught panic payload, for recording a panicked run as a failure.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{Job, JobStatus};

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_detached_progress_is_silent() {
        let progress = Progress::detached();
        progress.report(50.0);
        assert!(progress.job_id().is_none());
        assert!(!progress.is_cancelled());
    }

    #[test]
    fn test_progress_updates_store() {
        let store = Arc::new(JobStore::new());
        let mut job = Job::new("in.mp4", None);
        job.start();
        let id = job.id;
        store.create(job);

        let progress = Progress::for_job(store.clone(), id, CancellationToken::new());
        progress.report(250.0);

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_input_description() {
        let input = JobInput::Url("https://example.com/a.png".to_string());
        assert_eq!(input.describe(), "https://example.com/a.png");
        assert!(input.local_path().is_none());

        let input = JobInput::Path(PathBuf::from("/tmp/movie.mov"));
        assert_eq!(input.original_name().as_deref(), Some("movie.mov"));
        assert!(input.local_path().is_some());
    }

    #[test]
    fn test_input_size() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"twelve bytes").unwrap();
        let input = JobInput::Upload {
            path: file.into_temp_path(),
            original_name: None,
        };
        assert_eq!(input.size_bytes(), Some(12));

        assert_eq!(JobInput::Bytes(Bytes::from_static(b"abc")).size_bytes(), Some(3));
        assert_eq!(JobInput::Url("https://example.com/a.png".into()).size_bytes(), None);
        assert_eq!(JobInput::Path(PathBuf::from("/nonexistent/clip.mov")).size_bytes(), None);
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use crate::models::media::VideoOptions;
use crate::services::{
    batch::BatchProcessor, queue::JobQueue, status::StatusService, storage::R2Client,
    store::JobStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub queue: Arc<JobQueue<VideoOptions>>,
    pub status: Arc<StatusService>,
    pub batch: Arc<BatchProcessor>,
    /// Absent when object storage is not configured.
    pub storage: Option<Arc<R2Client>>,
    pub upload_dir: PathBuf,
    /// Reports whether the transcode tools resolve, for health checks.
    pub tools_available: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl AppState {
    pub fn new(
        queue: JobQueue<VideoOptions>,
        batch: BatchProcessor,
        storage: Option<R2Client>,
        upload_dir: impl Into<PathBuf>,
        tools_available: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        let store = Arc::clone(queue.store());
        Self {
            status: Arc::new(StatusService::new(Arc::clone(&store))),
            store,
            queue: Arc::new(queue),
            batch: Arc::new(batch),
            storage: storage.map(Arc::new),
            upload_dir: upload_dir.into(),
            tools_available: Arc::new(tools_available),
        }
    }
}

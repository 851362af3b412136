//! Best-effort batch processing over the image adapter.
//!
//! Every source goes through the adapter on its own; a failed item is
//! recorded in the report and the batch moves on. Only a sink failure
//! aborts the run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;

use crate::models::job::Artifact;
use crate::models::media::{BatchFailure, BatchReport, ImageOptions};
use crate::services::storage::StorageError;
use crate::services::transform::{
    panic_message, JobInput, Progress, TransformAdapter, TransformError,
};

/// Destination for the artifacts a batch produces.
#[async_trait]
pub trait ArtifactSink: Send {
    async fn put(&mut self, name: &str, artifact: &Artifact) -> Result<(), SinkError>;
}

/// Name an artifact after its 1-based position in the submitted list.
pub fn artifact_name(index: usize, extension: &str) -> String {
    format!("image_{}.{}", index, extension)
}

/// One source of a running batch.
struct BatchItem {
    index: usize,
    source: String,
}

enum ItemOutcome {
    Succeeded(Artifact),
    Failed(String),
}

impl BatchItem {
    async fn run(
        self,
        adapter: &dyn TransformAdapter<Options = ImageOptions>,
        options: &ImageOptions,
    ) -> (Self, ItemOutcome) {
        let input = JobInput::Url(self.source.clone());
        let progress = Progress::detached();

        let result = AssertUnwindSafe(adapter.run(&input, options, &progress))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TransformError::Panicked(panic_message(panic.as_ref()))));

        let outcome = match result {
            Ok(artifact) => ItemOutcome::Succeeded(artifact),
            Err(e) => ItemOutcome::Failed(e.to_string()),
        };
        (self, outcome)
    }
}

pub struct BatchProcessor {
    adapter: Arc<dyn TransformAdapter<Options = ImageOptions>>,
    concurrency: usize,
}

impl BatchProcessor {
    /// `concurrency` bounds in-flight items; output order always follows input order.
    pub fn new(adapter: Arc<dyn TransformAdapter<Options = ImageOptions>>, concurrency: usize) -> Self {
        Self {
            adapter,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run_batch(
        &self,
        sources: &[String],
        options: &ImageOptions,
        sink: &mut dyn ArtifactSink,
    ) -> Result<BatchReport, BatchError> {
        let adapter = self.adapter.as_ref();
        // Owned up front; a lazy iterator here makes the future fail the
        // higher-ranked `Send` bound of axum handlers.
        let items: Vec<BatchItem> = sources
            .iter()
            .enumerate()
            .map(|(i, source)| BatchItem {
                index: i + 1,
                source: source.clone(),
            })
            .collect();

        let mut results = stream::iter(items)
            .map(|item| item.run(adapter, options))
            .buffered(self.concurrency);

        let mut report = BatchReport::default();

        while let Some((item, outcome)) = results.next().await {
            match outcome {
                ItemOutcome::Succeeded(artifact) => {
                    let name = artifact_name(item.index, &artifact.extension);
                    sink.put(&name, &artifact).await?;
                    report.succeeded_count += 1;
                    metrics::counter!("batch_items_succeeded_total").increment(1);
                    tracing::debug!(index = item.index, name = %name, "Batch item stored");
                }
                ItemOutcome::Failed(reason) => {
                    metrics::counter!("batch_items_failed_total").increment(1);
                    tracing::warn!(
                        index = item.index,
                        source = %item.source,
                        error = %reason,
                        "Batch item failed"
                    );
                    report.failed_sources.push(BatchFailure {
                        index: item.index,
                        source: item.source,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded_count,
            failed = report.failed_count(),
            "Batch finished"
        );

        Ok(report)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Archive write failed: {0}")]
    Archive(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batch sink failed: {0}")]
    Sink(#[from] SinkError),
}

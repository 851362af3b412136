use garde::Validate;
use serde::{Deserialize, Serialize};

/// Options for a video compression job.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VideoOptions {
    /// Target output size in megabytes (MiB). Falls back to constant quality when absent.
    #[serde(rename = "targetMB")]
    #[garde(range(min = 0.1, max = 100_000.0))]
    pub target_mb: Option<f64>,

    /// Target output width; applied only when smaller than the source width.
    #[garde(range(min = 16, max = 8192))]
    pub width: Option<u32>,
}

/// Options for the image pipeline.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ImageOptions {
    pub watermark: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self { watermark: true }
    }
}

fn default_true() -> bool {
    true
}

/// Request to process a list of remote images into a ZIP archive.
#[derive(Debug, Deserialize, Validate)]
pub struct BatchRequest {
    #[garde(length(min = 1, max = 500), inner(length(min = 1, max = 4096)))]
    pub images: Vec<String>,

    #[serde(default = "default_true")]
    #[garde(skip)]
    pub watermark: bool,
}

/// Request to process a list of remote images and upload them to object storage.
#[derive(Debug, Deserialize, Validate)]
pub struct StorageUploadRequest {
    #[garde(length(min = 1, max = 500), inner(length(min = 1, max = 4096)))]
    pub images: Vec<String>,

    /// Key prefix ("folder") the artifacts are written under.
    #[garde(length(min = 1, max = 256))]
    pub prefix: String,

    #[serde(default = "default_true")]
    #[garde(skip)]
    pub watermark: bool,
}

/// One source that could not be turned into an artifact.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchFailure {
    /// 1-based position in the submitted list.
    pub index: usize,
    pub source: String,
    pub reason: String,
}

/// Outcome of a best-effort batch run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub succeeded_count: usize,
    pub failed_sources: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.failed_sources.len()
    }
}

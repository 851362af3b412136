use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Identifier of a submitted job. Generated with v4 UUIDs, never reused.
pub type JobId = Uuid;

/// Status of a media job in the in-process queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` are terminal: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Where the bytes of an artifact live.
#[derive(Debug, Clone)]
pub enum ArtifactData {
    File(PathBuf),
    Memory(Bytes),
}

/// Output of a transform: the data plus the metadata reported to pollers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(skip)]
    pub data: ArtifactData,
    pub size_bytes: u64,
    pub content_type: String,
    pub extension: String,
}

impl Artifact {
    pub fn file(path: PathBuf, size_bytes: u64, content_type: &str, extension: &str) -> Self {
        Self {
            data: ArtifactData::File(path),
            size_bytes,
            content_type: content_type.to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn memory(bytes: Bytes, content_type: &str, extension: &str) -> Self {
        Self {
            size_bytes: bytes.len() as u64,
            data: ArtifactData::Memory(bytes),
            content_type: content_type.to_string(),
            extension: extension.to_string(),
        }
    }

    /// Load the whole artifact into memory.
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        match &self.data {
            ArtifactData::Memory(bytes) => Ok(bytes.clone()),
            ArtifactData::File(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

/// One unit of long-running transform work.
///
/// Exactly one of `result` / `error` is set, and only once `status` is
/// terminal. All mutation goes through the transition methods below, which
/// refuse to leave a terminal state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    /// Human-readable description of the input (path, URL or upload name).
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    /// Size of the submitted input, when it is known up front.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(input: impl Into<String>, original_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            progress: 0,
            input: input.into(),
            original_name,
            original_size: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_original_size(mut self, size: Option<u64>) -> Self {
        self.original_size = size;
        self
    }

    /// Queued -> Processing. Returns false if the job was not queued.
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.started_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Record a progress tick. Ignored unless processing; never moves backwards.
    pub fn record_progress(&mut self, percent: f64) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let clamped = clamp_progress(percent);
        if clamped > self.progress {
            self.progress = clamped;
            self.updated_at = Utc::now();
        }
        true
    }

    /// Processing -> Completed with progress pinned to 100.
    pub fn complete(&mut self, artifact: Artifact) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(artifact);
        self.error = None;
        self.finished_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Any non-terminal state -> Failed.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(message.into());
        self.result = None;
        self.finished_at = Some(now);
        self.updated_at = now;
        true
    }
}

/// Clamp an adapter-reported percentage into 0..=100. NaN maps to 0.
pub fn clamp_progress(percent: f64) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    percent.round().clamp(0.0, 100.0) as u8
}

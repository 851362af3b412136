//! Test helper utilities: scripted adapters, an in-process server and polling

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::multipart;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use uuid::Uuid;

use media_jobs::app_state::AppState;
use media_jobs::models::job::{Artifact, Job, JobId};
use media_jobs::models::media::VideoOptions;
use media_jobs::routes;
use media_jobs::services::batch::BatchProcessor;
use media_jobs::services::image_pipeline::{http_client, ImageAdapter};
use media_jobs::services::queue::JobQueue;
use media_jobs::services::store::JobStore;
use media_jobs::services::transform::{JobInput, Progress, TransformAdapter, TransformError};

/// Width that the fake transcoder refuses, to fail one of two identical inputs.
pub const REJECTED_WIDTH: u32 = 16;

/// Transcoder stand-in driven by the input name.
///
/// - names containing `panic` panic
/// - names containing `wait-cancel` block until cancelled
/// - names containing `fail` (or width 16) fail after reporting progress
/// - everything else reports 40% then 20% and succeeds, echoing the input
///
/// A gated fake additionally holds each job until a permit is released.
pub struct FakeVideo {
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    output_dir: Option<PathBuf>,
}

impl FakeVideo {
    pub fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            gate: None,
            output_dir: None,
        }
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fake = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (fake, gate)
    }

    /// Write artifacts as files under `dir` instead of keeping them in memory.
    pub fn writing_to(dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(dir.into()),
            ..Self::new()
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransformAdapter for FakeVideo {
    type Options = VideoOptions;

    fn name(&self) -> &'static str {
        "fake-video"
    }

    async fn run(
        &self,
        input: &JobInput,
        options: &VideoOptions,
        progress: &Progress,
    ) -> Result<Artifact, TransformError> {
        let name = input.describe();
        self.started.lock().push(name.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if name.contains("panic") {
            panic!("fake transcoder crashed on {}", name);
        }

        progress.report(40.0);
        progress.report(20.0);

        if name.contains("wait-cancel") {
            progress.cancellation().cancelled().await;
            return Err(TransformError::Cancelled);
        }

        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = progress.cancellation().cancelled() => return Err(TransformError::Cancelled),
            }
        }

        if name.contains("fail") || options.width == Some(REJECTED_WIDTH) {
            return Err(TransformError::Tool {
                tool: "ffmpeg".to_string(),
                message: format!("cannot encode {}", name),
            });
        }

        let body = match input.local_path() {
            Some(path) if path.exists() => tokio::fs::read(path).await?,
            _ => name.into_bytes(),
        };

        match (&self.output_dir, progress.job_id()) {
            (Some(dir), Some(id)) => {
                let path = dir.join(format!("compressed_{}.mp4", id));
                tokio::fs::write(&path, &body).await?;
                Ok(Artifact::file(path, body.len() as u64, "video/mp4", "mp4"))
            }
            _ => Ok(Artifact::memory(Bytes::from(body), "video/mp4", "mp4")),
        }
    }
}

/// Poll the store until `done` holds for the job (5s timeout).
pub async fn wait_for_job(store: &JobStore, id: JobId, done: impl Fn(&Job) -> bool) -> Job {
    for _ in 0..500 {
        if let Some(job) = store.get(id) {
            if done(&job) {
                return job;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not reach the expected state: {:?}", id, store.get(id));
}

pub async fn wait_for_terminal(store: &JobStore, id: JobId) -> Job {
    wait_for_job(store, id, |job| job.status.is_terminal()).await
}

/// Poll until `condition` holds (5s timeout).
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Job service served in-process on an ephemeral port.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    pub upload_dir: TempDir,
}

pub async fn spawn_server(video: FakeVideo, concurrency: usize) -> TestServer {
    let upload_dir = tempfile::tempdir().expect("create upload dir");

    let store = Arc::new(JobStore::new());
    let queue = JobQueue::<VideoOptions>::start(store, Arc::new(video), concurrency);

    let http = http_client(Duration::from_secs(5)).expect("build http client");
    let images = ImageAdapter::new(http, 1500, 75, None);
    let batch = BatchProcessor::new(Arc::new(images), 2);

    let state = AppState::new(queue, batch, None, upload_dir.path(), || true);
    let app = routes::router(state.clone(), 64 * 1024 * 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    TestServer {
        base_url: format!("http://{}", addr),
        state,
        upload_dir,
    }
}

/// Response from POST /api/compress-video
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

/// Response from GET /api/job-status/{id}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub status: String,
    pub progress: u8,
    pub original_name: Option<String>,
    pub original_size: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Upload a video to the compress endpoint
pub async fn upload_video(
    client: &reqwest::Client,
    base_url: &str,
    bytes: &[u8],
    filename: &str,
    target_mb: Option<&str>,
    width: Option<&str>,
) -> reqwest::Response {
    let mut form = multipart::Form::new().part(
        "video",
        multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str("video/mp4")
            .expect("mime"),
    );
    if let Some(t) = target_mb {
        form = form.text("targetMB", t.to_string());
    }
    if let Some(w) = width {
        form = form.text("width", w.to_string());
    }

    client
        .post(format!("{}/api/compress-video", base_url))
        .multipart(form)
        .send()
        .await
        .expect("upload request")
}

pub async fn get_job_status(client: &reqwest::Client, base_url: &str, id: Uuid) -> JobStatusResponse {
    client
        .get(format!("{}/api/job-status/{}", base_url, id))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status body")
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    id: Uuid,
    timeout_secs: u64,
) -> JobStatusResponse {
    let max_attempts = timeout_secs * 20; // Poll every 50ms

    for _ in 0..max_attempts {
        let status = get_job_status(client, base_url, id).await;
        match status.status.as_str() {
            "completed" | "failed" => return status,
            "queued" | "processing" => sleep(Duration::from_millis(50)).await,
            other => panic!("Unknown job status: {}", other),
        }
    }

    panic!("Job {} did not finish within {} seconds", id, timeout_secs);
}

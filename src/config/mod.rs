use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:1108").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Temporary storage for uploaded videos
    #[serde(default = "default_media_dir")]
    pub upload_dir: PathBuf,

    /// Where transcoded videos are written
    #[serde(default = "default_media_dir")]
    pub output_dir: PathBuf,

    /// Number of jobs processed at once
    #[serde(default = "default_one")]
    pub worker_concurrency: usize,

    /// Request body limit in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,

    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,

    #[serde(default = "default_image_max_width")]
    pub image_max_width: u32,

    #[serde(default = "default_image_quality")]
    pub image_quality: u8,

    /// Path or URL of the watermark logo; images are left unmarked when unset
    pub watermark_source: Option<String>,

    #[serde(default = "default_watermark_opacity")]
    pub watermark_opacity: f32,

    /// Watermark width as a fraction of the image width
    #[serde(default = "default_watermark_scale")]
    pub watermark_scale: f32,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// In-flight items per image batch
    #[serde(default = "default_one")]
    pub batch_concurrency: usize,

    /// CORS origin; any origin is allowed when unset
    pub allowed_origin: Option<String>,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,
}

/// Connection settings for the object storage sink.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

fn default_bind_addr() -> String {
    "0.0.0.0:1108".to_string()
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_one() -> usize {
    1
}

fn default_max_upload_bytes() -> usize {
    1024 * 1024 * 1024
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_image_max_width() -> u32 {
    1500
}

fn default_image_quality() -> u8 {
    75
}

fn default_watermark_opacity() -> f32 {
    0.3
}

fn default_watermark_scale() -> f32 {
    0.4
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Storage settings, present only when all four R2 variables are set.
    pub fn storage(&self) -> Option<StorageSettings<'_>> {
        Some(StorageSettings {
            bucket: self.r2_bucket.as_deref()?,
            endpoint: self.r2_endpoint.as_deref()?,
            access_key: self.r2_access_key.as_deref()?,
            secret_key: self.r2_secret_key.as_deref()?,
        })
    }
}

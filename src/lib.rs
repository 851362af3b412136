//! Media job service
//!
//! Queued video compression through ffmpeg with progress polling and
//! cancellation, plus best-effort image batches (resize, watermark,
//! re-encode) written to a ZIP archive or S3-compatible object storage.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;

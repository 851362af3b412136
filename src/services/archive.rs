use std::io::{Cursor, Write};

use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::job::Artifact;
use crate::services::batch::{ArtifactSink, SinkError};

/// File name offered to clients downloading a batch archive.
pub const ARCHIVE_NAME: &str = "tour-images.zip";
pub const ARCHIVE_DISPOSITION: &str = "attachment; filename=\"tour-images.zip\"";

/// Batch sink writing each artifact as a ZIP entry held in memory.
pub struct ZipSink {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
    entries: usize,
}

impl ZipSink {
    pub fn new() -> Self {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9));

        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            options,
            entries: 0,
        }
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write the central directory and return the archive bytes.
    pub fn finish(self) -> Result<Vec<u8>, SinkError> {
        let cursor = self
            .writer
            .finish()
            .map_err(|e| SinkError::Archive(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

impl Default for ZipSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactSink for ZipSink {
    async fn put(&mut self, name: &str, artifact: &Artifact) -> Result<(), SinkError> {
        let bytes = artifact.read_all().await?;

        self.writer
            .start_file(name, self.options)
            .map_err(|e| SinkError::Archive(e.to_string()))?;
        self.writer.write_all(&bytes)?;
        self.entries += 1;

        Ok(())
    }
}

//! Where definitions documents come from. A source is awaited once per load.

use std::path::PathBuf;

use kforge_core::SchemaError;
use tracing::debug;

#[allow(async_fn_in_trait)]
pub trait DocumentSource {
    /// Human-readable origin for logs.
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Vec<u8>, SchemaError>;
}

/// Reads a `_definitions.json` file from disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DocumentSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<Vec<u8>, SchemaError> {
        let bytes = tokio::fs::read(&self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "read definitions file");
        Ok(bytes)
    }
}

/// Content already in memory (embedded fixtures, downloaded blobs).
#[derive(Debug, Clone)]
pub struct BytesSource {
    label: String,
    bytes: Vec<u8>,
}

impl BytesSource {
    pub fn new(label: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { label: label.into(), bytes: bytes.into() }
    }
}

impl DocumentSource for BytesSource {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn fetch(&self) -> Result<Vec<u8>, SchemaError> {
        Ok(self.bytes.clone())
    }
}

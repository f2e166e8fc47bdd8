//! Files selected for upload

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where an upload's bytes come from
#[derive(Debug, Clone)]
enum FileSource {
    /// Read from disk when the session opens
    Path(PathBuf),
    /// Already in memory
    Memory(Arc<[u8]>),
}

/// One file of a batch
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    source: FileSource,
}

impl UploadFile {
    /// File on disk; the display name is the final path component
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            source: FileSource::Path(path.to_path_buf()),
        }
    }

    /// In-memory content with an explicit display name
    pub fn from_bytes(name: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            source: FileSource::Memory(content.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the full content
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            FileSource::Path(path) => tokio::fs::read(path).await,
            FileSource::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

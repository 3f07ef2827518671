//! Blob backend over a mounted share directory, using tokio::fs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use share_core::config::{expand_tilde, Configuration};
use share_core::store::{BackendError, BlobBackend, RemoteEntry};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;

/// Backend rooted at `<endpoint>/<collection>`.
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Backend for `config`. A mounted directory has no authentication,
    /// so a configured credential is reported and ignored.
    pub fn from_config(config: &Configuration) -> Self {
        if !config.credential.is_empty() {
            warn!("Credential is not used by the directory backend");
        }
        Self::new(expand_tilde(&config.endpoint).join(&config.collection))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, BackendError> {
        let mut full = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." || segment.contains('\\') {
                return Err(BackendError::Unauthorized(format!(
                    "invalid path segment in '{}'",
                    path
                )));
            }
            full.push(segment);
        }
        Ok(full)
    }
}

fn map_io(e: std::io::Error, path: &str) -> BackendError {
    let path = path.to_string();
    match e.kind() {
        ErrorKind::NotFound => BackendError::NotFound(path),
        ErrorKind::AlreadyExists => BackendError::AlreadyExists(path),
        ErrorKind::DirectoryNotEmpty => BackendError::NotEmpty(path),
        ErrorKind::PermissionDenied => BackendError::Unauthorized(path),
        _ => BackendError::Transport(format!("{}: {}", path, e)),
    }
}

#[async_trait]
impl BlobBackend for DirectoryBackend {
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, BackendError> {
        let full_path = self.full_path(dir)?;
        let mut entries = Vec::new();

        let mut read_dir = fs::read_dir(&full_path).await.map_err(|e| map_io(e, dir))?;
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| map_io(e, dir))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await.map_err(|e| map_io(e, dir))?;

            if metadata.is_dir() {
                entries.push(RemoteEntry::directory(name));
            } else {
                let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
                entries.push(RemoteEntry::file(name, metadata.len(), modified));
            }
        }

        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        let full_path = self.full_path(path)?;
        fs::read(&full_path).await.map_err(|e| map_io(e, path))
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<(), BackendError> {
        let full_path = self.full_path(path)?;

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, path))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let full_path = self.full_path(path)?;
        fs::remove_file(&full_path)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn create_dir(&self, path: &str) -> Result<(), BackendError> {
        let full_path = self.full_path(path)?;
        fs::create_dir(&full_path)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn delete_dir(&self, path: &str) -> Result<(), BackendError> {
        let full_path = self.full_path(path)?;
        if full_path == self.root {
            return Err(BackendError::Unauthorized(
                "cannot delete the collection root".to_string(),
            ));
        }
        fs::remove_dir(&full_path)
            .await
            .map_err(|e| map_io(e, path))
    }
}

//! Local working copies of remote files.
//!
//! Staged files live under `<staging_root>/share-sync`, mirroring the
//! remote directory layout so every remote identity maps to exactly one
//! path. Paths are deterministic; the session registry is what keeps two
//! sessions off the same path.

use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::ShareError;
use crate::formats::local_name;
use crate::store::FileIdentity;

/// Sub-directory of the staging root owned by this engine.
pub const STAGING_DIR: &str = "share-sync";
/// Sub-directory for encrypted temporaries created while uploading.
const OUTBOX_DIR: &str = ".outbox";

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            root: staging_root.into().join(STAGING_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for a remote file, with `.enc`/`.gz` stripped.
    pub fn stage_path_for(&self, file: &FileIdentity) -> Result<PathBuf, ShareError> {
        let name = local_name(&file.name);
        let mut path = self.root.clone();
        for segment in file.directory_segments() {
            path.push(checked_segment(segment, &file.path())?);
        }
        path.push(checked_segment(name, &file.path())?);
        Ok(path)
    }

    /// Path for an encrypted temporary that is uploaded and then released.
    pub fn outbox_path_for(&self, name: &str) -> Result<PathBuf, ShareError> {
        Ok(self.root.join(OUTBOX_DIR).join(checked_segment(name, name)?))
    }

    /// Write a working copy, creating parent directories as needed.
    pub async fn write(&self, path: &Path, content: &[u8]) -> Result<(), ShareError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ShareError::StagingIo {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        fs::write(path, content)
            .await
            .map_err(|source| ShareError::StagingIo {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Staged {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    /// Whether a working copy is already on disk at `path`.
    pub async fn exists(&self, path: &Path) -> Result<bool, ShareError> {
        fs::try_exists(path)
            .await
            .map_err(|source| ShareError::StagingIo {
                path: path.to_path_buf(),
                source,
            })
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, ShareError> {
        fs::read(path).await.map_err(|source| ShareError::StagingIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Best-effort delete. Failures are logged, never returned.
    pub async fn release(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => debug!("Released {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {}: {}", path.display(), e),
        }
    }
}

/// A path segment must be a plain name: no separators, no `.`/`..`.
fn checked_segment<'a>(segment: &'a str, context: &str) -> Result<&'a str, ShareError> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !segment.contains(['/', '\\']) => Ok(segment),
        _ => Err(ShareError::StagingIo {
            path: PathBuf::from(segment),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsafe path segment in '{}'", context),
            ),
        }),
    }
}

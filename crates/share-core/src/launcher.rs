//! Hand a staged file to the user's default application.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Failed to open {path}: {reason}")]
pub struct LaunchError {
    pub path: PathBuf,
    pub reason: String,
}

#[async_trait]
pub trait FileOpener: Send + Sync {
    /// Open `path` with the default application. Returns once the launch
    /// was handed off, not when the application exits.
    async fn open(&self, path: &Path) -> Result<(), LaunchError>;
}

/// Records launches instead of performing them.
#[derive(Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<PathBuf>>,
    fail: Mutex<Option<String>>,
}

impl RecordingOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&self, reason: Option<&str>) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = reason.map(str::to_string);
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl FileOpener for RecordingOpener {
    async fn open(&self, path: &Path) -> Result<(), LaunchError> {
        if let Some(reason) = self.fail.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(LaunchError {
                path: path.to_path_buf(),
                reason,
            });
        }
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
        Ok(())
    }
}

//! Change notifications for staged files.
//!
//! A [`ChangeWatcher`] turns a staged path into a [`ChangeStream`] of
//! "the file changed" ticks. share-daemon implements it with notify;
//! tests use [`ManualWatcher`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to watch {path}: {reason}")]
    Setup { path: PathBuf, reason: String },
}

/// Stream of change ticks for one path.
///
/// Dropping it stops the underlying watcher.
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<()>,
    _guard: Option<Box<dyn Send>>,
}

impl ChangeStream {
    pub fn new(rx: mpsc::UnboundedReceiver<()>) -> Self {
        Self { rx, _guard: None }
    }

    /// Keep `guard` alive for as long as the stream is.
    pub fn with_guard(rx: mpsc::UnboundedReceiver<()>, guard: Box<dyn Send>) -> Self {
        Self {
            rx,
            _guard: Some(guard),
        }
    }

    /// Next change, or `None` once the watcher has stopped.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

pub trait ChangeWatcher: Send + Sync {
    /// Start watching `path`. The file may not exist yet; its creation
    /// counts as a change.
    fn watch(&self, path: &Path) -> Result<ChangeStream, WatchError>;
}

/// Test watcher: changes are whatever the test says they are.
#[derive(Default)]
pub struct ManualWatcher {
    senders: Mutex<HashMap<PathBuf, mpsc::UnboundedSender<()>>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a change for `path`. Returns false if nothing is watching.
    pub fn emit(&self, path: &Path) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

impl ChangeWatcher for ManualWatcher {
    fn watch(&self, path: &Path) -> Result<ChangeStream, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), tx);
        Ok(ChangeStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_watcher_delivers_until_dropped() {
        let watcher = ManualWatcher::new();
        let path = Path::new("/tmp/staged.txt");
        assert!(!watcher.emit(path));

        let mut stream = watcher.watch(path).unwrap();
        assert!(watcher.is_watching(path));
        assert!(watcher.emit(path));
        assert_eq!(stream.changed().await, Some(()));

        drop(stream);
        assert!(!watcher.is_watching(path));
        assert!(!watcher.emit(path));
    }
}

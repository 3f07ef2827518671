//! Staged-file watcher with debouncing.
//!
//! Uses notify-debouncer-mini on the staged file's parent directory, so
//! a file that does not exist yet (or is replaced by an editor's atomic
//! save) is still seen.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use share_core::watch::{ChangeStream, ChangeWatcher, WatchError};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

pub struct StageWatcher {
    debounce: Duration,
}

impl StageWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }
}

impl Default for StageWatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

fn setup_error(path: &Path, reason: impl ToString) -> WatchError {
    WatchError::Setup {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl ChangeWatcher for StageWatcher {
    fn watch(&self, path: &Path) -> Result<ChangeStream, WatchError> {
        let parent = path
            .parent()
            .ok_or_else(|| setup_error(path, "staged path has no parent"))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| setup_error(path, "staged path has no file name"))?;

        std::fs::create_dir_all(parent).map_err(|e| setup_error(path, e))?;
        // FSEvents reports canonical paths (/private/var/... on macOS).
        let parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
        let target = parent.join(file_name);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // Repeated events without a new mtime are dropped
        let mut last_mtime: Option<SystemTime> = None;
        let target_clone = target.clone();

        let mut debouncer = new_debouncer(
            self.debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    if events.iter().any(|event| event.path == target_clone)
                        && is_new_write(&target_clone, &mut last_mtime)
                    {
                        debug!("Staged file changed: {}", target_clone.display());
                        // Receiver gone means the session is closing
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => {
                    error!("Staging watcher error: {}", e);
                }
            },
        )
        .map_err(|e| setup_error(path, e))?;

        debouncer
            .watcher()
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| setup_error(path, e))?;

        debug!("Watching {}", target.display());
        Ok(ChangeStream::with_guard(event_rx, Box::new(debouncer)))
    }
}

/// Whether the file exists with an mtime we have not reported yet.
fn is_new_write(path: &Path, last_mtime: &mut Option<SystemTime>) -> bool {
    let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) else {
        // Deleted (or mid-rename); nothing to upload
        return false;
    };
    if *last_mtime == Some(mtime) {
        return false;
    }
    *last_mtime = Some(mtime);
    true
}

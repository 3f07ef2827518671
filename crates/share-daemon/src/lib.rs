//! share-daemon library: native collaborators for the share engine.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod dir_store;
pub mod launcher;
pub mod open_files;
pub mod watcher;

use share_core::clock::IntervalClock;
use share_core::config::Configuration;
use share_core::session::Collaborators;
use std::sync::Arc;

// Re-export key types for convenience
pub use dir_store::DirectoryBackend;
pub use launcher::SystemOpener;
pub use open_files::{platform_detector, LsofDetector, ProcFdDetector};
pub use watcher::StageWatcher;

/// Collaborators backed by the real platform.
pub fn native_collaborators(config: &Configuration) -> Collaborators {
    Collaborators {
        detector: platform_detector(),
        watcher: Arc::new(StageWatcher::new(config.debounce())),
        opener: Arc::new(SystemOpener),
        clock: Arc::new(IntervalClock::new(config.poll_interval())),
    }
}

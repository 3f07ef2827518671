//! "Is this file still held open?" probes.
//!
//! Platform strategies live in share-daemon (handle-table scan, `lsof`
//! invocation). The session only sees [`OpenFileDetector`] and decides
//! what a failed probe means through [`ProbePolicy`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Open-file probe failed: {0}")]
    Probe(String),

    #[error("Open-file tool failed: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Answers whether some process holds a file open.
#[async_trait]
pub trait OpenFileDetector: Send + Sync {
    /// Whether the batch is open. Strategies may treat the first path as
    /// authoritative.
    async fn is_open(&self, paths: &[PathBuf]) -> Result<bool, DetectorError>;
}

/// How a failed probe is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePolicy {
    /// Errors mean "open": never close a session early.
    Conservative,
    /// Errors mean "not open": one-shot pre-checks must not lock users out.
    Permissive,
}

/// Run a probe and resolve errors according to `policy`.
pub async fn probe(detector: &dyn OpenFileDetector, path: &Path, policy: ProbePolicy) -> bool {
    match detector.is_open(&[path.to_path_buf()]).await {
        Ok(open) => open,
        Err(e) => {
            let assumed = policy == ProbePolicy::Conservative;
            warn!(
                "Open-file probe for {} failed ({}), assuming {}",
                path.display(),
                e,
                if assumed { "open" } else { "closed" }
            );
            assumed
        }
    }
}

/// Scripted detector for tests.
///
/// Answers from a queue; once the queue is empty the fallback answer
/// repeats.
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Result<bool, String>>>,
    fallback: Mutex<Result<bool, String>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    /// Always answers `open`.
    pub fn new(open: bool) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(open)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers each scripted value once, then `fallback`.
    pub fn scripted(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        let detector = Self::new(fallback);
        detector
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(answers.into_iter().map(Ok));
        detector
    }

    /// Change the answer given once the script runs out.
    pub fn set_open(&self, open: bool) {
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = Ok(open);
    }

    /// Make the fallback answer an error.
    pub fn set_error(&self, message: &str) {
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = Err(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpenFileDetector for ScriptedDetector {
    async fn is_open(&self, _paths: &[PathBuf]) -> Result<bool, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let answer = match next {
            Some(answer) => answer,
            None => self
                .fallback
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        };
        answer.map_err(DetectorError::Probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conservative_policy_treats_errors_as_open() {
        let detector = ScriptedDetector::new(false);
        detector.set_error("handle table unavailable");
        assert!(probe(&detector, Path::new("/tmp/x"), ProbePolicy::Conservative).await);
    }

    #[tokio::test]
    async fn test_permissive_policy_treats_errors_as_closed() {
        let detector = ScriptedDetector::new(true);
        detector.set_error("lsof missing");
        assert!(!probe(&detector, Path::new("/tmp/x"), ProbePolicy::Permissive).await);
    }

    #[tokio::test]
    async fn test_policy_does_not_change_real_answers() {
        let detector = ScriptedDetector::scripted([true, false], true);
        assert!(probe(&detector, Path::new("/tmp/x"), ProbePolicy::Permissive).await);
        assert!(!probe(&detector, Path::new("/tmp/x"), ProbePolicy::Conservative).await);
        assert!(probe(&detector, Path::new("/tmp/x"), ProbePolicy::Conservative).await);
        assert_eq!(detector.calls(), 3);
    }
}

//! Platform strategies for "is some process holding this file open?".
//!
//! - Linux: scan the per-process descriptor tables under `/proc`
//! - Other Unix: run `lsof -F n -- <paths>`
//! - Windows: try to open the file with no sharing allowed

use async_trait::async_trait;
use share_core::detector::{DetectorError, OpenFileDetector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Pick the strategy for the running platform.
#[cfg(target_os = "linux")]
pub fn platform_detector() -> Arc<dyn OpenFileDetector> {
    Arc::new(ProcFdDetector::new())
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn platform_detector() -> Arc<dyn OpenFileDetector> {
    Arc::new(LsofDetector::new())
}

#[cfg(windows)]
pub fn platform_detector() -> Arc<dyn OpenFileDetector> {
    Arc::new(ExclusiveOpenDetector)
}

/// Handle-table scan of `/proc/<pid>/fd`. Only the first path is checked.
pub struct ProcFdDetector {
    proc_root: PathBuf,
}

impl ProcFdDetector {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl Default for ProcFdDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpenFileDetector for ProcFdDetector {
    async fn is_open(&self, paths: &[PathBuf]) -> Result<bool, DetectorError> {
        let Some(first) = paths.first() else {
            return Ok(false);
        };
        let target = match first.canonicalize() {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let proc_root = self.proc_root.clone();

        tokio::task::spawn_blocking(move || scan_proc(&proc_root, &target))
            .await
            .map_err(|e| DetectorError::Probe(format!("scan task failed: {}", e)))?
    }
}

fn scan_proc(proc_root: &Path, target: &Path) -> Result<bool, DetectorError> {
    for process in std::fs::read_dir(proc_root)? {
        let Ok(process) = process else { continue };
        let is_pid = process
            .file_name()
            .to_str()
            .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()));
        if !is_pid {
            continue;
        }

        // Other users' processes are unreadable; those cannot hold our file.
        let Ok(fds) = std::fs::read_dir(process.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if std::fs::read_link(fd.path()).is_ok_and(|link| link == target) {
                debug!("{} held by pid {:?}", target.display(), process.file_name());
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// `lsof -F n -- <paths>`: any listed descriptor means open.
pub struct LsofDetector {
    program: String,
}

impl LsofDetector {
    pub fn new() -> Self {
        Self {
            program: "lsof".to_string(),
        }
    }

    /// Use a different executable (tests, non-standard installs).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for LsofDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpenFileDetector for LsofDetector {
    async fn is_open(&self, paths: &[PathBuf]) -> Result<bool, DetectorError> {
        if paths.is_empty() {
            return Ok(false);
        }

        let output = Command::new(&self.program)
            .args(["-F", "n", "--"])
            .args(paths)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            return Ok(true);
        }
        // lsof exits 1 with no output when nothing matches
        if output.status.success() || (output.status.code() == Some(1) && stderr.trim().is_empty())
        {
            return Ok(false);
        }
        Err(DetectorError::Tool(format!(
            "{} exited with {}: {}",
            self.program,
            output.status,
            stderr.trim()
        )))
    }
}

/// Opening with no sharing fails while any other handle is open.
#[cfg(windows)]
pub struct ExclusiveOpenDetector;

#[cfg(windows)]
#[async_trait]
impl OpenFileDetector for ExclusiveOpenDetector {
    async fn is_open(&self, paths: &[PathBuf]) -> Result<bool, DetectorError> {
        use std::os::windows::fs::OpenOptionsExt;

        const ERROR_SHARING_VIOLATION: i32 = 32;

        let paths = paths.to_vec();
        tokio::task::spawn_blocking(move || {
            for path in &paths {
                let probe = std::fs::OpenOptions::new()
                    .read(true)
                    .share_mode(0)
                    .open(path);
                match probe {
                    Ok(_) => {}
                    Err(e) if e.raw_os_error() == Some(ERROR_SHARING_VIOLATION) => return Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(DetectorError::Io(e)),
                }
            }
            Ok(false)
        })
        .await
        .map_err(|e| DetectorError::Probe(format!("probe task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_batch_is_closed() {
        assert!(!ProcFdDetector::new().is_open(&[]).await.unwrap());
        assert!(!LsofDetector::new().is_open(&[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_closed() {
        let dir = TempDir::new().unwrap();
        let detector = ProcFdDetector::new();
        let open = detector
            .is_open(&[dir.path().join("missing.txt")])
            .await
            .unwrap();
        assert!(!open);
    }

    #[tokio::test]
    async fn test_missing_lsof_is_an_error() {
        let detector = LsofDetector::with_program("definitely-not-lsof-3f9a");
        let dir = TempDir::new().unwrap();
        let result = detector.is_open(&[dir.path().join("x.txt")]).await;
        assert!(matches!(result, Err(DetectorError::Io(_))));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_proc_scan_sees_held_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("held.txt");
        std::fs::write(&path, b"x").unwrap();
        let detector = ProcFdDetector::new();

        let handle = std::fs::File::open(&path).unwrap();
        assert!(detector.is_open(&[path.clone()]).await.unwrap());

        drop(handle);
        assert!(!detector.is_open(&[path]).await.unwrap());
    }
}

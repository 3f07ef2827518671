//! Launch staged files with the desktop's default application.

use async_trait::async_trait;
use share_core::launcher::{FileOpener, LaunchError};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

pub struct SystemOpener;

fn launch_command(path: &Path) -> Command {
    #[cfg(target_os = "windows")]
    let command = {
        let mut command = Command::new("explorer");
        command.arg(path);
        command
    };

    #[cfg(target_os = "macos")]
    let command = {
        let mut command = Command::new("open");
        command.arg(path);
        command
    };

    #[cfg(all(unix, not(target_os = "macos")))]
    let command = {
        let mut command = Command::new("xdg-open");
        command.arg(path);
        command
    };

    command
}

#[async_trait]
impl FileOpener for SystemOpener {
    async fn open(&self, path: &Path) -> Result<(), LaunchError> {
        // The application outlives this call; the session polls for it.
        let child = launch_command(path).spawn().map_err(|e| LaunchError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Launched {} (pid {:?})", path.display(), child.id());
        Ok(())
    }
}

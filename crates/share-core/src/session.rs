//! Edit session for one remote file.
//!
//! Lifecycle:
//! ```text
//! Idle -> Fetching -> Decrypting -> Staged -> Watching <-> Uploading
//!      -> Closing -> Flushing -> Cleanup -> Idle
//! ```
//! The session owns its [`SessionGuard`] and staged path. Whatever way
//! `drive` ends, `run` releases the staged copy, drops the guard and
//! emits exactly one terminal message.
//!
//! A staged copy left behind by a failed flush is never overwritten: the
//! next session for that file reopens it as-is, and its close uploads it.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::PollClock;
use crate::codec::Codec;
use crate::detector::{probe, OpenFileDetector, ProbePolicy};
use crate::error::{Result, ShareError};
use crate::events::{EventBus, Severity, ShareEvent};
use crate::formats::{is_editable, local_name, mime_for};
use crate::launcher::FileOpener;
use crate::registry::SessionGuard;
use crate::staging::StagingArea;
use crate::store::{BlobBackend, FileIdentity, RemoteStore};
use crate::watch::{ChangeStream, ChangeWatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Fetching,
    Decrypting,
    Staged,
    Watching,
    Uploading,
    Closing,
    Flushing,
    Cleanup,
}

/// Platform pieces a session needs besides the store.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn OpenFileDetector>,
    pub watcher: Arc<dyn ChangeWatcher>,
    pub opener: Arc<dyn FileOpener>,
    pub clock: Arc<dyn PollClock>,
}

/// Shared, read-only state every session of a service uses.
pub(crate) struct SessionContext<B> {
    pub store: Arc<RemoteStore<B>>,
    pub codec: Codec,
    pub staging: StagingArea,
    pub collaborators: Collaborators,
    pub events: Arc<EventBus>,
}

/// What a finished session did.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub file: FileIdentity,
    pub stage_path: Option<PathBuf>,
    pub editable: bool,
    /// Successful uploads, mid-session and final flush combined
    pub uploads: usize,
    pub offline_rejections: usize,
    /// The staged copy was left on disk with changes not yet uploaded
    pub staged_kept: bool,
    /// The session reopened a copy kept by an earlier failed flush
    pub resumed: bool,
}

/// Handle to a running session.
pub struct SessionHandle {
    file: FileIdentity,
    task: JoinHandle<Result<SessionReport>>,
}

impl SessionHandle {
    pub fn file(&self) -> &FileIdentity {
        &self.file
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn wait(self) -> Result<SessionReport> {
        self.task
            .await
            .map_err(|e| ShareError::TaskFailed(e.to_string()))?
    }
}

pub(crate) struct SyncSession<B> {
    file: FileIdentity,
    display_name: String,
    guard: SessionGuard,
    ctx: Arc<SessionContext<B>>,
    online: watch::Receiver<bool>,
    stage_path: Option<PathBuf>,
    editable: bool,
    loading: bool,
    uploads: usize,
    offline_rejections: usize,
    keep_staged: bool,
    resumed: bool,
}

impl<B: BlobBackend + 'static> SyncSession<B> {
    pub(crate) fn new(
        file: FileIdentity,
        guard: SessionGuard,
        ctx: Arc<SessionContext<B>>,
        online: watch::Receiver<bool>,
    ) -> Self {
        Self {
            display_name: local_name(&file.name).to_string(),
            file,
            guard,
            ctx,
            online,
            stage_path: None,
            editable: false,
            loading: false,
            uploads: 0,
            offline_rejections: 0,
            keep_staged: false,
            resumed: false,
        }
    }

    pub(crate) fn spawn(self) -> SessionHandle {
        let file = self.file.clone();
        SessionHandle {
            file,
            task: tokio::spawn(self.run()),
        }
    }

    async fn run(mut self) -> Result<SessionReport> {
        let outcome = self.drive().await;

        self.set_state(SessionState::Cleanup);
        if self.loading {
            self.set_loading(false);
        }
        if let Some(path) = &self.stage_path {
            if self.keep_staged {
                warn!("Keeping unsaved staged copy {}", path.display());
            } else {
                self.ctx.staging.release(path).await;
            }
        }

        let report = SessionReport {
            file: self.file.clone(),
            stage_path: self.stage_path.clone(),
            editable: self.editable,
            uploads: self.uploads,
            offline_rejections: self.offline_rejections,
            staged_kept: self.keep_staged,
            resumed: self.resumed,
        };

        drop(self.guard);
        self.ctx.events.emit(ShareEvent::SessionState {
            identity: self.file.path(),
            state: SessionState::Idle,
        });

        if self.uploads > 0 {
            self.ctx.events.refresh(&self.file.directory);
        }

        match outcome {
            Ok(()) => {
                let text = if self.editable {
                    format!("The file {} is processed successfully", self.display_name)
                } else {
                    format!("The file {} is closed", self.display_name)
                };
                info!("{}", text);
                self.ctx.events.message(Severity::Success, text);
                Ok(report)
            }
            Err(e) => {
                error!("Session for {} failed: {}", self.file, e);
                self.ctx.events.message(Severity::Error, e.to_string());
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        self.set_loading(true);

        let path = self.ctx.staging.stage_path_for(&self.file)?;
        self.editable = is_editable(&self.display_name);
        self.resumed = self.editable && self.ctx.staging.exists(&path).await?;
        // A kept copy stays on disk until a flush has uploaded it.
        self.keep_staged = self.resumed;

        let plain = if self.resumed {
            warn!("Reopening kept copy {}", path.display());
            self.ctx.events.message(
                Severity::Warning,
                format!("Reopening unsaved local changes to {}", self.display_name),
            );
            None
        } else {
            Some(self.fetch_plaintext().await?)
        };

        self.set_state(SessionState::Staged);

        // Armed before the write: that write is the one event we ignore.
        let mut changes = if self.editable {
            match self.ctx.collaborators.watcher.watch(&path) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!("{}; edits will only be saved on close", e);
                    None
                }
            }
        } else {
            None
        };
        let mut initial_write_pending = changes.is_some() && plain.is_some();

        self.stage_path = Some(path.clone());
        if let Some(bytes) = &plain {
            self.ctx.staging.write(&path, bytes).await?;
        }
        self.ctx.collaborators.opener.open(&path).await?;
        self.set_loading(false);

        self.set_state(SessionState::Watching);
        let mut poll = self.ctx.collaborators.clock.trigger(&self.file.path());
        loop {
            tokio::select! {
                biased;

                change = next_change(&mut changes) => match change {
                    Some(()) if initial_write_pending => {
                        initial_write_pending = false;
                        debug!("Ignoring initial write of {}", path.display());
                    }
                    Some(()) => self.push_changes(&path, false).await?,
                    None => {
                        debug!("Watcher for {} stopped", path.display());
                        changes = None;
                    }
                },

                _ = poll.tick() => {
                    let detector = self.ctx.collaborators.detector.as_ref();
                    if !probe(detector, &path, ProbePolicy::Conservative).await {
                        break;
                    }
                }
            }
        }

        self.set_state(SessionState::Closing);
        drop(changes);
        drop(poll);

        if self.editable {
            self.set_state(SessionState::Flushing);
            self.push_changes(&path, true).await?;
        }
        Ok(())
    }

    async fn fetch_plaintext(&self) -> Result<Vec<u8>> {
        self.set_state(SessionState::Fetching);
        let raw = self
            .ctx
            .store
            .download(&self.file)
            .await
            .map_err(|e| ShareError::from_store(e, &self.display_name))?;

        self.set_state(SessionState::Decrypting);
        let text = String::from_utf8(raw)
            .map_err(|_| ShareError::UnsupportedFormat(self.display_name.clone()))?;
        let decoded = self
            .ctx
            .codec
            .decode_owned(text)
            .await
            .map_err(|e| ShareError::from_codec(e, &self.display_name))?;
        Ok(decoded.bytes)
    }

    /// Upload the staged copy. Mid-session failures are reported and
    /// left for the next change or the final flush; flush failures end
    /// the session and keep the staged copy.
    async fn push_changes(&mut self, path: &Path, final_flush: bool) -> Result<()> {
        let online = *self.online.borrow();
        if !online {
            self.offline_rejections += 1;
            let err = ShareError::OfflineEditRejected(self.display_name.clone());
            warn!("{}", err);
            if final_flush {
                self.keep_staged = true;
                return Err(err);
            }
            self.ctx.events.message(Severity::Warning, err.to_string());
            return Ok(());
        }

        if !final_flush {
            self.set_state(SessionState::Uploading);
        }
        let result = self.upload_staged(path).await;
        if !final_flush {
            self.set_state(SessionState::Watching);
        }

        match result {
            Ok(()) => {
                self.uploads += 1;
                if final_flush {
                    self.keep_staged = false;
                }
                Ok(())
            }
            Err(e) if final_flush => {
                self.keep_staged = true;
                Err(e)
            }
            Err(e) => {
                error!("Upload of {} failed: {}", self.file, e);
                self.ctx.events.message(Severity::Error, e.to_string());
                Ok(())
            }
        }
    }

    async fn upload_staged(&self, path: &Path) -> Result<()> {
        let bytes = self.ctx.staging.read(path).await?;
        let payload = self
            .ctx
            .codec
            .encode_owned(bytes, mime_for(&self.display_name))
            .await
            .map_err(|e| ShareError::from_codec(e, &self.display_name))?;
        let stored = self
            .ctx
            .store
            .upload_bytes(&self.file.directory, &self.file.name, payload.as_bytes())
            .await?;
        debug!(
            "Uploaded {} as {} ({} chunks)",
            path.display(),
            stored,
            payload.chunk_count()
        );
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        debug!("{} -> {:?}", self.file, state);
        self.guard.set_state(state);
        self.ctx.events.emit(ShareEvent::SessionState {
            identity: self.file.path(),
            state,
        });
    }

    fn set_loading(&mut self, active: bool) {
        self.loading = active;
        self.ctx.events.loading(active);
    }
}

async fn next_change(changes: &mut Option<ChangeStream>) -> Option<()> {
    match changes {
        Some(stream) => stream.changed().await,
        None => std::future::pending().await,
    }
}

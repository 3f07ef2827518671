//! Caller-facing operations of the share engine.
//!
//! `ShareService` owns the remote store, codec, staging area, session
//! registry and event bus. Every operation reports its outcome on the
//! bus: one message per terminal result, plus a refresh hint for each
//! directory a mutation touched.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::codec::Codec;
use crate::config::Configuration;
use crate::connectivity::Connectivity;
use crate::detector::{probe, ProbePolicy};
use crate::error::{Result, ShareError};
use crate::events::{EventBus, Severity};
use crate::formats::{encrypted_name, is_openable, local_name, mime_for};
use crate::registry::SessionRegistry;
use crate::session::{Collaborators, SessionContext, SessionHandle, SessionState, SyncSession};
use crate::staging::StagingArea;
use crate::store::{
    normalize_path, parent_path, BlobBackend, DirectoryNode, FileIdentity, RemoteEntry,
    RemoteStore,
};

pub struct ShareService<B> {
    ctx: Arc<SessionContext<B>>,
    registry: Arc<SessionRegistry>,
    connectivity: Connectivity,
}

impl<B: BlobBackend + 'static> ShareService<B> {
    /// Build a service from an already validated configuration.
    pub fn new(config: &Configuration, backend: B, collaborators: Collaborators) -> Self {
        let ctx = SessionContext {
            store: Arc::new(RemoteStore::new(backend)),
            codec: Codec::from_config(config),
            staging: StagingArea::new(&config.staging_root),
            collaborators,
            events: Arc::new(EventBus::new()),
        };
        Self {
            ctx: Arc::new(ctx),
            registry: Arc::new(SessionRegistry::new()),
            connectivity: Connectivity::default(),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.ctx.events
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn store(&self) -> &RemoteStore<B> {
        &self.ctx.store
    }

    pub fn codec(&self) -> &Codec {
        &self.ctx.codec
    }

    pub fn staging(&self) -> &StagingArea {
        &self.ctx.staging
    }

    pub fn session_state(&self, file: &FileIdentity) -> Option<SessionState> {
        self.registry.state_of(&file.session_key())
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.registry.active()
    }

    /// Start an edit session for `file`.
    ///
    /// Rejections (unsupported extension, already open) are returned
    /// immediately and touch neither the network nor the disk. Everything
    /// after that runs on its own task; await the handle for the outcome.
    /// Must be called from within a Tokio runtime.
    pub fn open_remote_file(&self, file: FileIdentity) -> Result<SessionHandle> {
        let display = local_name(&file.name).to_string();
        if !is_openable(&file.name) {
            return Err(self.reject(ShareError::UnsupportedExtension(display)));
        }

        let guard = self
            .registry
            .try_acquire(&file)
            .map_err(|e| self.reject(e))?;

        info!("Opening {}", file);
        let session = SyncSession::new(
            file,
            guard,
            Arc::clone(&self.ctx),
            self.connectivity.subscribe(),
        );
        Ok(session.spawn())
    }

    /// Encrypt a local file and upload it into `target_dir`.
    ///
    /// Returns the stored name (`<name>.enc.gz`).
    pub async fn upload_local_file(&self, local_path: &Path, target_dir: &str) -> Result<String> {
        self.ctx.events.loading(true);
        let result = self.encrypt_and_upload(local_path, target_dir).await;
        self.ctx.events.loading(false);

        let success = result.as_ref().ok().map(|stored| {
            format!("The file {} is uploaded successfully", local_name(stored))
        });
        self.finish(result, success, Some(&normalize_path(target_dir)))
    }

    async fn encrypt_and_upload(&self, local_path: &Path, target_dir: &str) -> Result<String> {
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ShareError::StagingIo {
                path: local_path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file name is missing or not UTF-8",
                ),
            })?
            .to_string();

        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| ShareError::StagingIo {
                path: local_path.to_path_buf(),
                source,
            })?;
        let payload = self
            .ctx
            .codec
            .encode_owned(bytes, mime_for(&name))
            .await
            .map_err(|e| ShareError::from_codec(e, &name))?;

        let encrypted = encrypted_name(&name);
        let temp = self.ctx.staging.outbox_path_for(&encrypted)?;
        self.ctx.staging.write(&temp, payload.as_bytes()).await?;
        let uploaded = self.ctx.store.upload(target_dir, &encrypted, &temp).await;
        self.ctx.staging.release(&temp).await;

        Ok(uploaded?)
    }

    pub async fn delete_remote_file(&self, file: &FileIdentity) -> Result<()> {
        let result = self.ctx.store.delete(file).await.map_err(ShareError::from);
        let success = format!("The file {} is deleted successfully", local_name(&file.name));
        self.finish(result, Some(success), Some(&file.directory))
    }

    /// Create `parent/name`; returns the new directory's path.
    pub async fn create_remote_directory(&self, parent: &str, name: &str) -> Result<String> {
        let result = self
            .ctx
            .store
            .create_directory(parent, name)
            .await
            .map_err(ShareError::from);
        let success = format!("The directory {} is created successfully", name);
        self.finish(result, Some(success), Some(&normalize_path(parent)))
    }

    pub async fn delete_remote_directory(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let result = self
            .ctx
            .store
            .delete_directory(&path)
            .await
            .map_err(ShareError::from);
        let success = format!("The directory {} is deleted successfully", path);
        self.finish(result, Some(success), Some(&parent_path(&path)))
    }

    pub async fn list_remote_directory(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let result = self.ctx.store.list(dir).await.map_err(ShareError::from);
        self.finish(result, None, None)
    }

    pub async fn remote_directory_tree(&self, path: &str) -> Result<Vec<DirectoryNode>> {
        let result = self
            .ctx
            .store
            .directory_tree(path)
            .await
            .map_err(ShareError::from);
        self.finish(result, None, None)
    }

    /// One-shot check used before destructive actions on a local file.
    /// Probe failures read as "not open".
    pub async fn is_locally_open(&self, path: &Path) -> bool {
        probe(
            self.ctx.collaborators.detector.as_ref(),
            path,
            ProbePolicy::Permissive,
        )
        .await
    }

    fn reject(&self, err: ShareError) -> ShareError {
        let severity = match err {
            ShareError::AlreadyOpen(_) => Severity::Warning,
            _ => Severity::Error,
        };
        error!("{}", err);
        self.ctx.events.message(severity, err.to_string());
        err
    }

    fn finish<T>(
        &self,
        result: Result<T>,
        success: Option<String>,
        refresh: Option<&str>,
    ) -> Result<T> {
        match &result {
            Ok(_) => {
                if let Some(text) = success {
                    info!("{}", text);
                    self.ctx.events.message(Severity::Success, text);
                }
                if let Some(dir) = refresh {
                    self.ctx.events.refresh(dir);
                }
            }
            Err(e) => {
                error!("{}", e);
                self.ctx.events.message(Severity::Error, e.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EncryptionKey;
    use crate::detector::ScriptedDetector;
    use crate::events::{EventLog, ShareEvent, Subscription};
    use crate::launcher::RecordingOpener;
    use crate::store::InMemoryBackend;
    use crate::watch::ManualWatcher;
    use std::time::Duration;
    use tempfile::TempDir;

    const DOC: &str = "docs/report.txt.enc.gz";

    struct Harness {
        service: ShareService<Arc<InMemoryBackend>>,
        backend: Arc<InMemoryBackend>,
        detector: Arc<ScriptedDetector>,
        watcher: Arc<ManualWatcher>,
        opener: Arc<RecordingOpener>,
        clock: Arc<ManualClock>,
        log: EventLog,
        _sub: Subscription,
        dir: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config =
                Configuration::new("memory", "share", EncryptionKey::new("correct horse"));
            config.staging_root = dir.path().to_path_buf();
            config.kdf_iterations = 10;

            let backend = Arc::new(InMemoryBackend::new());
            backend.create_dir("docs").await.unwrap();

            let detector = Arc::new(ScriptedDetector::new(true));
            let watcher = Arc::new(ManualWatcher::new());
            let opener = Arc::new(RecordingOpener::new());
            let clock = Arc::new(ManualClock::new());
            let collaborators = Collaborators {
                detector: detector.clone(),
                watcher: watcher.clone(),
                opener: opener.clone(),
                clock: clock.clone(),
            };

            let service = ShareService::new(&config, Arc::clone(&backend), collaborators);
            let (log, sub) = EventLog::attach(service.events());
            Self {
                service,
                backend,
                detector,
                watcher,
                opener,
                clock,
                log,
                _sub: sub,
                dir,
            }
        }

        /// Store `content` encrypted under `docs/<name>.enc.gz`.
        async fn seed(&self, name: &str, content: &[u8]) -> FileIdentity {
            let payload = self
                .service
                .codec()
                .encode(content, &mime_for(name))
                .unwrap();
            let stored = self
                .service
                .store()
                .upload_bytes("docs", &encrypted_name(name), payload.as_bytes())
                .await
                .unwrap();
            FileIdentity::new("docs", stored)
        }

        async fn remote_plaintext(&self, file: &FileIdentity) -> Vec<u8> {
            let raw = self.service.store().download(file).await.unwrap();
            let text = String::from_utf8(raw).unwrap();
            self.service.codec().decode(&text).unwrap().bytes
        }

        async fn wait_for(&self, file: &FileIdentity, state: SessionState) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.service.session_state(file) != Some(state) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("session never reached the expected state");
        }

        async fn wait_for_uploads(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.backend.upload_count() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("upload never happened");
        }

        /// Report the file closed and tick the poll clock.
        fn close(&self, file: &FileIdentity) {
            self.detector.set_open(false);
            assert!(self.clock.tick(&file.path()));
        }
    }

    // ==================== Sessions ====================

    #[tokio::test]
    async fn test_open_stages_and_launches() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"quarterly numbers").await;
        assert_eq!(file.path(), DOC);

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;

        let staged = h.dir.path().join("share-sync").join("docs").join("report.txt");
        assert_eq!(h.opener.opened(), vec![staged.clone()]);
        assert_eq!(std::fs::read(&staged).unwrap(), b"quarterly numbers");
        assert!(h.watcher.is_watching(&staged));

        h.close(&file);
        let report = handle.wait().await.unwrap();
        assert!(report.editable);
        assert!(!staged.exists());
        assert!(h.service.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_second_open_is_rejected_while_session_lives() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"v1").await;

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        let err = h.service.open_remote_file(file.clone()).err().unwrap();
        assert!(matches!(err, ShareError::AlreadyOpen(ref name) if name == "report.txt"));
        assert_eq!(
            h.log.messages(Severity::Warning),
            vec!["The file report.txt is already open"]
        );

        h.wait_for(&file, SessionState::Watching).await;
        h.close(&file);
        handle.wait().await.unwrap();

        let reopened = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        h.close(&file);
        reopened.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_suffix_spellings_of_one_file_share_a_session() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"v1").await;

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        let err = h
            .service
            .open_remote_file(FileIdentity::new("docs", "report.txt.enc"))
            .err()
            .unwrap();
        assert!(matches!(err, ShareError::AlreadyOpen(ref name) if name == "report.txt"));
        assert_eq!(h.service.active_sessions(), vec!["docs/report.txt"]);

        h.wait_for(&file, SessionState::Watching).await;
        assert_eq!(h.opener.opened().len(), 1);
        h.close(&file);
        handle.wait().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_start_one_session() {
        let h = Arc::new(Harness::new().await);
        let file = h.seed("report.txt", b"contended").await;

        let attempts: Vec<_> = (0..4)
            .map(|_| {
                let h = Arc::clone(&h);
                let file = file.clone();
                tokio::spawn(async move { h.service.open_remote_file(file) })
            })
            .collect();

        let mut handles = Vec::new();
        let mut rejected = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(handle) => handles.push(handle),
                Err(ShareError::AlreadyOpen(_)) => rejected += 1,
                Err(e) => panic!("unexpected open failure: {}", e),
            }
        }
        assert_eq!(handles.len(), 1);
        assert_eq!(rejected, 3);

        h.wait_for(&file, SessionState::Watching).await;
        let staged = h
            .log
            .events()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ShareEvent::SessionState {
                        state: SessionState::Staged,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(staged, 1);
        assert_eq!(h.opener.opened().len(), 1);

        h.close(&file);
        handles.pop().unwrap().wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_write_event_is_not_uploaded() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"draft").await;
        let baseline = h.backend.upload_count();

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        let staged = handle_stage_path(&h);

        // First event is the staged write itself; second is a real edit.
        std::fs::write(&staged, b"draft, edited").unwrap();
        assert!(h.watcher.emit(&staged));
        assert!(h.watcher.emit(&staged));
        h.wait_for_uploads(baseline + 1).await;
        assert_eq!(h.remote_plaintext(&file).await, b"draft, edited");

        h.close(&file);
        let report = handle.wait().await.unwrap();
        // One edit plus the final flush
        assert_eq!(report.uploads, 2);
        assert_eq!(h.backend.upload_count(), baseline + 2);
    }

    #[tokio::test]
    async fn test_close_without_events_still_flushes() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"untouched").await;
        let baseline = h.backend.upload_count();

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        std::fs::write(handle_stage_path(&h), b"saved right before closing").unwrap();

        h.close(&file);
        let report = handle.wait().await.unwrap();

        assert_eq!(report.uploads, 1);
        assert_eq!(h.backend.upload_count(), baseline + 1);
        assert_eq!(h.remote_plaintext(&file).await, b"saved right before closing");
        assert!(h.log.refreshes().contains(&"docs".to_string()));
        assert_eq!(
            h.log.messages(Severity::Success),
            vec!["The file report.txt is processed successfully"]
        );
    }

    #[tokio::test]
    async fn test_view_only_file_is_never_uploaded() {
        let h = Harness::new().await;
        let file = h.seed("scan.pdf", b"%PDF-1.7").await;
        let baseline = h.backend.upload_count();

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        let staged = h.dir.path().join("share-sync/docs/scan.pdf");
        assert!(!h.watcher.is_watching(&staged));

        h.close(&file);
        let report = handle.wait().await.unwrap();
        assert!(!report.editable);
        assert_eq!(report.uploads, 0);
        assert_eq!(h.backend.upload_count(), baseline);
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_poll_keeps_session_alive_while_open() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"x").await;

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;

        for _ in 0..3 {
            assert!(h.clock.tick(&file.path()));
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.detector.calls() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!handle.is_finished());

        h.close(&file);
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_detector_errors_keep_session_open() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"x").await;

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;

        h.detector.set_error("lsof missing");
        assert!(h.clock.tick(&file.path()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.detector.calls() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            h.service.session_state(&file),
            Some(SessionState::Watching)
        );

        h.close(&file);
        handle.wait().await.unwrap();
    }

    /// Write `content` to the staged copy and report the change.
    fn emit_edit(h: &Harness, staged: &std::path::Path, content: &[u8]) {
        std::fs::write(staged, content).unwrap();
        assert!(h.watcher.emit(staged));
    }

    async fn wait_for_messages(h: &Harness, severity: Severity, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.log.messages(severity).len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message never arrived");
    }

    #[tokio::test]
    async fn test_offline_edit_is_rejected_then_uploaded_when_back_online() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"online copy").await;
        let baseline = h.backend.upload_count();

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        let staged = handle_stage_path(&h);
        assert!(h.watcher.emit(&staged));

        h.service.connectivity().set_online(false);
        emit_edit(&h, &staged, b"offline edit");
        wait_for_messages(&h, Severity::Warning, 1).await;
        assert_eq!(
            h.log.messages(Severity::Warning),
            vec!["Cannot edit report.txt while offline"]
        );
        assert_eq!(h.backend.upload_count(), baseline);

        h.service.connectivity().set_online(true);
        emit_edit(&h, &staged, b"edited again online");
        h.wait_for_uploads(baseline + 1).await;
        assert_eq!(h.backend.upload_count(), baseline + 1);
        assert_eq!(h.remote_plaintext(&file).await, b"edited again online");

        h.close(&file);
        let report = handle.wait().await.unwrap();
        assert_eq!(report.uploads, 2);
        assert_eq!(report.offline_rejections, 1);
        assert_eq!(h.backend.upload_count(), baseline + 2);
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_offline_close_keeps_copy_and_reopen_resumes_it() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"remote").await;
        let baseline = h.backend.upload_count();

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        let staged = handle_stage_path(&h);
        assert!(h.watcher.emit(&staged));

        h.service.connectivity().set_online(false);
        emit_edit(&h, &staged, b"offline work");
        wait_for_messages(&h, Severity::Warning, 1).await;

        h.close(&file);
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, ShareError::OfflineEditRejected(_)));
        assert_eq!(h.backend.upload_count(), baseline);
        assert_eq!(h.remote_plaintext(&file).await, b"remote");
        assert_eq!(std::fs::read(&staged).unwrap(), b"offline work");
        assert!(h.service.active_sessions().is_empty());

        // Reopening must not overwrite the kept copy with the remote one.
        h.service.connectivity().set_online(true);
        h.detector.set_open(true);
        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        assert_eq!(std::fs::read(&staged).unwrap(), b"offline work");
        assert_eq!(h.opener.opened(), vec![staged.clone(), staged.clone()]);
        assert_eq!(
            h.log.messages(Severity::Warning).last().map(String::as_str),
            Some("Reopening unsaved local changes to report.txt")
        );

        h.close(&file);
        let report = handle.wait().await.unwrap();
        assert!(report.resumed);
        assert!(!report.staged_kept);
        assert_eq!(report.uploads, 1);
        assert_eq!(h.remote_plaintext(&file).await, b"offline work");
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_kept_copy_survives_a_failed_resume() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"remote").await;
        let staged = h.dir.path().join("share-sync/docs/report.txt");
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(&staged, b"left from last time").unwrap();
        h.opener.set_failure(Some("no default application"));

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(err, ShareError::Launch(_)));
        assert_eq!(std::fs::read(&staged).unwrap(), b"left from last time");
        assert_eq!(h.remote_plaintext(&file).await, b"remote");
    }

    #[tokio::test]
    async fn test_failed_mid_session_upload_is_retried_by_flush() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"v1").await;
        let baseline = h.backend.upload_count();

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        h.wait_for(&file, SessionState::Watching).await;
        let staged = handle_stage_path(&h);

        h.backend.set_failure(Some("connection reset"));
        std::fs::write(&staged, b"v2").unwrap();
        assert!(h.watcher.emit(&staged));
        assert!(h.watcher.emit(&staged));
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.log.messages(Severity::Error).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.backend.upload_count(), baseline);

        h.backend.set_failure(None);
        h.close(&file);
        let report = handle.wait().await.unwrap();
        assert_eq!(report.uploads, 1);
        assert_eq!(h.remote_plaintext(&file).await, b"v2");
    }

    #[tokio::test]
    async fn test_undecryptable_payload_releases_everything() {
        let h = Harness::new().await;
        h.service
            .store()
            .upload_bytes("docs", "bad.txt.enc", b"not a payload")
            .await
            .unwrap();
        let file = FileIdentity::new("docs", "bad.txt.enc.gz");

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(err, ShareError::UnsupportedFormat(ref name) if name == "bad.txt"));
        assert_eq!(
            h.log.messages(Severity::Error),
            vec!["The file bad.txt is not supported"]
        );
        assert!(h.opener.opened().is_empty());
        assert!(h.service.active_sessions().is_empty());
        assert!(!h.dir.path().join("share-sync/docs/bad.txt").exists());
    }

    #[tokio::test]
    async fn test_launch_failure_cleans_up() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"x").await;
        h.opener.set_failure(Some("no default application"));

        let handle = h.service.open_remote_file(file.clone()).unwrap();
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(err, ShareError::Launch(_)));
        assert!(!h.dir.path().join("share-sync/docs/report.txt").exists());
        assert!(h.service.open_remote_file(file).is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_rejected_up_front() {
        let h = Harness::new().await;
        h.backend.set_failure(Some("must not be called"));

        let err = h
            .service
            .open_remote_file(FileIdentity::new("docs", "setup.exe.enc.gz"))
            .err()
            .unwrap();
        assert!(matches!(err, ShareError::UnsupportedExtension(ref name) if name == "setup.exe"));

        let err = h
            .service
            .open_remote_file(FileIdentity::new("docs", "plain.txt"))
            .err()
            .unwrap();
        assert!(matches!(err, ShareError::UnsupportedExtension(_)));
        assert_eq!(h.log.messages(Severity::Error).len(), 2);
    }

    #[tokio::test]
    async fn test_missing_remote_file_is_a_store_error() {
        let h = Harness::new().await;
        let handle = h
            .service
            .open_remote_file(FileIdentity::new("docs", "gone.txt.enc.gz"))
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, ShareError::RemoteStore(_)));
    }

    // ==================== Caller operations ====================

    #[tokio::test]
    async fn test_upload_local_file_encrypts_and_refreshes() {
        let h = Harness::new().await;
        let local = h.dir.path().join("notes.md");
        std::fs::write(&local, b"# Notes").unwrap();

        let stored = h.service.upload_local_file(&local, "docs").await.unwrap();
        assert_eq!(stored, "notes.md.enc.gz");

        let file = FileIdentity::new("docs", &stored);
        assert_eq!(h.remote_plaintext(&file).await, b"# Notes");
        assert_eq!(h.log.refreshes(), vec!["docs"]);
        assert_eq!(
            h.log.messages(Severity::Success),
            vec!["The file notes.md is uploaded successfully"]
        );
        assert!(!h.service.staging().root().join(".outbox/notes.md.enc").exists());
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_reports_error() {
        let h = Harness::new().await;
        let err = h
            .service
            .upload_local_file(&h.dir.path().join("nope.txt"), "docs")
            .await
            .unwrap_err();

        assert!(matches!(err, ShareError::StagingIo { .. }));
        assert_eq!(h.log.messages(Severity::Error).len(), 1);
        assert!(h.log.refreshes().is_empty());
    }

    #[tokio::test]
    async fn test_directory_operations_refresh_parent() {
        let h = Harness::new().await;

        let created = h.service.create_remote_directory("docs", "2024").await.unwrap();
        assert_eq!(created, "docs/2024");

        let tree = h.service.remote_directory_tree("docs").await.unwrap();
        let docs = tree.iter().find(|n| n.label == "docs").unwrap();
        assert_eq!(docs.children[0].path, "docs/2024");

        h.service.delete_remote_directory("docs/2024").await.unwrap();
        assert!(h.service.list_remote_directory("docs").await.unwrap().is_empty());

        assert_eq!(h.log.refreshes(), vec!["docs", "docs"]);
        assert_eq!(h.log.messages(Severity::Success).len(), 2);
    }

    #[tokio::test]
    async fn test_delete_remote_file() {
        let h = Harness::new().await;
        let file = h.seed("report.txt", b"x").await;

        h.service.delete_remote_file(&file).await.unwrap();
        assert!(h.backend.raw(DOC).is_none());
        assert_eq!(
            h.log.messages(Severity::Success),
            vec!["The file report.txt is deleted successfully"]
        );

        let err = h.service.delete_remote_file(&file).await.unwrap_err();
        assert!(matches!(err, ShareError::RemoteStore(_)));
        assert_eq!(h.log.messages(Severity::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_is_locally_open_is_permissive() {
        let h = Harness::new().await;
        let path = h.dir.path().join("local.txt");

        assert!(h.service.is_locally_open(&path).await);
        h.detector.set_error("probe unavailable");
        assert!(!h.service.is_locally_open(&path).await);
    }

    fn handle_stage_path(h: &Harness) -> std::path::PathBuf {
        h.opener.opened().last().cloned().expect("nothing launched")
    }
}

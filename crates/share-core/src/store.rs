//! Remote store abstraction: directory and file operations over a blob store.
//!
//! Backends implement [`BlobBackend`] (raw bytes, one directory level at a
//! time). [`RemoteStore`] layers the share semantics on top:
//! - every upload is gzip-compressed and stored under a `.gz` name
//! - downloads of `.gz` names are inflated transparently
//! - failures carry the operation and path that failed
//!
//! Implementations:
//! - `InMemoryBackend` - For testing
//! - `DirectoryBackend` (in share-daemon) - A mounted share via tokio::fs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::codec::{self, CodecError};
use crate::formats::{compressed_name, local_name, COMPRESSED_SUFFIX};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Access denied: {0}")]
    Unauthorized(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Kind of object in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One object in a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub kind: EntryKind,
    /// Leaf name, unique within its directory
    pub name: String,
    /// Size in bytes (files only)
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            kind: EntryKind::File,
            name: name.into(),
            size: Some(size),
            last_modified,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Directory,
            name: name.into(),
            size: None,
            last_modified: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Address of a remote file: directory path plus leaf name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileIdentity {
    pub directory: String,
    pub name: String,
}

impl FileIdentity {
    pub fn new(directory: impl AsRef<str>, name: impl Into<String>) -> Self {
        Self {
            directory: normalize_path(directory.as_ref()),
            name: name.into(),
        }
    }

    /// Parse `dir/sub/name` into directory and leaf.
    pub fn parse(path: &str) -> Self {
        let path = normalize_path(path);
        match path.rsplit_once('/') {
            Some((dir, name)) => Self::new(dir, name),
            None => Self::new("", path),
        }
    }

    /// Full `/`-joined path.
    pub fn path(&self) -> String {
        join_path(&self.directory, &self.name)
    }

    /// Path of the local working copy relative to the staging root.
    /// `x.enc` and `x.enc.gz` stage to the same file, so this is the
    /// session guard key.
    pub fn session_key(&self) -> String {
        join_path(&self.directory, local_name(&self.name))
    }

    pub fn directory_segments(&self) -> impl Iterator<Item = &str> {
        self.directory.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Node of the lazily expanded navigation tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryNode {
    pub label: String,
    pub path: String,
    /// Only populated along the requested branch
    pub children: Vec<DirectoryNode>,
    /// Nesting depth, root level is 0
    pub level: usize,
}

/// Store operation, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    List,
    Download,
    Upload,
    Delete,
    CreateDirectory,
    DeleteDirectory,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::List => "list",
            StoreOp::Download => "download",
            StoreOp::Upload => "upload",
            StoreOp::Delete => "delete",
            StoreOp::CreateDirectory => "create directory",
            StoreOp::DeleteDirectory => "delete directory",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StoreCause {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Local file error: {0}")]
    LocalIo(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("Remote store {operation} failed for '{path}': {cause}")]
pub struct StoreError {
    pub operation: StoreOp,
    pub path: String,
    #[source]
    pub cause: StoreCause,
}

impl StoreError {
    fn new(operation: StoreOp, path: impl Into<String>, cause: impl Into<StoreCause>) -> Self {
        Self {
            operation,
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// Whether the stored bytes themselves were unreadable.
    pub fn is_corrupt_payload(&self) -> bool {
        matches!(self.cause, StoreCause::Codec(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Raw blob store reached over some transport.
///
/// Paths are `/`-joined, relative to the collection root, without
/// leading or trailing slashes.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// List one directory level
    async fn list(&self, dir: &str) -> std::result::Result<Vec<RemoteEntry>, BackendError>;

    /// Fetch file contents
    async fn get(&self, path: &str) -> std::result::Result<Vec<u8>, BackendError>;

    /// Create or overwrite a file
    async fn put(&self, path: &str, content: &[u8]) -> std::result::Result<(), BackendError>;

    /// Delete a file
    async fn delete(&self, path: &str) -> std::result::Result<(), BackendError>;

    /// Create a directory (parent must exist)
    async fn create_dir(&self, path: &str) -> std::result::Result<(), BackendError>;

    /// Delete a directory; non-empty behaviour is backend-defined
    async fn delete_dir(&self, path: &str) -> std::result::Result<(), BackendError>;
}

#[async_trait]
impl<T: BlobBackend + ?Sized> BlobBackend for Arc<T> {
    async fn list(&self, dir: &str) -> std::result::Result<Vec<RemoteEntry>, BackendError> {
        (**self).list(dir).await
    }

    async fn get(&self, path: &str) -> std::result::Result<Vec<u8>, BackendError> {
        (**self).get(path).await
    }

    async fn put(&self, path: &str, content: &[u8]) -> std::result::Result<(), BackendError> {
        (**self).put(path, content).await
    }

    async fn delete(&self, path: &str) -> std::result::Result<(), BackendError> {
        (**self).delete(path).await
    }

    async fn create_dir(&self, path: &str) -> std::result::Result<(), BackendError> {
        (**self).create_dir(path).await
    }

    async fn delete_dir(&self, path: &str) -> std::result::Result<(), BackendError> {
        (**self).delete_dir(path).await
    }
}

/// Directory/file semantics over a [`BlobBackend`].
pub struct RemoteStore<B> {
    backend: B,
}

impl<B: BlobBackend> RemoteStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// List one directory level. Never recurses.
    pub async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let dir = normalize_path(dir);
        let mut entries = self
            .backend
            .list(&dir)
            .await
            .map_err(|e| StoreError::new(StoreOp::List, &dir, e))?;
        entries.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Root-level directories, with children filled in only along `path`.
    ///
    /// The walk stops at the first segment that does not exist.
    pub async fn directory_tree(&self, path: &str) -> Result<Vec<DirectoryNode>> {
        let mut root = self.list_directories("", 0).await?;

        let mut current = &mut root;
        let mut prefix = String::new();
        for (depth, segment) in normalize_path(path)
            .split('/')
            .filter(|s| !s.is_empty())
            .enumerate()
        {
            let Some(node) = current.iter_mut().find(|node| node.label == segment) else {
                debug!("Directory '{}' not found under '{}'", segment, prefix);
                break;
            };
            prefix = node.path.clone();
            node.children = self.list_directories(&prefix, depth + 1).await?;
            current = &mut node.children;
        }

        Ok(root)
    }

    async fn list_directories(&self, dir: &str, level: usize) -> Result<Vec<DirectoryNode>> {
        Ok(self
            .list(dir)
            .await?
            .into_iter()
            .filter(RemoteEntry::is_dir)
            .map(|entry| DirectoryNode {
                path: join_path(dir, &entry.name),
                label: entry.name,
                children: Vec::new(),
                level,
            })
            .collect())
    }

    /// Fetch a file, inflating it if its name carries the `.gz` suffix.
    pub async fn download(&self, file: &FileIdentity) -> Result<Vec<u8>> {
        let path = file.path();
        let raw = self
            .backend
            .get(&path)
            .await
            .map_err(|e| StoreError::new(StoreOp::Download, &path, e))?;

        if file.name.ends_with(COMPRESSED_SUFFIX) {
            codec::decompress(&raw).map_err(|e| StoreError::new(StoreOp::Download, &path, e))
        } else {
            Ok(raw)
        }
    }

    /// Compress a local file and store it under `<name>.gz`.
    ///
    /// Returns the stored name. Re-uploading the same name overwrites.
    pub async fn upload(&self, dir: &str, name: &str, local_path: &Path) -> Result<String> {
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| StoreError::new(StoreOp::Upload, join_path(dir, name), e))?;
        self.upload_bytes(dir, name, &content).await
    }

    /// Compress bytes and store them under `<name>.gz`.
    pub async fn upload_bytes(&self, dir: &str, name: &str, content: &[u8]) -> Result<String> {
        let stored_name = compressed_name(name);
        let path = join_path(&normalize_path(dir), &stored_name);

        let compressed =
            codec::compress(content).map_err(|e| StoreError::new(StoreOp::Upload, &path, e))?;
        self.backend
            .put(&path, &compressed)
            .await
            .map_err(|e| StoreError::new(StoreOp::Upload, &path, e))?;

        debug!("Uploaded {} ({} bytes compressed)", path, compressed.len());
        Ok(stored_name)
    }

    pub async fn delete(&self, file: &FileIdentity) -> Result<()> {
        let path = file.path();
        self.backend
            .delete(&path)
            .await
            .map_err(|e| StoreError::new(StoreOp::Delete, &path, e))
    }

    pub async fn create_directory(&self, parent: &str, name: &str) -> Result<String> {
        let path = join_path(&normalize_path(parent), name.trim_matches('/'));
        self.backend
            .create_dir(&path)
            .await
            .map_err(|e| StoreError::new(StoreOp::CreateDirectory, &path, e))?;
        Ok(path)
    }

    pub async fn delete_directory(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        self.backend
            .delete_dir(&path)
            .await
            .map_err(|e| StoreError::new(StoreOp::DeleteDirectory, &path, e))
    }
}

pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

pub fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

/// In-memory backend for testing. Records every `put`.
pub struct InMemoryBackend {
    files: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
    dirs: Mutex<BTreeSet<String>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    /// When set, every call fails with this transport error
    failure: Mutex<Option<String>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(dirs),
            uploads: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (None restores service).
    pub fn set_failure(&self, failure: Option<&str>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = failure.map(str::to_string);
    }

    /// Every `put` so far, in order: (path, stored bytes).
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Raw stored bytes, bypassing the failure switch.
    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize_path(path))
            .map(|(content, _)| content.clone())
    }

    fn check(&self) -> std::result::Result<(), BackendError> {
        match self.failure.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(message) => Err(BackendError::Transport(message.clone())),
            None => Ok(()),
        }
    }

    fn require_dir(&self, dir: &str) -> std::result::Result<(), BackendError> {
        if self
            .dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(dir)
        {
            Ok(())
        } else {
            Err(BackendError::NotFound(dir.to_string()))
        }
    }
}

#[async_trait]
impl BlobBackend for InMemoryBackend {
    async fn list(&self, dir: &str) -> std::result::Result<Vec<RemoteEntry>, BackendError> {
        self.check()?;
        let dir = normalize_path(dir);
        self.require_dir(&dir)?;

        let mut entries = Vec::new();
        for sub in self.dirs.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            if !sub.is_empty() && parent_path(sub) == dir {
                let name = sub.rsplit('/').next().unwrap_or(sub);
                entries.push(RemoteEntry::directory(name));
            }
        }
        for (path, (content, modified)) in self.files.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            if parent_path(path) == dir {
                let name = path.rsplit('/').next().unwrap_or(path);
                entries.push(RemoteEntry::file(name, content.len() as u64, Some(*modified)));
            }
        }
        Ok(entries)
    }

    async fn get(&self, path: &str) -> std::result::Result<Vec<u8>, BackendError> {
        self.check()?;
        let path = normalize_path(path);
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .map(|(content, _)| content.clone())
            .ok_or(BackendError::NotFound(path))
    }

    async fn put(&self, path: &str, content: &[u8]) -> std::result::Result<(), BackendError> {
        self.check()?;
        let path = normalize_path(path);
        self.require_dir(&parent_path(&path))?;

        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.clone(), (content.to_vec(), Utc::now()));
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((path, content.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &str) -> std::result::Result<(), BackendError> {
        self.check()?;
        let path = normalize_path(path);
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path)
            .map(|_| ())
            .ok_or(BackendError::NotFound(path))
    }

    async fn create_dir(&self, path: &str) -> std::result::Result<(), BackendError> {
        self.check()?;
        let path = normalize_path(path);
        self.require_dir(&parent_path(&path))?;

        let mut dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
        if !dirs.insert(path.clone()) {
            return Err(BackendError::AlreadyExists(path));
        }
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> std::result::Result<(), BackendError> {
        self.check()?;
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(BackendError::Unauthorized("cannot delete the root".to_string()));
        }

        let has_files = self
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .any(|file| parent_path(file) == path);
        let mut dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
        let has_dirs = dirs.iter().any(|dir| !dir.is_empty() && parent_path(dir) == path);
        if has_files || has_dirs {
            return Err(BackendError::NotEmpty(path));
        }
        if !dirs.remove(&path) {
            return Err(BackendError::NotFound(path));
        }
        Ok(())
    }
}

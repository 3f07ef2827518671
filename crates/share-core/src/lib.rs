//! share-core: engine for editing files kept encrypted on a remote share.
//!
//! This crate provides:
//! - Chunked AES-GCM payload codec with gzip transport compression
//! - Remote store adapter over a pluggable blob backend
//! - Local staging of working copies
//! - Per-file edit sessions (watch, re-upload, close detection, flush)
//! - Events for the UI layer

pub mod clock;
pub mod codec;
pub mod config;
pub mod connectivity;
pub mod detector;
pub mod error;
pub mod events;
pub mod formats;
pub mod launcher;
pub mod registry;
pub mod service;
pub mod session;
pub mod staging;
pub mod store;
pub mod watch;

pub use clock::{IntervalClock, ManualClock, PollClock, PollTrigger};
pub use codec::{Codec, CodecError, Decoded, EncryptedPayload};
pub use config::{ConfigError, Configuration, EncryptionKey};
pub use connectivity::Connectivity;
pub use detector::{DetectorError, OpenFileDetector, ProbePolicy, ScriptedDetector};
pub use error::{Result, ShareError};
pub use events::{EventBus, EventLog, Severity, ShareEvent, Subscription};
pub use launcher::{FileOpener, LaunchError, RecordingOpener};
pub use registry::SessionRegistry;
pub use service::ShareService;
pub use session::{Collaborators, SessionHandle, SessionReport, SessionState};
pub use staging::StagingArea;
pub use store::{
    BackendError, BlobBackend, DirectoryNode, EntryKind, FileIdentity, InMemoryBackend,
    RemoteEntry, RemoteStore, StoreError,
};
pub use watch::{ChangeStream, ChangeWatcher, ManualWatcher, WatchError};

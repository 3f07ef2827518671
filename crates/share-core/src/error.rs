//! Error taxonomy surfaced to callers of the share engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;
use crate::detector::DetectorError;
use crate::launcher::LaunchError;
use crate::store::StoreError;
use crate::watch::WatchError;

#[derive(Debug, Error)]
pub enum ShareError {
    /// Network, auth or backend failure. Not retried.
    #[error(transparent)]
    RemoteStore(StoreError),

    /// The payload could not be decrypted or parsed. Not retried.
    #[error("The file {0} is not supported")]
    UnsupportedFormat(String),

    /// A session already holds this remote identity.
    #[error("The file {0} is already open")]
    AlreadyOpen(String),

    /// An edit happened while offline; nothing was uploaded.
    #[error("Cannot edit {0} while offline")]
    OfflineEditRejected(String),

    /// Local disk failure while staging.
    #[error("Staging error at {path}: {source}")]
    StagingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote name does not have an openable extension.
    #[error("The file {0} is not supported")]
    UnsupportedExtension(String),

    #[error(transparent)]
    Codec(CodecError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    /// The session task panicked or was cancelled.
    #[error("Session task failed: {0}")]
    TaskFailed(String),
}

impl ShareError {
    /// Map a store failure, classifying unreadable payloads as unsupported.
    pub fn from_store(err: StoreError, display_name: &str) -> Self {
        if err.is_corrupt_payload() {
            ShareError::UnsupportedFormat(display_name.to_string())
        } else {
            ShareError::RemoteStore(err)
        }
    }

    /// Map a codec failure for a named file.
    pub fn from_codec(err: CodecError, display_name: &str) -> Self {
        match err {
            CodecError::UnsupportedFormat(_) => {
                ShareError::UnsupportedFormat(display_name.to_string())
            }
            other => ShareError::Codec(other),
        }
    }
}

impl From<StoreError> for ShareError {
    fn from(err: StoreError) -> Self {
        let path = err.path.clone();
        ShareError::from_store(err, &path)
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;

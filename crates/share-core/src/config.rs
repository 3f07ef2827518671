//! Connection and credential bundle supplied by the caller.
//!
//! The core never writes this anywhere. The daemon loads it from a JSON
//! file; embedders build it directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroize;

use crate::codec::{DEFAULT_CHUNK_SIZE, DEFAULT_KDF_ITERATIONS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Symmetric passphrase. Redacted in debug output, wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptionKey(String);

impl EncryptionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Everything needed to reach the store and encrypt its contents.
#[derive(Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Store endpoint (for the directory backend: the mounted share root)
    pub endpoint: String,

    /// Store credential (account key or token) for authenticated
    /// backends. The mounted-directory backend has no authentication and
    /// ignores it.
    #[serde(default)]
    pub credential: String,

    /// Collection (share) inside the store
    pub collection: String,

    /// Passphrase used for every payload
    pub encryption_key: EncryptionKey,

    /// Root under which staged working copies are created
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Plaintext data-URL bytes per encrypted chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// PBKDF2 rounds for deriving the chunk key
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Seconds between "is the file still open" probes
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Debounce window for staged-file change events, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credential = if self.credential.is_empty() { "" } else { "***" };
        f.debug_struct("Configuration")
            .field("endpoint", &self.endpoint)
            .field("credential", &credential)
            .field("collection", &self.collection)
            .field("encryption_key", &self.encryption_key)
            .field("staging_root", &self.staging_root)
            .field("chunk_size", &self.chunk_size)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("debounce_ms", &self.debounce_ms)
            .finish()
    }
}

fn default_staging_root() -> PathBuf {
    std::env::temp_dir()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_debounce_ms() -> u64 {
    200
}

impl Configuration {
    /// Minimal configuration with defaults for every tunable.
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        encryption_key: EncryptionKey,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: String::new(),
            collection: collection.into(),
            encryption_key,
            staging_root: default_staging_root(),
            chunk_size: default_chunk_size(),
            kdf_iterations: default_kdf_iterations(),
            poll_interval_secs: default_poll_interval_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Configuration =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.staging_root = expand_tilde(&config.staging_root.to_string_lossy());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("endpoint"));
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Missing("collection"));
        }
        if self.encryption_key.is_empty() {
            return Err(ConfigError::Missing("encryption_key"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.kdf_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "kdf_iterations",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

use std::path::PathBuf;

use thiserror::Error;

/// Failures of a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock '{path}': {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the restore or write pipeline. Never surfaced to the code
/// that mutated the state; they are logged where they happen.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to serialize state for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to deserialize stored state for '{key}': {source}")]
    Deserialize {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to encrypt state for '{key}': {source}")]
    Encrypt {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to decrypt stored state for '{key}': {source}")]
    Decrypt {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Stored state for '{key}' is not an object")]
    NotAnObject { key: String },

    #[error("Restore hook rejected state for '{key}': {source}")]
    Hook {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

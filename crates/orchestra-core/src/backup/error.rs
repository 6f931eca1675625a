use std::io;

use thiserror::Error;

use crate::cas::CasError;

/// Backup manager errors.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A target could not be read; nothing was written.
    #[error("cannot read {path} for backup: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot write backup {id}: {source}")]
    Write {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid backup path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("corrupt manifest in backup {id}: {reason}")]
    CorruptManifest { id: String, reason: String },

    #[error("backup object store: {0}")]
    Cas(#[from] CasError),
}

pub type Result<T> = std::result::Result<T, BackupError>;

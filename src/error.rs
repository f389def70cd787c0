// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Steward
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Revision store unreadable or unwritable
    #[error("Failed to access history storage at {path}: {reason}")]
    StorageAccess { path: PathBuf, reason: String },

    /// Malformed manifest, channel, or provisioning file
    #[error("Failed to parse metadata file {path}: {reason}")]
    MetadataParse { path: PathBuf, reason: String },

    /// Artifact resolver failure
    #[error("Failed to resolve artifact {coordinate}: {reason}")]
    ArtifactResolution { coordinate: String, reason: String },

    /// Provisioning engine failure during build or merge
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Precondition violation reported to the caller, no state mutated
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Metadata bundle missing one of its required entries
    #[error("Metadata bundle {path} is missing entry: {entry}")]
    IncompleteBundle { path: PathBuf, entry: String },

    /// Revision lookup failure
    #[error("Revision '{0}' not found in history")]
    RevisionNotFound(String),

    /// Download errors from remote repositories
    #[error("Download error: {0}")]
    Download(String),

    /// Checksum verification failure
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl Error {
    /// Wrap a lower-level failure as a storage access error with path context
    pub fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::StorageAccess {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Wrap a lower-level failure as a parse error with the offending path
    pub fn parse(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::MetadataParse {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias using Steward's Error type
pub type Result<T> = std::result::Result<T, Error>;

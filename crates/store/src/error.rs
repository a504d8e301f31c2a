//! Error types for the storage backends.

use std::path::PathBuf;

/// Errors that can occur when working with a storage backend.
///
/// Expected absence and CAS conflicts are not errors: query operations
/// surface them as `Ok(None)` / `Ok(false)` and gated writes as
/// `Ok(false)`. Everything here is a genuinely unexpected condition.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Metadata (de)serialization error
    #[error("metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Identifier failed validation
    #[error("invalid content id: {0}")]
    InvalidId(String),

    /// Media type failed validation
    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    /// A conflict token was presented to a backend that did not mint it
    #[error("conflict token was minted by a different backend")]
    ForeignToken,

    /// The object store returned no etag, so the object cannot be CASed
    #[error("object store returned no etag for '{0}'")]
    MissingEtag(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Gave up waiting for the advisory lock on a path
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(PathBuf),

    /// The operation was cancelled while suspended
    #[error("operation cancelled")]
    Cancelled,

    /// Wrapper-internal failure (key derivation, codec fault, ...)
    #[error("backend error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, StoreError>;

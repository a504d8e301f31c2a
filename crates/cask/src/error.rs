//! Error types for the frontend.

/// Errors surfaced by the [`Cask`](crate::Cask) frontend.
#[derive(Debug, thiserror::Error)]
pub enum CaskError {
    /// Backend failure
    #[error("storage error: {0}")]
    Store(#[from] cask_store::StoreError),

    /// Tag record failed to encode
    #[error("tag encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blob read as a tag record did not validate
    #[error("invalid tag record at {0}")]
    InvalidTag(String),

    /// A name-pointer slot held something other than a content id
    #[error("invalid name pointer at {0}")]
    InvalidPointer(String),

    /// Content requested as text was not UTF-8
    #[error("content is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Result type alias for frontend operations.
pub type Result<T> = std::result::Result<T, CaskError>;

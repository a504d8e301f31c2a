//! Backend configuration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::bucket::BucketBackend;
use crate::error::Result;
use crate::files::FilesBackend;
use crate::memory::MemoryBackend;

/// Configuration for a base backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Files {
        /// Base directory for the sharded tree
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    Bucket {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
        /// Key prefix inside the bucket, normalized to end in `/`
        prefix: Option<String>,
    },
}

impl BackendConfig {
    /// Build the configured backend.
    pub async fn build(&self) -> Result<Arc<dyn Backend>> {
        Ok(match self {
            BackendConfig::Memory => Arc::new(MemoryBackend::new()),
            BackendConfig::Files { path } => Arc::new(FilesBackend::new(path).await?),
            BackendConfig::Bucket {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
                prefix,
            } => Arc::new(BucketBackend::s3(
                endpoint,
                access_key,
                secret_key,
                bucket,
                region.as_deref(),
                prefix.as_deref().unwrap_or_default(),
            )?),
        })
    }
}

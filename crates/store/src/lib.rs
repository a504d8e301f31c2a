//! Content-addressable storage backends.
//!
//! Every backend stores opaque byte blobs under a [`ContentId`] together
//! with a [`MediaType`] and the hash of the bytes as stored. Writes are
//! gated by optimistic [`ConflictToken`]s: a tokenless write only creates,
//! a tokened write only replaces the exact version the token witnessed.
//! The same contract is implemented by an in-process map, a sharded
//! filesystem tree and an S3-style object store, so stacks can be swapped
//! or wrapped without the caller noticing.

pub mod backend;
pub mod bucket;
pub mod config;
pub mod error;
pub mod files;
pub mod id;
pub mod lock;
pub mod media_type;
pub mod memory;
pub mod token;

pub use backend::{Backend, ByteStream, Object};
pub use bucket::BucketBackend;
pub use config::BackendConfig;
pub use error::{Result, StoreError};
pub use files::FilesBackend;
pub use id::ContentId;
pub use lock::PathLock;
pub use media_type::MediaType;
pub use memory::MemoryBackend;
pub use token::{BackendId, ConflictToken};

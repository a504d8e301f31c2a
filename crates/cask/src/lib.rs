//! Mutable, versioned names over content-addressed storage.
//!
//! A [`Cask`] sits on top of any [`Backend`](cask_store::Backend) stack.
//! Blobs go in content-addressed (`push`/`pull`); names resolve through
//! a pointer slot to an immutable, append-only chain of [`Tag`] records,
//! so every version of a name stays reachable while updates contend on a
//! single compare-and-swap.

pub mod error;
pub mod repo;
pub mod tag;

pub use error::{CaskError, Result};
pub use repo::Cask;
pub use tag::Tag;

pub mod prelude {
    pub use crate::{Cask, CaskError, Tag};
    pub use cask_store::{
        Backend, BackendConfig, BucketBackend, ByteStream, ConflictToken, ContentId,
        FilesBackend, MediaType, MemoryBackend, Object, StoreError,
    };
}

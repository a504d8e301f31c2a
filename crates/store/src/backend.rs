//! The backend contract.

use std::fmt::Debug;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::id::ContentId;
use crate::media_type::MediaType;
use crate::token::{BackendId, ConflictToken};

/// Chunked byte stream flowing in or out of a backend.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A stored object: its bytes and the media type they were written with.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub content: Bytes,
    pub media_type: MediaType,
}

/// Uniform contract implemented by every storage node in a stack.
///
/// Base backends (memory, filesystem, object store) and wrapper backends
/// (compression, encryption) all expose the same surface, so any stack
/// composes with any other and the frontend never needs to know what it
/// is sitting on.
///
/// Expected absence surfaces as `Ok(None)` / `Ok(false)` and CAS
/// conflicts as `Ok(false)`; errors are reserved for genuinely
/// unexpected conditions. Operation futures are cancel-safe: dropping
/// one either leaves the resource untouched or fully written, never in
/// between.
///
/// # Write gating
///
/// `write(id, .., token)` succeeds iff
/// - `token` is `None` and the resource does not currently exist, or
/// - `token` is `Some` and the resource exists with a hash equal to the
///   token's witnessed value.
///
/// The check is atomic with the write. `delete` always requires a
/// matching token.
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Identity of this backend instance; the witness for token checks.
    fn id(&self) -> BackendId;

    /// Current conflict token for `id`, or `None` if absent.
    async fn token(&self, id: &ContentId) -> Result<Option<ConflictToken>>;

    /// Whether `id` currently holds an object.
    async fn exists(&self, id: &ContentId) -> Result<bool>;

    /// Enumerate stored ids. Ordering is unspecified and the listing may
    /// reflect a running snapshot.
    fn list(&self) -> BoxStream<'_, Result<ContentId>>;

    /// Media type of the object at `id`, or `None` if absent.
    async fn media_type(&self, id: &ContentId) -> Result<Option<MediaType>>;

    /// Hash of the object's bytes as stored (etag for object stores), or
    /// `None` if absent.
    async fn hash(&self, id: &ContentId) -> Result<Option<String>>;

    /// Read the object at `id`, or `None` if absent.
    async fn read(&self, id: &ContentId) -> Result<Option<Object>>;

    /// Token-gated write; see the trait docs for the success conditions.
    async fn write(
        &self,
        id: &ContentId,
        content: Bytes,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool>;

    /// Delete the object at `id` iff `token` witnesses its current hash.
    async fn delete(&self, id: &ContentId, token: &ConflictToken) -> Result<bool>;

    /// Stream the object's bytes, or `None` if absent.
    async fn read_stream(&self, id: &ContentId) -> Result<Option<ByteStream>>;

    /// Streaming variant of [`write`](Backend::write), consuming the body
    /// chunk by chunk. Token gating is identical.
    async fn write_stream(
        &self,
        id: &ContentId,
        content: ByteStream,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool>;

    /// Move the stored object (bytes, type and hash) from `source` to
    /// `target` without rehashing. Succeeds iff `source` exists and
    /// `target` does not.
    async fn rename(&self, source: &ContentId, target: &ContentId) -> Result<bool>;
}

/// Collect a byte stream into a single buffer.
pub async fn collect_stream(mut content: ByteStream) -> Result<Bytes> {
    use futures::StreamExt;

    let mut buf = Vec::new();
    while let Some(chunk) = content.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

/// Turn a buffer into a chunked byte stream.
pub fn chunked(content: Bytes, chunk_size: usize) -> ByteStream {
    Box::pin(async_stream::stream! {
        let mut rest = content;
        while rest.len() > chunk_size {
            yield Ok(rest.split_to(chunk_size));
        }
        if !rest.is_empty() {
            yield Ok(rest);
        }
    })
}

/// Default chunk size for streams backed by an in-memory buffer.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

//! The frontend: content addressing plus named, versioned entities.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use sha2::{Digest, Sha512};
use tracing::debug;
use uuid::Uuid;

use cask_store::{Backend, ByteStream, ConflictToken, ContentId, MediaType};

use crate::error::{CaskError, Result};
use crate::tag::Tag;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

/// Frontend over any backend stack.
///
/// Blobs are content-addressed: `push` stores bytes under the SHA-512 of
/// their content, so identical content converges on one id. Names are a
/// layer above: the slot at `ContentId::name(n)` holds the id of the
/// current [`Tag`] record, and every mutation appends a new tag pointing
/// at its predecessor before swinging that one mutable pointer with a
/// compare-and-swap.
///
/// Mutations never retry: a lost race surfaces as `false` and the caller
/// decides whether to refetch and try again. The loser's tag record
/// stays behind as an unreachable blob, which content addressing makes
/// harmless.
#[derive(Debug, Clone)]
pub struct Cask {
    backend: Arc<dyn Backend>,
}

impl Cask {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Cask { backend }
    }

    /// The backend stack this frontend sits on.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /* content addressing */

    /// Store a blob under the digest of its content. Returns the id, or
    /// `None` when a concurrent writer got between the token read and
    /// the write.
    pub async fn push(
        &self,
        content: impl Into<Bytes>,
        media_type: Option<MediaType>,
    ) -> Result<Option<ContentId>> {
        let content = content.into();
        let media_type = media_type.unwrap_or_default();
        let cid = ContentId::digest(&content);
        // rewriting an existing blob is a no-op with identical bytes,
        // but it still needs the current token to pass the gate
        let token = self.backend.token(&cid).await?;
        let written = self
            .backend
            .write(&cid, content, &media_type, token.as_ref())
            .await?;
        Ok(written.then(|| {
            debug!(cid = %cid, "blob pushed");
            cid
        }))
    }

    /// Read a blob back by id.
    pub async fn pull(&self, cid: &ContentId) -> Result<Option<Bytes>> {
        Ok(self.backend.read(cid).await?.map(|object| object.content))
    }

    /// Store a blob from a stream without knowing its digest up front.
    ///
    /// The body lands under a random temporary name while a hasher taps
    /// every chunk; only after the stream completes is the object
    /// renamed to its computed id, so a partial body is never visible
    /// under a final id. Returns `None` when publishing loses a race.
    pub async fn push_stream(
        &self,
        content: ByteStream,
        media_type: Option<MediaType>,
    ) -> Result<Option<ContentId>> {
        let media_type = media_type.unwrap_or_default();
        let tmp = ContentId::name(&Uuid::new_v4().to_string());

        let hasher = Arc::new(Mutex::new(Sha512::new()));
        let tap = hasher.clone();
        let tapped: ByteStream = Box::pin(content.map(move |chunk| {
            if let Ok(chunk) = &chunk {
                tap.lock().expect("hasher lock").update(chunk);
            }
            chunk
        }));

        if !self
            .backend
            .write_stream(&tmp, tapped, &media_type, None)
            .await?
        {
            return Ok(None);
        }
        let cid = ContentId::from_hasher(hasher.lock().expect("hasher lock").clone());

        if self.backend.rename(&tmp, &cid).await? {
            debug!(cid = %cid, "blob streamed in");
            return Ok(Some(cid));
        }
        // lost the publish race; the temporary must not linger
        if let Some(token) = self.backend.token(&tmp).await? {
            let _ = self.backend.delete(&tmp, &token).await?;
        }
        Ok(None)
    }

    /// Stream a blob back by id.
    pub async fn pull_stream(&self, cid: &ContentId) -> Result<Option<ByteStream>> {
        Ok(self.backend.read_stream(cid).await?)
    }

    /* names */

    /// Current tag record for `name`, or `None` if the name was never
    /// set.
    pub async fn tag(&self, name: &str) -> Result<Option<Tag>> {
        let nid = ContentId::name(name);
        let Some(tid) = self.pointer(&nid).await? else {
            return Ok(None);
        };
        self.read_tag(&tid).await
    }

    /// Walk the version history of `name`, newest first, ending at the
    /// first-ever tag (whose `pre` is `None`).
    pub fn tags<'a>(&'a self, name: &'a str) -> BoxStream<'a, Result<Tag>> {
        Box::pin(async_stream::try_stream! {
            let mut next = self.tag(name).await?;
            while let Some(tag) = next {
                let pre = tag.pre.clone();
                yield tag;
                next = match pre {
                    Some(tid) => self.read_tag(&tid).await?,
                    None => None,
                };
            }
        })
    }

    /// Whether `name` currently resolves to stored content. Tombstoned
    /// names read as absent.
    pub async fn has(&self, name: &str) -> Result<bool> {
        match self.tag(name).await? {
            Some(Tag { cid: Some(cid), .. }) => Ok(self.backend.exists(&cid).await?),
            _ => Ok(false),
        }
    }

    /// Content currently named `name`.
    pub async fn get(&self, name: &str) -> Result<Option<Bytes>> {
        match self.tag(name).await? {
            Some(Tag { cid: Some(cid), .. }) => self.pull(&cid).await,
            _ => Ok(None),
        }
    }

    /// Content currently named `name`, as UTF-8 text.
    pub async fn text(&self, name: &str) -> Result<Option<String>> {
        match self.get(name).await? {
            Some(content) => Ok(Some(String::from_utf8(content.to_vec())?)),
            None => Ok(None),
        }
    }

    /// Content currently named `name`, parsed as JSON.
    pub async fn json(&self, name: &str) -> Result<Option<serde_json::Value>> {
        match self.get(name).await? {
            Some(content) => Ok(Some(serde_json::from_slice(&content)?)),
            None => Ok(None),
        }
    }

    /// Token on the name's pointer slot, witnessing the version of
    /// `name` the caller believes is current. Not a token on the tag
    /// record or the content blob.
    pub async fn token(&self, name: &str) -> Result<Option<ConflictToken>> {
        Ok(self.backend.token(&ContentId::name(name)).await?)
    }

    /* mutation */

    /// Name `content` as `name`, appending a version to its history.
    pub async fn set(
        &self,
        name: &str,
        content: impl Into<Bytes>,
        media_type: Option<MediaType>,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let media_type = media_type.unwrap_or_default();
        let Some(cid) = self.push(content, Some(media_type.clone())).await? else {
            return Ok(false);
        };
        self.commit(name, Some(cid), media_type, token).await
    }

    /// Streaming variant of [`set`](Cask::set).
    pub async fn write_stream(
        &self,
        name: &str,
        content: ByteStream,
        media_type: Option<MediaType>,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let media_type = media_type.unwrap_or_default();
        let Some(cid) = self.push_stream(content, Some(media_type.clone())).await? else {
            return Ok(false);
        };
        self.commit(name, Some(cid), media_type, token).await
    }

    /// Make `target` point at the content currently named `source`.
    /// The source's own history is untouched.
    pub async fn copy(
        &self,
        source: &str,
        target: &str,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let Some(tag) = self.tag(source).await? else {
            return Ok(false);
        };
        let Some(cid) = tag.cid else {
            return Ok(false);
        };
        self.commit(target, Some(cid), tag.media_type, token).await
    }

    /// Tombstone `name`. The name reads as absent afterwards while
    /// `tags` still walks the prior history through the tombstone.
    pub async fn delete(&self, name: &str, token: Option<&ConflictToken>) -> Result<bool> {
        self.commit(name, None, MediaType::tombstone(), token).await
    }

    /* internals */

    /// The four-step mutation protocol: read the current pointer, append
    /// a tag record linking to it, then CAS the pointer onto the new
    /// tag. Steps are not serialized against other writers; the CAS is
    /// the only arbiter, and a loser's tag record is simply orphaned.
    async fn commit(
        &self,
        name: &str,
        cid: Option<ContentId>,
        media_type: MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let nid = ContentId::name(name);
        let pre = self.pointer(&nid).await?;
        let tag = Tag {
            name: name.to_string(),
            cid,
            media_type,
            date: now_ms(),
            pre,
        };
        let Some(tid) = self.push(tag.to_bytes()?, Some(MediaType::json())).await? else {
            return Ok(false);
        };
        let swapped = self
            .backend
            .write(
                &nid,
                Bytes::from(tid.to_string()),
                &MediaType::digest_pointer(),
                token,
            )
            .await?;
        debug!(name = %name, tid = %tid, swapped, "name commit");
        Ok(swapped)
    }

    /// Read the pointer slot body: the id of the current tag record.
    async fn pointer(&self, nid: &ContentId) -> Result<Option<ContentId>> {
        let Some(object) = self.backend.read(nid).await? else {
            return Ok(None);
        };
        let body = std::str::from_utf8(&object.content)
            .map_err(|_| CaskError::InvalidPointer(nid.to_string()))?;
        let tid = body
            .parse::<ContentId>()
            .map_err(|_| CaskError::InvalidPointer(nid.to_string()))?;
        Ok(Some(tid))
    }

    async fn read_tag(&self, tid: &ContentId) -> Result<Option<Tag>> {
        let Some(object) = self.backend.read(tid).await? else {
            return Ok(None);
        };
        Ok(Some(Tag::parse(tid, &object.content)?))
    }
}

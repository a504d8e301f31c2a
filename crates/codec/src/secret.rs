//! Password-based authenticated encryption wrapper.
//!
//! A master secret is derived from password and salt with
//! PBKDF2-HMAC-SHA-512. Each write seals the payload under a fresh
//! random data key and wraps that key under the master, producing
//!
//! ```text
//! "SKE:" ∥ enckey(48) ∥ keytag(16) ∥ ciphertext ∥ authtag(16)
//! ```
//!
//! Reads without the `SKE:` magic pass through unchanged, so data
//! written before the wrapper was applied stays readable. Failed
//! authentication reads as absent; the wrapper never throws over a
//! bad frame.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use tracing::warn;

use cask_store::backend::collect_stream;
use cask_store::{Backend, ByteStream, ContentId, ConflictToken, MediaType, Object, Result};
use cask_store::BackendId;

use crate::dek::{DataKey, DATA_KEY_LEN, SEALED_KEY_LEN, TAG_LEN};
use crate::frame::decrypt_stream;

/// Frame magic for password-sealed payloads.
pub const SECRET_MAGIC: &[u8] = b"SKE:";

/// PBKDF2 iteration count for the master secret.
pub const PBKDF2_ROUNDS: u32 = 1000;

/// Magic plus the wrapped data key.
const HEADER_LEN: usize = SECRET_MAGIC.len() + SEALED_KEY_LEN;

/// Wrapper backend sealing payloads under a password-derived master
/// secret.
#[derive(Debug, Clone)]
pub struct SecretBackend {
    inner: Arc<dyn Backend>,
    master: DataKey,
}

impl SecretBackend {
    /// Derive the master secret and wrap `inner`.
    pub fn new(inner: Arc<dyn Backend>, password: &str, salt: &str) -> Self {
        let mut material = [0u8; DATA_KEY_LEN];
        pbkdf2_hmac::<Sha512>(
            password.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ROUNDS,
            &mut material,
        );
        SecretBackend {
            inner,
            master: material.into(),
        }
    }

    fn seal_frame(&self, content: &[u8]) -> Result<Vec<u8>> {
        let dek = DataKey::generate()?;
        let mut frame = Vec::with_capacity(HEADER_LEN + content.len() + TAG_LEN);
        frame.extend_from_slice(SECRET_MAGIC);
        frame.extend_from_slice(&self.master.seal(dek.as_bytes())?);
        frame.extend_from_slice(&dek.seal(content)?);
        Ok(frame)
    }

    /// Unwrap a full `SKE:` frame; `None` on any authentication or
    /// framing failure.
    fn open_frame(&self, stored: &[u8]) -> Option<Vec<u8>> {
        if stored.len() < HEADER_LEN + TAG_LEN || !stored.starts_with(SECRET_MAGIC) {
            return None;
        }
        let wrapped = &stored[SECRET_MAGIC.len()..HEADER_LEN];
        let dek = DataKey::from_slice(&self.master.open(wrapped)?)?;
        dek.open(&stored[HEADER_LEN..])
    }
}

#[async_trait]
impl Backend for SecretBackend {
    fn id(&self) -> BackendId {
        self.inner.id()
    }

    async fn token(&self, id: &ContentId) -> Result<Option<ConflictToken>> {
        self.inner.token(id).await
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        self.inner.exists(id).await
    }

    fn list(&self) -> BoxStream<'_, Result<ContentId>> {
        self.inner.list()
    }

    async fn media_type(&self, id: &ContentId) -> Result<Option<MediaType>> {
        self.inner.media_type(id).await
    }

    async fn hash(&self, id: &ContentId) -> Result<Option<String>> {
        self.inner.hash(id).await
    }

    async fn read(&self, id: &ContentId) -> Result<Option<Object>> {
        let Some(object) = self.inner.read(id).await? else {
            return Ok(None);
        };
        if !object.content.starts_with(SECRET_MAGIC) {
            // written before the wrapper was applied
            return Ok(Some(object));
        }
        match self.open_frame(&object.content) {
            Some(plain) => Ok(Some(Object {
                content: Bytes::from(plain),
                media_type: object.media_type,
            })),
            None => {
                warn!(id = %id, "frame failed authentication, reading as absent");
                Ok(None)
            }
        }
    }

    async fn write(
        &self,
        id: &ContentId,
        content: Bytes,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let frame = self.seal_frame(&content)?;
        self.inner
            .write(id, Bytes::from(frame), media_type, token)
            .await
    }

    async fn delete(&self, id: &ContentId, token: &ConflictToken) -> Result<bool> {
        self.inner.delete(id, token).await
    }

    async fn read_stream(&self, id: &ContentId) -> Result<Option<ByteStream>> {
        let Some(stream) = self.inner.read_stream(id).await? else {
            return Ok(None);
        };
        let this = self.clone();
        Ok(Some(decrypt_stream(stream, SECRET_MAGIC, move |frame| {
            this.open_frame(frame)
        })))
    }

    async fn write_stream(
        &self,
        id: &ContentId,
        content: ByteStream,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let content = collect_stream(content).await?;
        self.write(id, content, media_type, token).await
    }

    async fn rename(&self, source: &ContentId, target: &ContentId) -> Result<bool> {
        self.inner.rename(source, target).await
    }
}

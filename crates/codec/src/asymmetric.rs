//! Hybrid public-key encryption wrapper.
//!
//! Writes need only the RSA public key: the payload is sealed under a
//! fresh random data key and the data key is wrapped with RSA-OAEP.
//! Reads of framed data need the private key. The frame is
//!
//! ```text
//! "AKE:" ∥ u16_be(enckey_len) ∥ enckey ∥ ciphertext ∥ authtag(16)
//! ```
//!
//! with the length prefix covering the RSA-wrapped key, whose size
//! depends on the key length. Unframed data passes through unchanged.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::warn;

use cask_store::backend::collect_stream;
use cask_store::BackendId;
use cask_store::{Backend, ByteStream, ContentId, ConflictToken, MediaType, Object, Result};

use crate::dek::{DataKey, TAG_LEN};
use crate::frame::decrypt_stream;

/// Frame magic for hybrid-sealed payloads.
pub const ASYMMETRIC_MAGIC: &[u8] = b"AKE:";

/// Magic plus the big-endian length prefix.
const HEADER_LEN: usize = ASYMMETRIC_MAGIC.len() + 2;

/// Wrapper backend sealing payloads for an RSA keypair.
#[derive(Clone)]
pub struct AsymmetricBackend {
    inner: Arc<dyn Backend>,
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl fmt::Debug for AsymmetricBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricBackend")
            .field("inner", &self.inner)
            .field("can_decrypt", &self.private.is_some())
            .finish()
    }
}

impl AsymmetricBackend {
    /// Wrap `inner` with a full keypair; reads and writes both work.
    pub fn new(inner: Arc<dyn Backend>, private: RsaPrivateKey) -> Self {
        AsymmetricBackend {
            inner,
            public: private.to_public_key(),
            private: Some(private),
        }
    }

    /// Wrap `inner` with only the recipient's public key. Writes seal
    /// for the recipient; reads of framed data fail.
    pub fn encrypt_only(inner: Arc<dyn Backend>, public: RsaPublicKey) -> Self {
        AsymmetricBackend {
            inner,
            public,
            private: None,
        }
    }

    fn seal_frame(&self, content: &[u8]) -> Result<Vec<u8>> {
        let dek = DataKey::generate()?;
        let wrapped = self
            .public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), dek.as_bytes())
            .map_err(|e| anyhow!("key wrap error: {}", e))?;
        let len = u16::try_from(wrapped.len()).map_err(|_| anyhow!("wrapped key too long"))?;

        let mut frame = Vec::with_capacity(HEADER_LEN + wrapped.len() + content.len() + TAG_LEN);
        frame.extend_from_slice(ASYMMETRIC_MAGIC);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&wrapped);
        frame.extend_from_slice(&dek.seal(content)?);
        Ok(frame)
    }

    /// Unwrap a full `AKE:` frame; `None` on any authentication or
    /// framing failure.
    fn open_frame(private: &RsaPrivateKey, stored: &[u8]) -> Option<Vec<u8>> {
        if stored.len() < HEADER_LEN || !stored.starts_with(ASYMMETRIC_MAGIC) {
            return None;
        }
        let len = u16::from_be_bytes([stored[4], stored[5]]) as usize;
        let payload_at = HEADER_LEN + len;
        if stored.len() < payload_at + TAG_LEN {
            return None;
        }
        let material = private
            .decrypt(Oaep::new::<Sha256>(), &stored[HEADER_LEN..payload_at])
            .ok()?;
        let dek = DataKey::from_slice(&material)?;
        dek.open(&stored[payload_at..])
    }

    fn require_private(&self) -> Result<&RsaPrivateKey> {
        self.private
            .as_ref()
            .ok_or_else(|| anyhow!("private key required to decrypt").into())
    }
}

#[async_trait]
impl Backend for AsymmetricBackend {
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
        if !object.content.starts_with(ASYMMETRIC_MAGIC) {
            return Ok(Some(object));
        }
        let private = self.require_private()?;
        match Self::open_frame(private, &object.content) {
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
        let private = self.private.clone();
        Ok(Some(decrypt_stream(
            stream,
            ASYMMETRIC_MAGIC,
            move |frame| {
                let private = private.as_ref()?;
                Self::open_frame(private, frame)
            },
        )))
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

#[cfg(test)]
mod tests {
    use super::*;
    use cask_store::MemoryBackend;

    fn keypair() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut OsRng, 2048).unwrap()
    }

    fn wrapped() -> (AsymmetricBackend, Arc<MemoryBackend>) {
        let base = Arc::new(MemoryBackend::new());
        let wrapper = AsymmetricBackend::new(base.clone(), keypair());
        (wrapper, base)
    }

    #[test]
    fn frame_carries_key_length() {
        let (wrapper, _) = wrapped();
        let frame = wrapper.seal_frame(b"0123456789").unwrap();
        assert_eq!(&frame[..4], ASYMMETRIC_MAGIC);
        // 2048-bit RSA wraps to 256 bytes
        let len = u16::from_be_bytes([frame[4], frame[5]]) as usize;
        assert_eq!(len, 256);
        assert_eq!(frame.len(), 6 + len + 10 + 16);

        let private = wrapper.private.as_ref().unwrap();
        assert_eq!(
            AsymmetricBackend::open_frame(private, &frame).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn round_trip_through_memory() {
        let (wrapper, base) = wrapped();
        let id = ContentId::digest(b"hybrid");
        assert!(wrapper
            .write(&id, Bytes::from_static(b"hybrid"), &MediaType::text_plain(), None)
            .await
            .unwrap());

        let raw = base.read(&id).await.unwrap().unwrap();
        assert!(raw.content.starts_with(ASYMMETRIC_MAGIC));

        let object = wrapper.read(&id).await.unwrap().unwrap();
        assert_eq!(object.content, Bytes::from_static(b"hybrid"));
    }

    #[tokio::test]
    async fn unframed_data_passes_through_without_private_key() {
        let base = Arc::new(MemoryBackend::new());
        let public = keypair().to_public_key();
        let wrapper = AsymmetricBackend::encrypt_only(base.clone(), public);

        let id = ContentId::digest(b"legacy");
        base.write(&id, Bytes::from_static(b"legacy"), &MediaType::default(), None)
            .await
            .unwrap();
        let object = wrapper.read(&id).await.unwrap().unwrap();
        assert_eq!(object.content, Bytes::from_static(b"legacy"));
    }

    #[tokio::test]
    async fn framed_data_without_private_key_is_an_error() {
        let base = Arc::new(MemoryBackend::new());
        let private = keypair();
        let writer = AsymmetricBackend::new(base.clone(), private.clone());
        let reader = AsymmetricBackend::encrypt_only(base, private.to_public_key());

        let id = ContentId::digest(b"sealed");
        writer
            .write(&id, Bytes::from_static(b"sealed"), &MediaType::default(), None)
            .await
            .unwrap();
        assert!(reader.read(&id).await.is_err());
    }

    #[tokio::test]
    async fn tampered_frame_reads_as_absent() {
        let (wrapper, base) = wrapped();
        let id = ContentId::digest(b"tamper");
        wrapper
            .write(&id, Bytes::from_static(b"tamper"), &MediaType::default(), None)
            .await
            .unwrap();

        let raw = base.read(&id).await.unwrap().unwrap();
        let mut bent = raw.content.to_vec();
        bent[HEADER_LEN + 3] ^= 0x80;
        let token = base.token(&id).await.unwrap().unwrap();
        base.write(&id, Bytes::from(bent), &MediaType::default(), Some(&token))
            .await
            .unwrap();

        assert!(wrapper.read(&id).await.unwrap().is_none());
    }
}

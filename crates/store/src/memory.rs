//! In-process backend, the reference implementation of the contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use sha2::{Digest, Sha512};
use tokio::sync::RwLock;

use crate::backend::{collect_stream, chunked, Backend, ByteStream, Object, DEFAULT_CHUNK_SIZE};
use crate::error::Result;
use crate::id::ContentId;
use crate::media_type::MediaType;
use crate::token::{BackendId, ConflictToken};

#[derive(Debug, Clone)]
struct Stored {
    content: Bytes,
    media_type: MediaType,
    hash: String,
}

/// Map-backed backend. All operations are synchronous in substance and
/// exposed with asynchronous signatures for uniformity with the rest of
/// the contract.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    id: BackendId,
    inner: Arc<RwLock<HashMap<ContentId, Stored>>>,
}

impl MemoryBackend {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        MemoryBackend {
            id: BackendId::new(),
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn token(&self, id: &ContentId) -> Result<Option<ConflictToken>> {
        let map = self.inner.read().await;
        Ok(map
            .get(id)
            .map(|stored| ConflictToken::new(self.id, stored.hash.clone())))
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        Ok(self.inner.read().await.contains_key(id))
    }

    fn list(&self) -> BoxStream<'_, Result<ContentId>> {
        Box::pin(async_stream::stream! {
            let ids: Vec<ContentId> = self.inner.read().await.keys().cloned().collect();
            for id in ids {
                yield Ok(id);
            }
        })
    }

    async fn media_type(&self, id: &ContentId) -> Result<Option<MediaType>> {
        let map = self.inner.read().await;
        Ok(map.get(id).map(|stored| stored.media_type.clone()))
    }

    async fn hash(&self, id: &ContentId) -> Result<Option<String>> {
        let map = self.inner.read().await;
        Ok(map.get(id).map(|stored| stored.hash.clone()))
    }

    async fn read(&self, id: &ContentId) -> Result<Option<Object>> {
        let map = self.inner.read().await;
        Ok(map.get(id).map(|stored| Object {
            content: stored.content.clone(),
            media_type: stored.media_type.clone(),
        }))
    }

    async fn write(
        &self,
        id: &ContentId,
        content: Bytes,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let mut map = self.inner.write().await;
        let permitted = match (token, map.get(id)) {
            (None, None) => true,
            (Some(token), Some(current)) => token.value(self.id)? == current.hash,
            _ => false,
        };
        if !permitted {
            return Ok(false);
        }
        let hash = hex::encode(Sha512::digest(&content));
        map.insert(
            id.clone(),
            Stored {
                content,
                media_type: media_type.clone(),
                hash,
            },
        );
        Ok(true)
    }

    async fn delete(&self, id: &ContentId, token: &ConflictToken) -> Result<bool> {
        let mut map = self.inner.write().await;
        match map.get(id) {
            Some(current) if token.value(self.id)? == current.hash => {
                map.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read_stream(&self, id: &ContentId) -> Result<Option<ByteStream>> {
        let map = self.inner.read().await;
        Ok(map
            .get(id)
            .map(|stored| chunked(stored.content.clone(), DEFAULT_CHUNK_SIZE)))
    }

    async fn write_stream(
        &self,
        id: &ContentId,
        content: ByteStream,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        // buffer the whole body, then gate exactly like `write`
        let content = collect_stream(content).await?;
        self.write(id, content, media_type, token).await
    }

    async fn rename(&self, source: &ContentId, target: &ContentId) -> Result<bool> {
        let mut map = self.inner.write().await;
        if !map.contains_key(source) || map.contains_key(target) {
            return Ok(false);
        }
        // moved, not rehashed
        let stored = map.remove(source).expect("checked above");
        map.insert(target.clone(), stored);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let backend = MemoryBackend::new();
        let id = ContentId::digest(b"hello");

        assert!(backend
            .write(&id, Bytes::from_static(b"hello"), &MediaType::text_plain(), None)
            .await
            .unwrap());

        let object = backend.read(&id).await.unwrap().unwrap();
        assert_eq!(object.content, Bytes::from_static(b"hello"));
        assert_eq!(object.media_type, MediaType::text_plain());
        assert_eq!(
            backend.hash(&id).await.unwrap().unwrap(),
            ContentId::digest(b"hello").as_str()
        );
    }

    #[tokio::test]
    async fn tokenless_write_only_creates() {
        let backend = MemoryBackend::new();
        let id = ContentId::digest(b"v1");

        assert!(backend
            .write(&id, Bytes::from_static(b"v1"), &MediaType::default(), None)
            .await
            .unwrap());
        // second tokenless write on the same id loses
        assert!(!backend
            .write(&id, Bytes::from_static(b"v2"), &MediaType::default(), None)
            .await
            .unwrap());
        let object = backend.read(&id).await.unwrap().unwrap();
        assert_eq!(object.content, Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn cas_replaces_only_witnessed_version() {
        let backend = MemoryBackend::new();
        let id = ContentId::digest(b"v1");
        backend
            .write(&id, Bytes::from_static(b"v1"), &MediaType::default(), None)
            .await
            .unwrap();

        let token = backend.token(&id).await.unwrap().unwrap();
        assert!(backend
            .write(&id, Bytes::from_static(b"v2"), &MediaType::default(), Some(&token))
            .await
            .unwrap());

        // the consumed token no longer matches
        assert!(!backend
            .write(&id, Bytes::from_static(b"v3"), &MediaType::default(), Some(&token))
            .await
            .unwrap());
        let object = backend.read(&id).await.unwrap().unwrap();
        assert_eq!(object.content, Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn foreign_token_is_an_error() {
        let backend = MemoryBackend::new();
        let other = MemoryBackend::new();
        let id = ContentId::digest(b"data");
        backend
            .write(&id, Bytes::from_static(b"data"), &MediaType::default(), None)
            .await
            .unwrap();
        other
            .write(&id, Bytes::from_static(b"data"), &MediaType::default(), None)
            .await
            .unwrap();

        let foreign = other.token(&id).await.unwrap().unwrap();
        let result = backend
            .write(&id, Bytes::from_static(b"x"), &MediaType::default(), Some(&foreign))
            .await;
        assert!(matches!(result, Err(crate::StoreError::ForeignToken)));
    }

    #[tokio::test]
    async fn rename_moves_without_rehashing() {
        let backend = MemoryBackend::new();
        let source = ContentId::digest(b"payload");
        let target = ContentId::digest(b"elsewhere");
        backend
            .write(&source, Bytes::from_static(b"payload"), &MediaType::default(), None)
            .await
            .unwrap();
        let hash = backend.hash(&source).await.unwrap().unwrap();

        assert!(backend.rename(&source, &target).await.unwrap());
        assert!(!backend.exists(&source).await.unwrap());
        assert_eq!(backend.hash(&target).await.unwrap().unwrap(), hash);

        // source gone now, so a second rename fails
        assert!(!backend.rename(&source, &target).await.unwrap());
    }
}

//! Object-store backend (S3/MinIO compatible).
//!
//! Each id maps to a single object at `<prefix><fanout-path>`. The
//! server-supplied ETag is the authoritative hash and the CAS witness:
//! conditional writes ride the store's create-if-absent and
//! update-if-etag-matches modes, and precondition failures surface as an
//! ordinary `false`. The ETag is treated as an opaque comparable string
//! and never reinterpreted.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectMeta, ObjectStore, PutMode,
    PutOptions, UpdateVersion,
};
use tracing::{debug, warn};

use crate::backend::{collect_stream, Backend, ByteStream, Object};
use crate::error::{Result, StoreError};
use crate::id::ContentId;
use crate::media_type::MediaType;
use crate::token::{BackendId, ConflictToken};

/// Backend storing blobs in an S3-style object store.
#[derive(Debug, Clone)]
pub struct BucketBackend {
    id: BackendId,
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl BucketBackend {
    /// Wrap an object store, keying everything under `prefix`.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        BucketBackend {
            id: BackendId::new(),
            store,
            prefix,
        }
    }

    /// In-memory object store, for tests and ephemeral use.
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "")
    }

    /// Connect to an S3-compatible endpoint.
    pub fn s3(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        region: Option<&str>,
        prefix: &str,
    ) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_bucket_name(bucket)
            .with_region(region.unwrap_or("us-east-1"))
            .with_allow_http(endpoint.starts_with("http://"))
            .build()
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    fn object_path(&self, id: &ContentId) -> ObjectPath {
        let segments: Vec<&str> = id.path_segments().collect();
        ObjectPath::from(format!("{}{}", self.prefix, segments.join("/")))
    }

    fn etag(&self, meta: &ObjectMeta) -> Result<String> {
        meta.e_tag
            .clone()
            .ok_or_else(|| StoreError::MissingEtag(meta.location.to_string()))
    }

    async fn head(&self, id: &ContentId) -> Result<Option<ObjectMeta>> {
        match self.store.head(&self.object_path(id)).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Backend for BucketBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn token(&self, id: &ContentId) -> Result<Option<ConflictToken>> {
        match self.head(id).await? {
            Some(meta) => Ok(Some(ConflictToken::new(self.id, self.etag(&meta)?))),
            None => Ok(None),
        }
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        Ok(self.head(id).await?.is_some())
    }

    fn list(&self) -> BoxStream<'_, Result<ContentId>> {
        let prefix = (!self.prefix.is_empty())
            .then(|| ObjectPath::from(self.prefix.trim_end_matches('/').to_string()));
        Box::pin(async_stream::stream! {
            let mut entries = self.store.list(prefix.as_ref());
            while let Some(entry) = entries.next().await {
                match entry {
                    Ok(meta) => {
                        let name = meta.location.filename().unwrap_or_default();
                        match name.parse::<ContentId>() {
                            Ok(id) => yield Ok(id),
                            Err(_) => {
                                warn!(object = %meta.location, "unrecognized object in bucket, skipping")
                            }
                        }
                    }
                    Err(e) => yield Err(e.into()),
                }
            }
        })
    }

    async fn media_type(&self, id: &ContentId) -> Result<Option<MediaType>> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        match self.store.get_opts(&self.object_path(id), options).await {
            Ok(result) => match result.attributes.get(&Attribute::ContentType) {
                Some(value) => Ok(Some(value.parse()?)),
                None => Ok(Some(MediaType::default())),
            },
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn hash(&self, id: &ContentId) -> Result<Option<String>> {
        match self.head(id).await? {
            Some(meta) => Ok(Some(self.etag(&meta)?)),
            None => Ok(None),
        }
    }

    async fn read(&self, id: &ContentId) -> Result<Option<Object>> {
        match self
            .store
            .get_opts(&self.object_path(id), GetOptions::default())
            .await
        {
            Ok(result) => {
                let media_type = match result.attributes.get(&Attribute::ContentType) {
                    Some(value) => value.parse()?,
                    None => MediaType::default(),
                };
                let content = result.bytes().await?;
                Ok(Some(Object {
                    content,
                    media_type,
                }))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(
        &self,
        id: &ContentId,
        content: Bytes,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let mode = match token {
            None => PutMode::Create,
            Some(token) => PutMode::Update(UpdateVersion {
                e_tag: Some(token.value(self.id)?.to_string()),
                version: None,
            }),
        };
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(media_type.as_str().to_string()),
        );
        let options = PutOptions {
            mode,
            attributes,
            ..Default::default()
        };
        match self
            .store
            .put_opts(&self.object_path(id), content.into(), options)
            .await
        {
            Ok(_) => {
                debug!(id = %id, "object written");
                Ok(true)
            }
            // create raced an existing object, or the witnessed etag is
            // stale, or a tokened update found nothing to update
            Err(object_store::Error::AlreadyExists { .. })
            | Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &ContentId, token: &ConflictToken) -> Result<bool> {
        let value = token.value(self.id)?;
        let Some(meta) = self.head(id).await? else {
            return Ok(false);
        };
        if self.etag(&meta)? != value {
            return Ok(false);
        }
        match self.store.delete(&self.object_path(id)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_stream(&self, id: &ContentId) -> Result<Option<ByteStream>> {
        match self
            .store
            .get_opts(&self.object_path(id), GetOptions::default())
            .await
        {
            Ok(result) => {
                let stream = result
                    .into_stream()
                    .map(|chunk| chunk.map_err(std::io::Error::other));
                Ok(Some(Box::pin(stream)))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_stream(
        &self,
        id: &ContentId,
        content: ByteStream,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        // conditional multipart uploads are not a thing; buffer and put
        let content = collect_stream(content).await?;
        self.write(id, content, media_type, token).await
    }

    async fn rename(&self, source: &ContentId, target: &ContentId) -> Result<bool> {
        let src = self.object_path(source);
        let dst = self.object_path(target);
        match self.store.copy_if_not_exists(&src, &dst).await {
            Ok(()) => {}
            Err(object_store::Error::AlreadyExists { .. })
            | Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        // copy then delete; not atomic at the protocol level
        match self.store.delete(&src).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

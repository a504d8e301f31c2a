//! Filesystem backend.
//!
//! Each id maps to two sibling files under the base directory: the raw
//! bytes at `<base>/<fanout>/<id>` and a JSON sidecar at the same path
//! with a `.data` suffix carrying `{"type", "hash"}`. Tokenless writes
//! are exclusive-create, so an existing blob is never overwritten
//! without a witness; token-gated writes and deletes run under a
//! [`PathLock`] to make the compare and the rewrite one step.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, ByteStream, Object, DEFAULT_CHUNK_SIZE};
use crate::error::Result;
use crate::id::ContentId;
use crate::lock::PathLock;
use crate::media_type::MediaType;
use crate::token::{BackendId, ConflictToken};

/// Bound on waiting for the advisory lock during token-gated mutation.
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Sidecar metadata stored next to the bytes file.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    #[serde(rename = "type")]
    media_type: MediaType,
    hash: String,
}

/// Backend storing blobs as files in a sharded directory tree.
#[derive(Debug, Clone)]
pub struct FilesBackend {
    id: BackendId,
    root: PathBuf,
    cancel: CancellationToken,
}

impl FilesBackend {
    /// Open a backend rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(FilesBackend {
            id: BackendId::new(),
            root,
            cancel: CancellationToken::new(),
        })
    }

    /// Tie lock waits to an external cancellation token.
    pub fn cancelled_by(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn bytes_path(&self, id: &ContentId) -> PathBuf {
        id.path_segments()
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn sidecar_path(bytes_path: &Path) -> PathBuf {
        let mut name = bytes_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".data");
        bytes_path.with_file_name(name)
    }

    async fn read_sidecar(&self, id: &ContentId) -> Result<Option<Sidecar>> {
        let path = Self::sidecar_path(&self.bytes_path(id));
        match fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Exclusive-create of the bytes file; `Ok(None)` when it already
    /// exists.
    async fn create_bytes_file(&self, bytes_path: &Path) -> Result<Option<fs::File>> {
        if let Some(parent) = bytes_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(bytes_path)
            .await
        {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Exclusive-create of the sidecar. Rolls back the bytes file when
    /// the sidecar turns out to exist already.
    async fn create_sidecar(
        &self,
        bytes_path: &Path,
        media_type: &MediaType,
        hash: String,
    ) -> Result<bool> {
        let sidecar = Sidecar {
            media_type: media_type.clone(),
            hash,
        };
        let raw = serde_json::to_vec(&sidecar)?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(Self::sidecar_path(bytes_path))
            .await
        {
            Ok(mut file) => {
                file.write_all(&raw).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(bytes_path).await;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `token` witnesses the currently stored version of `id`.
    async fn token_matches(&self, id: &ContentId, token: &ConflictToken) -> Result<bool> {
        let value = token.value(self.id)?;
        Ok(match self.read_sidecar(id).await? {
            Some(sidecar) => sidecar.hash == value,
            None => false,
        })
    }

    async fn overwrite(
        &self,
        bytes_path: &Path,
        content: &[u8],
        media_type: &MediaType,
    ) -> Result<()> {
        let hash = hex::encode(Sha512::digest(content));
        fs::write(bytes_path, content).await?;
        let sidecar = Sidecar {
            media_type: media_type.clone(),
            hash,
        };
        fs::write(
            Self::sidecar_path(bytes_path),
            serde_json::to_vec(&sidecar)?,
        )
        .await?;
        Ok(())
    }
}

/// Drain `content` into `file`, returning the hex SHA-512 of the bytes
/// written.
async fn stream_to_file(mut file: fs::File, mut content: ByteStream) -> Result<String> {
    let mut hasher = Sha512::new();
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(hex::encode(hasher.finalize()))
}

#[async_trait]
impl Backend for FilesBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn token(&self, id: &ContentId) -> Result<Option<ConflictToken>> {
        Ok(self
            .read_sidecar(id)
            .await?
            .map(|sidecar| ConflictToken::new(self.id, sidecar.hash)))
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        match fs::metadata(self.bytes_path(id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> BoxStream<'_, Result<ContentId>> {
        let root = self.root.clone();
        Box::pin(async_stream::try_stream! {
            let mut pending = vec![root];
            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => Err(e)?,
                };
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        pending.push(entry.path());
                        continue;
                    }
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.ends_with(".data") {
                        continue;
                    }
                    match name.parse::<ContentId>() {
                        Ok(id) => yield id,
                        Err(_) => warn!(file = %name, "unrecognized entry in store tree, skipping"),
                    }
                }
            }
        })
    }

    async fn media_type(&self, id: &ContentId) -> Result<Option<MediaType>> {
        Ok(self.read_sidecar(id).await?.map(|sidecar| sidecar.media_type))
    }

    async fn hash(&self, id: &ContentId) -> Result<Option<String>> {
        Ok(self.read_sidecar(id).await?.map(|sidecar| sidecar.hash))
    }

    async fn read(&self, id: &ContentId) -> Result<Option<Object>> {
        let Some(sidecar) = self.read_sidecar(id).await? else {
            return Ok(None);
        };
        match fs::read(self.bytes_path(id)).await {
            Ok(content) => Ok(Some(Object {
                content: Bytes::from(content),
                media_type: sidecar.media_type,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
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
        let bytes_path = self.bytes_path(id);
        match token {
            None => {
                let Some(mut file) = self.create_bytes_file(&bytes_path).await? else {
                    return Ok(false);
                };
                file.write_all(&content).await?;
                file.flush().await?;
                let hash = hex::encode(Sha512::digest(&content));
                let created = self.create_sidecar(&bytes_path, media_type, hash).await?;
                debug!(id = %id, size = content.len(), created, "blob created");
                Ok(created)
            }
            Some(token) => {
                let _lock = PathLock::wait(&bytes_path, LOCK_TIMEOUT, &self.cancel).await?;
                if !self.token_matches(id, token).await? {
                    return Ok(false);
                }
                self.overwrite(&bytes_path, &content, media_type).await?;
                debug!(id = %id, size = content.len(), "blob replaced");
                Ok(true)
            }
        }
    }

    async fn delete(&self, id: &ContentId, token: &ConflictToken) -> Result<bool> {
        let bytes_path = self.bytes_path(id);
        let _lock = PathLock::wait(&bytes_path, LOCK_TIMEOUT, &self.cancel).await?;
        if !self.token_matches(id, token).await? {
            return Ok(false);
        }
        // already-gone counts as failure, not success
        for path in [bytes_path.clone(), Self::sidecar_path(&bytes_path)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        debug!(id = %id, "blob deleted");
        Ok(true)
    }

    async fn read_stream(&self, id: &ContentId) -> Result<Option<ByteStream>> {
        let file = match fs::File::open(self.bytes_path(id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stream = async_stream::stream! {
            let mut file = file;
            let mut buf = BytesMut::with_capacity(DEFAULT_CHUNK_SIZE);
            loop {
                match file.read_buf(&mut buf).await {
                    Ok(0) => {
                        if !buf.is_empty() {
                            yield Ok(buf.split().freeze());
                        }
                        break;
                    }
                    Ok(_) => {
                        if buf.len() >= DEFAULT_CHUNK_SIZE {
                            yield Ok(buf.split().freeze());
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Ok(Some(Box::pin(stream)))
    }

    async fn write_stream(
        &self,
        id: &ContentId,
        content: ByteStream,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let bytes_path = self.bytes_path(id);
        match token {
            None => {
                let Some(file) = self.create_bytes_file(&bytes_path).await? else {
                    return Ok(false);
                };
                let hash = stream_to_file(file, content).await?;
                self.create_sidecar(&bytes_path, media_type, hash).await
            }
            Some(token) => {
                let _lock = PathLock::wait(&bytes_path, LOCK_TIMEOUT, &self.cancel).await?;
                if !self.token_matches(id, token).await? {
                    return Ok(false);
                }
                let file = fs::File::create(&bytes_path).await?;
                let hash = stream_to_file(file, content).await?;
                let sidecar = Sidecar {
                    media_type: media_type.clone(),
                    hash,
                };
                fs::write(
                    Self::sidecar_path(&bytes_path),
                    serde_json::to_vec(&sidecar)?,
                )
                .await?;
                Ok(true)
            }
        }
    }

    async fn rename(&self, source: &ContentId, target: &ContentId) -> Result<bool> {
        let src = self.bytes_path(source);
        let dst = self.bytes_path(target);
        if !self.exists(source).await? || self.exists(target).await? {
            return Ok(false);
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&src, &dst).await?;
        match fs::rename(Self::sidecar_path(&src), Self::sidecar_path(&dst)).await {
            Ok(()) => {
                debug!(source = %source, target = %target, "blob renamed");
                Ok(true)
            }
            Err(e) => {
                // the pair must move together; undo the bytes move
                let _ = fs::rename(&dst, &src).await;
                Err(e.into())
            }
        }
    }
}

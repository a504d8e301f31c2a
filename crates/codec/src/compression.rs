//! Transparent compression wrapper.
//!
//! The codec is fixed at construction time and applied symmetrically:
//! the wrapper adds no header and does not detect uncompressed data, so
//! the same codec must sit on both ends of a given base backend for its
//! whole lifetime. Identifiers, tokens and hashes delegate untouched;
//! the inner backend sees compressed-sized blobs under the same ids.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use cask_store::backend::{chunked, collect_stream, DEFAULT_CHUNK_SIZE};
use cask_store::{Backend, ByteStream, ContentId, ConflictToken, MediaType, Object, Result};
use cask_store::{BackendId, StoreError};

/// Supported compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Deflate,
    Gzip,
    Brotli,
    Zstd,
}

impl Codec {
    /// Compress a whole buffer.
    pub fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Codec::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Codec::Brotli => {
                let mut input = data;
                let mut out = Vec::new();
                brotli::BrotliCompress(
                    &mut input,
                    &mut out,
                    &brotli::enc::BrotliEncoderParams::default(),
                )?;
                Ok(out)
            }
            Codec::Zstd => zstd::encode_all(data, zstd::DEFAULT_COMPRESSION_LEVEL),
        }
    }

    /// Decompress a whole buffer.
    pub fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Codec::Deflate => {
                let mut decoder = ZlibDecoder::new(Vec::new());
                decoder.write_all(data)?;
                decoder.finish()
            }
            Codec::Gzip => {
                let mut decoder = GzDecoder::new(Vec::new());
                decoder.write_all(data)?;
                decoder.finish()
            }
            Codec::Brotli => {
                let mut input = data;
                let mut out = Vec::new();
                brotli::BrotliDecompress(&mut input, &mut out)?;
                Ok(out)
            }
            Codec::Zstd => zstd::decode_all(data),
        }
    }
}

/// Wrapper backend compressing payloads on the way in and out.
#[derive(Debug, Clone)]
pub struct CompressionBackend {
    inner: Arc<dyn Backend>,
    codec: Codec,
}

impl CompressionBackend {
    pub fn new(inner: Arc<dyn Backend>, codec: Codec) -> Self {
        CompressionBackend { inner, codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    fn inflate(&self, content: &[u8]) -> Result<Bytes> {
        // no frame to sniff; a failure here means the stack is
        // asymmetric or the blob is corrupt, which is not "absent"
        let plain = self
            .codec
            .decompress(content)
            .map_err(StoreError::Io)?;
        Ok(Bytes::from(plain))
    }
}

#[async_trait]
impl Backend for CompressionBackend {
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
        match self.inner.read(id).await? {
            Some(object) => Ok(Some(Object {
                content: self.inflate(&object.content)?,
                media_type: object.media_type,
            })),
            None => Ok(None),
        }
    }

    async fn write(
        &self,
        id: &ContentId,
        content: Bytes,
        media_type: &MediaType,
        token: Option<&ConflictToken>,
    ) -> Result<bool> {
        let packed = self.codec.compress(&content)?;
        self.inner
            .write(id, Bytes::from(packed), media_type, token)
            .await
    }

    async fn delete(&self, id: &ContentId, token: &ConflictToken) -> Result<bool> {
        self.inner.delete(id, token).await
    }

    async fn read_stream(&self, id: &ContentId) -> Result<Option<ByteStream>> {
        let Some(stream) = self.inner.read_stream(id).await? else {
            return Ok(None);
        };
        let packed = collect_stream(stream).await?;
        Ok(Some(chunked(self.inflate(&packed)?, DEFAULT_CHUNK_SIZE)))
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

    #[test]
    fn all_codecs_round_trip() {
        let body = b"a body that compresses: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(16);
        for codec in [Codec::Deflate, Codec::Gzip, Codec::Brotli, Codec::Zstd] {
            let packed = codec.compress(&body).unwrap();
            assert_ne!(packed, body, "{codec:?} left bytes untouched");
            assert_eq!(codec.decompress(&packed).unwrap(), body, "{codec:?}");
        }
    }

    #[test]
    fn empty_input_round_trips() {
        for codec in [Codec::Deflate, Codec::Gzip, Codec::Brotli, Codec::Zstd] {
            let packed = codec.compress(b"").unwrap();
            assert_eq!(codec.decompress(&packed).unwrap(), b"");
        }
    }

    #[test]
    fn decompress_rejects_garbage() {
        for codec in [Codec::Deflate, Codec::Gzip, Codec::Zstd] {
            assert!(codec.decompress(b"definitely not compressed").is_err());
        }
    }

    #[test]
    fn codec_serde_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&Codec::Zstd).unwrap(), r#""zstd""#);
        let back: Codec = serde_json::from_str(r#""brotli""#).unwrap();
        assert_eq!(back, Codec::Brotli);
    }
}

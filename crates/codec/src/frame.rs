//! Chunked decrypt transform shared by the encryption wrappers.

use bytes::Bytes;
use futures::StreamExt;

use cask_store::backend::DEFAULT_CHUNK_SIZE;
use cask_store::ByteStream;

/// States of the stream decryptor.
enum State {
    /// Not enough bytes yet to tell frame from legacy data.
    Sniffing(Vec<u8>),
    /// No frame magic: legacy data flows through unchanged.
    PassThrough,
    /// Framed ciphertext accumulating until it can be authenticated.
    Collecting(Vec<u8>),
}

/// Decrypting transform over an inner byte stream.
///
/// Data without the frame magic streams through untouched, chunk by
/// chunk. Framed ciphertext is collected and handed to `open` once the
/// stream ends: GCM only vouches for the payload when the trailing tag
/// checks out, so no plaintext is released before then. An `open`
/// failure terminates the stream with an error.
pub(crate) fn decrypt_stream<F>(mut inner: ByteStream, magic: &'static [u8], open: F) -> ByteStream
where
    F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut state = State::Sniffing(Vec::new());
        while let Some(chunk) = inner.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            match &mut state {
                State::Sniffing(buf) => {
                    buf.extend_from_slice(&chunk);
                    if buf.len() >= magic.len() {
                        let buf = std::mem::take(buf);
                        if buf.starts_with(magic) {
                            state = State::Collecting(buf);
                        } else {
                            state = State::PassThrough;
                            yield Ok(Bytes::from(buf));
                        }
                    }
                }
                State::PassThrough => yield Ok(chunk),
                State::Collecting(buf) => buf.extend_from_slice(&chunk),
            }
        }
        match state {
            // shorter than the magic: cannot be a frame
            State::Sniffing(buf) => {
                if !buf.is_empty() {
                    yield Ok(Bytes::from(buf));
                }
            }
            State::PassThrough => {}
            State::Collecting(frame) => match open(&frame) {
                Some(plain) => {
                    let mut rest = Bytes::from(plain);
                    while rest.len() > DEFAULT_CHUNK_SIZE {
                        yield Ok(rest.split_to(DEFAULT_CHUNK_SIZE));
                    }
                    if !rest.is_empty() {
                        yield Ok(rest);
                    }
                }
                None => {
                    yield Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "frame authentication failed",
                    ));
                }
            },
        }
    })
}

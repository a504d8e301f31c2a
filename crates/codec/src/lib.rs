//! Wrapper backends that transform bytes at rest.
//!
//! Each wrapper implements the same [`Backend`](cask_store::Backend)
//! contract as the base backends and delegates everything except the
//! payload transform, so wrappers stack in any order over any base.
//! Identifiers, tokens and hashes pass through untouched: the id you
//! store under stays the digest of the plaintext, while the inner
//! backend only ever sees the transformed bytes.

pub mod asymmetric;
pub mod compression;
mod dek;
mod frame;
pub mod secret;

pub use asymmetric::AsymmetricBackend;
pub use compression::{Codec, CompressionBackend};
pub use secret::SecretBackend;

//! Content identifiers.
//!
//! A [`ContentId`] is the lowercase hex SHA-512 digest of a blob, 128
//! characters exactly. Ids carrying a leading `-` are *name identifiers*:
//! they address the mutable pointer slot for a human-readable name and are
//! derived from the name string instead of from stored content.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

use crate::error::StoreError;

/// Length of a hex-encoded SHA-512 digest.
pub const DIGEST_HEX_LEN: usize = 128;

/// Number of single-character shard directories in the fan-out layout.
const SHARD_DEPTH: usize = 6;

/// A validated content or name identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    /// Compute the identifier for a blob of content.
    pub fn digest(content: &[u8]) -> Self {
        ContentId(hex::encode(Sha512::digest(content)))
    }

    /// Build an identifier from an already-finalized SHA-512 hasher.
    pub fn from_hasher(hasher: Sha512) -> Self {
        ContentId(hex::encode(hasher.finalize()))
    }

    /// Derive the name identifier for a name string.
    ///
    /// The leading `-` marks the id as not content-derived; the slot it
    /// addresses is the only mutable location in a store.
    pub fn name(name: &str) -> Self {
        ContentId(format!("-{}", hex::encode(Sha512::digest(name.as_bytes()))))
    }

    /// Whether this is a name identifier rather than a content digest.
    pub fn is_name(&self) -> bool {
        self.0.starts_with('-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex digest without the name marker.
    pub fn hex_body(&self) -> &str {
        self.0.strip_prefix('-').unwrap_or(&self.0)
    }

    /// Path segments for hierarchical stores: six single-character shard
    /// directories from the hex body, then the full id as the final
    /// component.
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        let body = self.hex_body();
        (0..SHARD_DEPTH)
            .map(move |i| &body[i..i + 1])
            .chain(std::iter::once(self.as_str()))
    }
}

impl FromStr for ContentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('-').unwrap_or(s);
        if body.len() != DIGEST_HEX_LEN {
            return Err(StoreError::InvalidId(s.to_string()));
        }
        if !body.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(StoreError::InvalidId(s.to_string()));
        }
        Ok(ContentId(s.to_string()))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl Serialize for ContentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_128_hex_chars() {
        let id = ContentId::digest(b"Hello, world!");
        assert_eq!(id.as_str().len(), DIGEST_HEX_LEN);
        assert!(!id.is_name());
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(ContentId::digest(b"abc"), ContentId::digest(b"abc"));
        assert_ne!(ContentId::digest(b"abc"), ContentId::digest(b"abd"));
    }

    #[test]
    fn name_id_carries_marker() {
        let id = ContentId::name("doc");
        assert!(id.is_name());
        assert_eq!(id.as_str().len(), DIGEST_HEX_LEN + 1);
        assert_eq!(id.hex_body().len(), DIGEST_HEX_LEN);
        // the body is the digest of the name string itself
        assert_eq!(id.hex_body(), ContentId::digest(b"doc").as_str());
    }

    #[test]
    fn parse_round_trips() {
        let id = ContentId::digest(b"roundtrip");
        let parsed: ContentId = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);

        let name = ContentId::name("roundtrip");
        let parsed: ContentId = name.as_str().parse().unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("".parse::<ContentId>().is_err());
        assert!("abc".parse::<ContentId>().is_err());
        // uppercase hex is invalid
        let upper = ContentId::digest(b"x").as_str().to_uppercase();
        assert!(upper.parse::<ContentId>().is_err());
        // non-hex characters
        let bad = "g".repeat(DIGEST_HEX_LEN);
        assert!(bad.parse::<ContentId>().is_err());
        // double marker
        let id = ContentId::digest(b"x");
        assert!(format!("--{}", &id.as_str()[1..]).parse::<ContentId>().is_err());
    }

    #[test]
    fn path_segments_shard_on_hex_body() {
        let id: ContentId = format!("-{}", "ab12cd".to_string() + &"0".repeat(122))
            .parse()
            .unwrap();
        let segments: Vec<_> = id.path_segments().collect();
        assert_eq!(segments.len(), 7);
        assert_eq!(&segments[..6], &["a", "b", "1", "2", "c", "d"]);
        assert_eq!(segments[6], id.as_str());
    }

    #[test]
    fn serde_uses_string_form() {
        let id = ContentId::digest(b"serde");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<ContentId>("\"nope\"").is_err());
    }
}

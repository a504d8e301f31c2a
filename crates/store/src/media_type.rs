//! Media types for stored objects.

use std::fmt;
use std::str::FromStr;

use mime::Mime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StoreError;

/// The media type attached to a stored object.
///
/// A thin wrapper around [`mime::Mime`] that serializes as its string
/// form. Backends treat it as opaque metadata; the frontend reserves
/// `text/sha-512` for name-pointer slots and `application/empty` for
/// tombstone tag records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType(Mime);

impl MediaType {
    /// `application/octet-stream`, the default for untyped content.
    pub fn octet_stream() -> Self {
        MediaType(mime::APPLICATION_OCTET_STREAM)
    }

    /// `text/plain`
    pub fn text_plain() -> Self {
        MediaType(mime::TEXT_PLAIN)
    }

    /// `application/json`
    pub fn json() -> Self {
        MediaType(mime::APPLICATION_JSON)
    }

    /// `text/sha-512`, the body of a name-pointer slot.
    pub fn digest_pointer() -> Self {
        MediaType("text/sha-512".parse().expect("valid media type"))
    }

    /// `application/empty`, the type of a tombstone tag.
    pub fn tombstone() -> Self {
        MediaType("application/empty".parse().expect("valid media type"))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl Default for MediaType {
    fn default() -> Self {
        Self::octet_stream()
    }
}

impl From<Mime> for MediaType {
    fn from(mime: Mime) -> Self {
        MediaType(mime)
    }
}

impl FromStr for MediaType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mime = Mime::from_str(s).map_err(|_| StoreError::InvalidMediaType(s.to_string()))?;
        Ok(MediaType(mime))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MediaType {
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
    fn defaults_to_octet_stream() {
        assert_eq!(MediaType::default().as_str(), "application/octet-stream");
    }

    #[test]
    fn reserved_types_parse() {
        assert_eq!(MediaType::digest_pointer().as_str(), "text/sha-512");
        assert_eq!(MediaType::tombstone().as_str(), "application/empty");
    }

    #[test]
    fn parse_accepts_parameters() {
        let mt: MediaType = "application/json; charset=utf-8".parse().unwrap();
        assert_eq!(mt.as_str(), "application/json; charset=utf-8");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not a media type".parse::<MediaType>().is_err());
        assert!("".parse::<MediaType>().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let mt: MediaType = "text/plain".parse().unwrap();
        let json = serde_json::to_string(&mt).unwrap();
        assert_eq!(json, r#""text/plain""#);
        let back: MediaType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mt);
    }
}

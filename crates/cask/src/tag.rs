//! Immutable tag records.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cask_store::{ContentId, MediaType};

use crate::error::{CaskError, Result};

/// One version of a named entity.
///
/// Tags are written as content-addressed JSON blobs and never rewritten;
/// the `pre` link chains each tag to its predecessor, ending at `None`
/// on the first-ever tag for the name. A tag with no `cid` is a
/// tombstone: the name reads as absent while its history stays intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Human-readable name this tag describes
    pub name: String,
    /// Blob this tag points to; `None` marks a tombstone
    pub cid: Option<ContentId>,
    /// Media type of the pointed-to blob
    #[serde(rename = "type")]
    pub media_type: MediaType,
    /// Creation timestamp, milliseconds since the epoch
    pub date: u64,
    /// Previous tag record for this name
    pub pre: Option<ContentId>,
}

impl Tag {
    /// Whether this tag marks the name as deleted.
    pub fn is_tombstone(&self) -> bool {
        self.cid.is_none()
    }

    /// Parse and validate a stored tag record. Every read boundary goes
    /// through here; a malformed blob is an error, not a silent accept.
    pub(crate) fn parse(tid: &ContentId, raw: &[u8]) -> Result<Tag> {
        serde_json::from_slice(raw).map_err(|e| CaskError::InvalidTag(format!("{tid}: {e}")))
    }

    pub(crate) fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

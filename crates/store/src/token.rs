//! Optimistic conflict tokens.

use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Identity of a backend instance, used as the witness for token checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(Uuid);

impl BackendId {
    /// Mint a fresh identity for a backend instance.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        BackendId(Uuid::new_v4())
    }
}

/// Witness of a previously observed version of a stored object.
///
/// A token carries the hash (or etag) a backend reported for an id at
/// read time. It is first-class but non-transferable: only the backend
/// that minted it may read the value back, which keeps CAS comparisons
/// meaningful across wrapped stacks.
#[derive(Debug, Clone)]
pub struct ConflictToken {
    owner: BackendId,
    value: String,
}

impl ConflictToken {
    pub fn new(owner: BackendId, value: impl Into<String>) -> Self {
        ConflictToken {
            owner,
            value: value.into(),
        }
    }

    /// The identity of the backend that minted this token.
    pub fn owner(&self) -> BackendId {
        self.owner
    }

    /// Reveal the witnessed value to the minting backend.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ForeignToken`] when `witness` is not the
    /// backend this token was minted by.
    pub fn value(&self, witness: BackendId) -> Result<&str> {
        if witness != self.owner {
            return Err(StoreError::ForeignToken);
        }
        Ok(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_readable_by_owner_only() {
        let owner = BackendId::new();
        let other = BackendId::new();
        let token = ConflictToken::new(owner, "abc123");

        assert_eq!(token.value(owner).unwrap(), "abc123");
        assert!(matches!(token.value(other), Err(StoreError::ForeignToken)));
    }

    #[test]
    fn backend_ids_are_unique() {
        assert_ne!(BackendId::new(), BackendId::new());
    }
}

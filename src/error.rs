// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Error taxonomy for offshelf.
//!
//! Callers need to tell three failure classes apart: an entry that is not
//! there, an entry that is already there, and the storage substrate falling
//! over. The first two are expected user-level conditions that the CLI
//! renders as messages; only the last one is a real fault.

use crate::types::ContentId;

/// Domain errors surfaced by the catalog, cart, wishlist and download
/// managers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested entry does not exist in the named collection.
    #[error("{what} {id} not found")]
    NotFound {
        /// Collection the lookup ran against ("content", "wishlist entry", ...)
        what: &'static str,
        /// Identifier that missed
        id: ContentId,
    },

    /// The entry is already present in a collection that enforces
    /// uniqueness. Distinct from [`StoreError::NotFound`] so callers can
    /// render an informational message rather than an error.
    #[error("{what} {id} already exists")]
    AlreadyExists {
        /// Collection that rejected the insert
        what: &'static str,
        /// Identifier that collided
        id: ContentId,
    },

    /// The persistence substrate failed. Corrupt snapshots are NOT reported
    /// here; the store recovers those locally by resetting the collection.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl StoreError {
    /// Shorthand constructor for a missing entry.
    pub fn not_found(what: &'static str, id: ContentId) -> Self {
        Self::NotFound { what, id }
    }

    /// Shorthand constructor for a duplicate entry.
    pub fn already_exists(what: &'static str, id: ContentId) -> Self {
        Self::AlreadyExists { what, id }
    }

    /// True for conditions a UI should show as information, not failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::AlreadyExists { .. })
    }
}

/// Result alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StoreError::not_found("content", 42);
        assert_eq!(err.to_string(), "content 42 not found");
        assert!(err.is_benign());
    }

    #[test]
    fn test_already_exists_is_distinguishable() {
        let err = StoreError::already_exists("wishlist entry", 7);
        assert!(matches!(err, StoreError::AlreadyExists { id: 7, .. }));
        assert!(err.is_benign());
    }

    #[test]
    fn test_storage_is_not_benign() {
        let err = StoreError::Storage(anyhow::anyhow!("disk on fire"));
        assert!(!err.is_benign());
    }
}

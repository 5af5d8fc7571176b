// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Wishlist.
//!
//! Same persistence contract as the cart, but the surface is async (the
//! storefront treats the wishlist like a remote service, so every call
//! carries a small artificial latency) and uniqueness is enforced loudly:
//! re-adding a wished item fails with `AlreadyExists`, which callers show
//! as information rather than an error.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::locks::{resilient_read, resilient_write};
use crate::store::{keys, KeyValueStore};
use crate::types::{ContentId, ContentItem, ContentKind};

/// One wished item: a sequential local id, the content reference, and the
/// denormalized fields the list view needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistEntry {
    /// Sequential wishlist-local id
    pub id: u32,
    /// Catalog item this entry points at
    pub content_id: ContentId,
    pub title: String,
    pub author: String,
    pub price: f64,
    pub kind: ContentKind,
    pub category: String,
    pub section: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// When the entry was created
    pub added_at: DateTime<Utc>,
}

impl WishlistEntry {
    fn from_content(id: u32, content: &ContentItem) -> Self {
        Self {
            id,
            content_id: content.id,
            title: content.title.clone(),
            author: content.author.clone(),
            price: content.price,
            kind: content.kind,
            category: content.category.clone(),
            section: content.section.clone(),
            description: content.description.clone(),
            image: content.image.clone(),
            added_at: Utc::now(),
        }
    }
}

/// Wishlist manager owning the persisted entry list.
pub struct Wishlist {
    store: Arc<dyn KeyValueStore>,
    entries: RwLock<Vec<WishlistEntry>>,
    instant: bool,
}

impl Wishlist {
    /// Load the wishlist from the store. A corrupt snapshot is discarded
    /// with a log line and the list starts empty.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let entries = load_entries(store.as_ref());
        Self {
            store,
            entries: RwLock::new(entries),
            instant: false,
        }
    }

    /// Drop the artificial latency. Tests use this.
    pub fn instant(mut self) -> Self {
        self.instant = true;
        self
    }

    async fn pause(&self, ms: u64) {
        if !self.instant {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Every entry, in insertion order.
    pub async fn all(&self) -> Vec<WishlistEntry> {
        self.pause(200).await;
        resilient_read(&self.entries).clone()
    }

    /// Look up the entry for a content id. `NotFound` when absent.
    pub async fn get(&self, content_id: ContentId) -> StoreResult<WishlistEntry> {
        self.pause(100).await;
        resilient_read(&self.entries)
            .iter()
            .find(|e| e.content_id == content_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("wishlist entry", content_id))
    }

    /// Add a catalog item.
    ///
    /// Fails with `AlreadyExists` when the content id is already wished;
    /// the list is unchanged in that case. New entries get the next
    /// sequential local id.
    pub async fn add(&self, content: &ContentItem) -> StoreResult<WishlistEntry> {
        self.pause(300).await;
        let mut entries = resilient_write(&self.entries);
        if entries.iter().any(|e| e.content_id == content.id) {
            return Err(StoreError::already_exists("wishlist entry", content.id));
        }

        let next_id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let entry = WishlistEntry::from_content(next_id, content);
        entries.push(entry.clone());
        self.persist(&entries)?;
        Ok(entry)
    }

    /// Remove the entry for a content id, returning it. `NotFound` when
    /// absent.
    pub async fn remove(&self, content_id: ContentId) -> StoreResult<WishlistEntry> {
        self.pause(200).await;
        let mut entries = resilient_write(&self.entries);
        let index = entries
            .iter()
            .position(|e| e.content_id == content_id)
            .ok_or_else(|| StoreError::not_found("wishlist entry", content_id))?;
        let removed = entries.remove(index);
        self.persist(&entries)?;
        Ok(removed)
    }

    /// True when the content id is wished.
    pub async fn contains(&self, content_id: ContentId) -> bool {
        self.pause(50).await;
        resilient_read(&self.entries)
            .iter()
            .any(|e| e.content_id == content_id)
    }

    /// Drop every entry.
    pub async fn clear(&self) -> StoreResult<()> {
        self.pause(100).await;
        let mut entries = resilient_write(&self.entries);
        entries.clear();
        self.persist(&entries)?;
        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    /// True when the wishlist is empty.
    pub fn is_empty(&self) -> bool {
        resilient_read(&self.entries).is_empty()
    }

    /// Re-read the wishlist from the store, replacing the in-memory view.
    pub fn reload(&self) {
        *resilient_write(&self.entries) = load_entries(self.store.as_ref());
    }

    fn persist(&self, entries: &[WishlistEntry]) -> StoreResult<()> {
        let snapshot = serde_json::to_string(entries).context("Failed to serialize wishlist")?;
        self.store.put(keys::WISHLIST, &snapshot)?;
        Ok(())
    }
}

fn load_entries(store: &dyn KeyValueStore) -> Vec<WishlistEntry> {
    let snapshot = match store.get(keys::WISHLIST) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to read wishlist snapshot, starting empty: {}", e);
            return Vec::new();
        }
    };
    match serde_json::from_str(&snapshot) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Discarding corrupt wishlist snapshot: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn item(id: ContentId) -> ContentItem {
        ContentItem {
            id,
            title: format!("Item {}", id),
            author: "Author".into(),
            price: 6.99,
            kind: ContentKind::Audio,
            category: "Ambient".into(),
            section: "audio".into(),
            description: String::new(),
            image: None,
        }
    }

    fn wishlist() -> Wishlist {
        Wishlist::new(Arc::new(MemoryStore::new())).instant()
    }

    #[tokio::test]
    async fn test_add_assigns_sequential_ids() {
        let list = wishlist();
        let first = list.add(&item(10)).await.unwrap();
        let second = list.add(&item(20)).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(list.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_add_fails_distinguishably() {
        let list = wishlist();
        list.add(&item(7)).await.unwrap();

        let err = list.add(&item(7)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { id: 7, .. }));
        assert!(err.is_benign());
        // List unchanged
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_not_found() {
        let list = wishlist();
        let err = list.remove(9).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { id: 9, .. }));
    }

    #[tokio::test]
    async fn test_remove_returns_entry_and_contains_tracks() {
        let list = wishlist();
        list.add(&item(5)).await.unwrap();
        assert!(list.contains(5).await);

        let removed = list.remove(5).await.unwrap();
        assert_eq!(removed.content_id, 5);
        assert!(!list.contains(5).await);
    }

    #[tokio::test]
    async fn test_id_sequence_continues_after_removal() {
        let list = wishlist();
        list.add(&item(1)).await.unwrap();
        list.add(&item(2)).await.unwrap();
        list.remove(1).await.unwrap();

        // Highest surviving id is 2, so the next entry gets 3
        let entry = list.add(&item(3)).await.unwrap();
        assert_eq!(entry.id, 3);
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let store = Arc::new(MemoryStore::new());
        {
            let list = Wishlist::new(Arc::clone(&store) as Arc<dyn KeyValueStore>).instant();
            list.add(&item(4)).await.unwrap();
        }
        let list = Wishlist::new(Arc::clone(&store) as Arc<dyn KeyValueStore>).instant();
        assert!(list.contains(4).await);
        assert_eq!(list.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_corrupt_recovery() {
        let store = Arc::new(MemoryStore::new());
        let list = Wishlist::new(Arc::clone(&store) as Arc<dyn KeyValueStore>).instant();
        list.add(&item(1)).await.unwrap();
        list.clear().await.unwrap();
        assert!(list.is_empty());

        store.put(keys::WISHLIST, "not json at all").unwrap();
        let list = Wishlist::new(Arc::clone(&store) as Arc<dyn KeyValueStore>).instant();
        assert!(list.is_empty());
    }
}

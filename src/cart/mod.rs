// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Shopping cart.
//!
//! A persisted list of catalog items keyed by content id. Adding an item
//! that is already present is a silent no-op (the storefront UI disables
//! the button, but the engine does not trust it). The whole list is
//! rewritten on every mutation.

use std::sync::{Arc, RwLock};

use anyhow::Context;

use crate::error::StoreResult;
use crate::locks::{resilient_read, resilient_write};
use crate::store::{keys, KeyValueStore};
use crate::types::{ContentId, ContentItem};

/// Cart manager owning the persisted item list.
pub struct Cart {
    store: Arc<dyn KeyValueStore>,
    items: RwLock<Vec<ContentItem>>,
}

impl Cart {
    /// Load the cart from the store. A corrupt snapshot is discarded with
    /// a log line and the cart starts empty.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let items = load_items(store.as_ref());
        Self {
            store,
            items: RwLock::new(items),
        }
    }

    /// Add an item. Returns false (and changes nothing) when an item with
    /// the same id is already in the cart.
    pub fn add(&self, item: &ContentItem) -> StoreResult<bool> {
        let mut items = resilient_write(&self.items);
        if items.iter().any(|i| i.id == item.id) {
            return Ok(false);
        }
        items.push(item.clone());
        self.persist(&items)?;
        Ok(true)
    }

    /// Remove an item by content id. Returns whether anything was removed.
    pub fn remove(&self, id: ContentId) -> StoreResult<bool> {
        let mut items = resilient_write(&self.items);
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.persist(&items)?;
        Ok(true)
    }

    /// Empty the cart.
    pub fn clear(&self) -> StoreResult<()> {
        let mut items = resilient_write(&self.items);
        items.clear();
        self.persist(&items)?;
        Ok(())
    }

    /// True when the content id is in the cart.
    pub fn is_in_cart(&self, id: ContentId) -> bool {
        resilient_read(&self.items).iter().any(|i| i.id == id)
    }

    /// Number of items in the cart.
    pub fn total_items(&self) -> usize {
        resilient_read(&self.items).len()
    }

    /// Sum of item prices. Display formatting is the caller's job.
    pub fn total_price(&self) -> f64 {
        resilient_read(&self.items).iter().map(|i| i.price).sum()
    }

    /// Snapshot of the cart contents, in insertion order.
    pub fn items(&self) -> Vec<ContentItem> {
        resilient_read(&self.items).clone()
    }

    /// Re-read the cart from the store, replacing the in-memory view.
    pub fn reload(&self) {
        *resilient_write(&self.items) = load_items(self.store.as_ref());
    }

    fn persist(&self, items: &[ContentItem]) -> StoreResult<()> {
        let snapshot = serde_json::to_string(items).context("Failed to serialize cart")?;
        self.store.put(keys::CART, &snapshot)?;
        Ok(())
    }
}

fn load_items(store: &dyn KeyValueStore) -> Vec<ContentItem> {
    let snapshot = match store.get(keys::CART) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to read cart snapshot, starting empty: {}", e);
            return Vec::new();
        }
    };
    match serde_json::from_str(&snapshot) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!("Discarding corrupt cart snapshot: {}", e);
            Vec::new()
        }
    }
}

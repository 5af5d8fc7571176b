// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Content catalog provider.
//!
//! The storefront's source of browsable content. Backed by a data set
//! compiled into the binary and held in memory; every call sleeps a short
//! artificial latency so consumers are written against the same contract a
//! remote catalog would impose. Mutations touch the in-memory table only -
//! the catalog is a collaborator, not state this crate owns.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::{StoreError, StoreResult};
use crate::locks::{resilient_read, resilient_write};
use crate::types::{ContentId, ContentItem, ContentKind};

/// Base latency unit; per-call delays are small multiples of this.
const LATENCY_UNIT: Duration = Duration::from_millis(100);

/// Embedded catalog data.
const BUILTIN_CATALOG: &str = include_str!("../../data/catalog.json");

/// Partial update for a catalog entry. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ContentPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub price: Option<f64>,
    pub kind: Option<ContentKind>,
    pub category: Option<String>,
    pub section: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// In-memory catalog with simulated remote latency.
pub struct Catalog {
    items: RwLock<Vec<ContentItem>>,
    latency_unit: Duration,
}

impl Catalog {
    /// Load the catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        let items: Vec<ContentItem> =
            serde_json::from_str(BUILTIN_CATALOG).context("Failed to parse embedded catalog")?;
        Ok(Self::with_items(items))
    }

    /// Build a catalog over explicit items (tests, demos).
    pub fn with_items(items: Vec<ContentItem>) -> Self {
        Self {
            items: RwLock::new(items),
            latency_unit: LATENCY_UNIT,
        }
    }

    /// Drop the artificial latency. Tests use this; behavior is otherwise
    /// identical.
    pub fn instant(mut self) -> Self {
        self.latency_unit = Duration::ZERO;
        self
    }

    async fn pause(&self, units: u32) {
        if !self.latency_unit.is_zero() {
            tokio::time::sleep(self.latency_unit * units).await;
        }
    }

    /// Every catalog item.
    pub async fn get_all(&self) -> Vec<ContentItem> {
        self.pause(3).await;
        resilient_read(&self.items).clone()
    }

    /// Look up one item. `NotFound` when the id is absent.
    pub async fn get_by_id(&self, id: ContentId) -> StoreResult<ContentItem> {
        self.pause(2).await;
        resilient_read(&self.items)
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("content", id))
    }

    /// Items listed under a storefront section.
    pub async fn get_by_section(&self, section: &str) -> Vec<ContentItem> {
        self.pause(3).await;
        resilient_read(&self.items)
            .iter()
            .filter(|item| item.section == section)
            .cloned()
            .collect()
    }

    /// Case-insensitive search over title, author, description and
    /// category.
    pub async fn search(&self, query: &str) -> Vec<ContentItem> {
        self.pause(4).await;
        let needle = query.to_lowercase();
        resilient_read(&self.items)
            .iter()
            .filter(|item| {
                item.title.to_lowercase().contains(&needle)
                    || item.author.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle)
                    || item.category.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Distinct section names, in first-seen order.
    pub async fn sections(&self) -> Vec<String> {
        self.pause(1).await;
        let items = resilient_read(&self.items);
        let mut sections: Vec<String> = Vec::new();
        for item in items.iter() {
            if !sections.contains(&item.section) {
                sections.push(item.section.clone());
            }
        }
        sections
    }

    /// Add an item, assigning the next sequential id. Returns the stored
    /// item.
    pub async fn create(&self, item: ContentItem) -> ContentItem {
        self.pause(5).await;
        let mut items = resilient_write(&self.items);
        let next_id = items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let stored = ContentItem {
            id: next_id,
            ..item
        };
        items.push(stored.clone());
        stored
    }

    /// Apply a partial update. `NotFound` when the id is absent.
    pub async fn update(&self, id: ContentId, patch: ContentPatch) -> StoreResult<ContentItem> {
        self.pause(4).await;
        let mut items = resilient_write(&self.items);
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| StoreError::not_found("content", id))?;

        if let Some(title) = patch.title {
            item.title = title;
        }
        if let Some(author) = patch.author {
            item.author = author;
        }
        if let Some(price) = patch.price {
            item.price = price;
        }
        if let Some(kind) = patch.kind {
            item.kind = kind;
        }
        if let Some(category) = patch.category {
            item.category = category;
        }
        if let Some(section) = patch.section {
            item.section = section;
        }
        if let Some(description) = patch.description {
            item.description = description;
        }
        if let Some(image) = patch.image {
            item.image = Some(image);
        }
        Ok(item.clone())
    }

    /// Remove an item, returning it. `NotFound` when the id is absent.
    pub async fn delete(&self, id: ContentId) -> StoreResult<ContentItem> {
        self.pause(3).await;
        let mut items = resilient_write(&self.items);
        let index = items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| StoreError::not_found("content", id))?;
        Ok(items.remove(index))
    }
}

// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Canonical types used across offshelf.
//!
//! This module provides unified type definitions to avoid duplication.

use serde::{Deserialize, Serialize};

/// Numeric identifier for a catalog item.
pub type ContentId = u32;

/// Kind of digital content carried by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Electronic book
    Ebook,
    /// Video content
    Video,
    /// Audio content
    Audio,
    /// Multi-part course
    Course,
}

impl ContentKind {
    /// Convert kind to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ebook => "ebook",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Course => "course",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single catalog entry.
///
/// Owned by the catalog provider; the cart, wishlist and download engine
/// treat it as immutable and denormalize the fields they need for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Catalog identifier
    pub id: ContentId,
    /// Display title
    pub title: String,
    /// Author or creator
    pub author: String,
    /// Price in the display currency
    pub price: f64,
    /// What kind of content this is
    pub kind: ContentKind,
    /// Free-form category label (e.g. "Fiction", "Photography")
    pub category: String,
    /// Storefront section the item is listed under
    pub section: String,
    /// Longer description shown on detail views
    pub description: String,
    /// Optional cover image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! offshelf - Local-first content storefront library
//!
//! Browse, cart, and take content offline.
//!
//! offshelf is the state engine behind a digital-content storefront: a
//! catalog of e-books, videos, audio and courses, a shopping cart, a
//! wishlist, and a download manager that makes content available offline
//! with progress tracking. Everything persists as JSON snapshots in a
//! local key-value store; there is no server and no account.
//!
//! # Core Modules
//!
//! - [`catalog`] - Browsable content with search and section filtering
//! - [`download`] - Download/offline lifecycle with simulated transfers
//! - [`cart`] - Shopping cart with price totals
//! - [`wishlist`] - Wishlist with loud uniqueness
//! - [`store`] - Key-value persistence substrate (file-backed or in-memory)
//! - [`error`] - Domain error taxonomy
//! - [`locks`] - Poisoning-resilient lock helpers

pub mod cart;
pub mod catalog;
pub mod download;
pub mod error;
pub mod locks;
pub mod store;
pub mod types;
pub mod wishlist;

// Re-export commonly used types
pub use types::{ContentId, ContentItem, ContentKind};

// Re-export the error taxonomy
pub use error::{StoreError, StoreResult};

// Re-export the persistence substrate
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreEvent};

// Re-export the catalog surface
pub use catalog::{Catalog, ContentPatch};

// Re-export the download lifecycle
pub use download::{
    ContentStatus, DownloadHandle, DownloadManager, DownloadPhase, DownloadRecord, DownloadStats,
    OfflineRecord, ProgressPhase, ProgressUpdate, SimulationProfile,
};

// Re-export the cart and wishlist managers
pub use cart::Cart;
pub use wishlist::{Wishlist, WishlistEntry};

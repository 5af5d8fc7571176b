// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download/offline lifecycle for offshelf
//!
//! This module owns taking storefront content offline:
//! - Non-blocking downloads with progress visibility
//! - Persisted active and offline sets that survive restarts
//! - Explicit cancellation and retry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ DownloadManager │────▶│ Transfer driver │
//! │                 │     │ (tokio task)    │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ DownloadLedger  │     │ KeyValueStore   │
//! │ (active/offline)│     │ (snapshots)     │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! The driver simulates a chunked transfer (the storefront has no real
//! transport) but carries the interface a real one would: progress events
//! over a watch channel, a cancellation flag checked at every suspension
//! point, and completion/failure terminals.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offshelf::download::DownloadManager;
//! use offshelf::store::{JsonFileStore, KeyValueStore};
//!
//! # async fn example(content: offshelf::types::ContentItem) {
//! let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new());
//! let manager = DownloadManager::new(store);
//!
//! if let Some(mut handle) = manager.start(&content) {
//!     let final_update = handle.wait().await;
//!     println!("Finished: {:?}", final_update.phase);
//! }
//! # }
//! ```

pub mod manager;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use manager::{DownloadHandle, DownloadManager};
pub use state::{DownloadLedger, ProgressSnapshot};
pub use types::{
    ContentStatus, DownloadPhase, DownloadRecord, DownloadStats, OfflineRecord, ProgressPhase,
    ProgressUpdate, SimulationProfile,
};

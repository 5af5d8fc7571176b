// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent ledger for the download/offline lifecycle.
//!
//! Two mappings, persisted as whole snapshots under distinct keys: the
//! active set (`downloads`) and the offline set (`offline`). A content id
//! lives in at most one of the two, never duplicated in either; every
//! transition below preserves that invariant.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::download::types::{
    percent, ContentStatus, DownloadPhase, DownloadRecord, DownloadStats, OfflineRecord,
};
use crate::store::{keys, KeyValueStore};
use crate::types::ContentId;

/// Result of landing a chunk on an active record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Size units fetched so far
    pub downloaded: u64,
    /// Fixed total
    pub total_size: u64,
    /// Whole percent after the chunk
    pub progress: u8,
    /// True when the transfer just reached its total
    pub finished: bool,
}

/// In-memory image of the two persisted download collections.
#[derive(Debug, Default)]
pub struct DownloadLedger {
    active: HashMap<ContentId, DownloadRecord>,
    offline: HashMap<ContentId, OfflineRecord>,
}

impl DownloadLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load both collections from the store.
    ///
    /// A missing key yields an empty collection. A corrupt snapshot is
    /// discarded with a log line and replaced by an empty collection; it is
    /// never surfaced to the caller.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        Self {
            active: load_collection(store, keys::DOWNLOADS),
            offline: load_collection(store, keys::OFFLINE),
        }
    }

    /// Persist the active set.
    pub fn persist_active(&self, store: &dyn KeyValueStore) -> Result<()> {
        let snapshot = serde_json::to_string(&self.active)
            .context("Failed to serialize active downloads")?;
        store.put(keys::DOWNLOADS, &snapshot)
    }

    /// Persist the offline set.
    pub fn persist_offline(&self, store: &dyn KeyValueStore) -> Result<()> {
        let snapshot =
            serde_json::to_string(&self.offline).context("Failed to serialize offline content")?;
        store.put(keys::OFFLINE, &snapshot)
    }

    /// Insert a fresh active record.
    ///
    /// Refused (returning false) when the content id is already resident in
    /// either collection; this is the idempotency guard behind
    /// `DownloadManager::start`.
    pub fn insert_active(&mut self, record: DownloadRecord) -> bool {
        let content_id = record.content_id;
        if self.active.contains_key(&content_id) || self.offline.contains_key(&content_id) {
            return false;
        }
        self.active.insert(content_id, record);
        true
    }

    /// Fix the total size once the driver has picked it.
    pub fn set_total_size(&mut self, content_id: ContentId, download_id: &str, total_size: u64) {
        if let Some(record) = self.active.get_mut(&content_id) {
            if record.id == download_id {
                record.total_size = total_size;
                record.updated_at = Utc::now();
            }
        }
    }

    /// Land a chunk on an active record.
    ///
    /// Returns `None` when the record has vanished (cancelled mid-flight),
    /// belongs to a different download token, or is no longer in the
    /// downloading phase - the driver treats all of those as a silent stop,
    /// never an error, so a stale tick can neither resurrect nor clobber
    /// state.
    pub fn apply_chunk(
        &mut self,
        content_id: ContentId,
        download_id: &str,
        chunk: u64,
    ) -> Option<ProgressSnapshot> {
        let record = self.active.get_mut(&content_id)?;
        if record.id != download_id || !record.phase.is_downloading() {
            return None;
        }

        record.downloaded = (record.downloaded + chunk).min(record.total_size);
        record.progress = percent(record.downloaded, record.total_size);
        record.updated_at = Utc::now();

        Some(ProgressSnapshot {
            downloaded: record.downloaded,
            total_size: record.total_size,
            progress: record.progress,
            finished: record.downloaded >= record.total_size,
        })
    }

    /// Mark an active record failed. The record stays resident until the
    /// user retries or cancels. Returns false if the record is gone.
    pub fn mark_failed(&mut self, content_id: ContentId, download_id: &str, error: &str) -> bool {
        match self.active.get_mut(&content_id) {
            Some(record) if record.id == download_id => {
                record.phase = DownloadPhase::Failed {
                    error: error.to_string(),
                };
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Promote a finished download into the offline set.
    ///
    /// The move is atomic within this single mutation: the record leaves
    /// the active map and enters the offline map in one step, stamped with
    /// `completed_at` and pinned to 100%.
    pub fn complete(
        &mut self,
        content_id: ContentId,
        download_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Option<OfflineRecord> {
        match self.active.get(&content_id) {
            Some(record) if record.id == download_id => {}
            _ => return None,
        }
        let record = self.active.remove(&content_id)?;
        let offline = OfflineRecord::from_completed(record, completed_at);
        self.offline.insert(content_id, offline.clone());
        Some(offline)
    }

    /// Drop a record from the active set. No effect on offline items.
    /// Returns whether anything was removed.
    pub fn cancel(&mut self, content_id: ContentId) -> bool {
        self.active.remove(&content_id).is_some()
    }

    /// Take a failed record out of the active set, returning it for a
    /// retry. `None` unless a failed record is resident.
    pub fn take_failed(&mut self, content_id: ContentId) -> Option<DownloadRecord> {
        if self.active.get(&content_id)?.phase.is_failed() {
            self.active.remove(&content_id)
        } else {
            None
        }
    }

    /// Drop a record from the offline set. Returns whether anything was
    /// removed.
    pub fn remove_offline(&mut self, content_id: ContentId) -> bool {
        self.offline.remove(&content_id).is_some()
    }

    /// True when the item is locally available.
    pub fn is_offline(&self, content_id: ContentId) -> bool {
        self.offline.contains_key(&content_id)
    }

    /// True only for an active record still in the downloading phase.
    pub fn is_downloading(&self, content_id: ContentId) -> bool {
        self.active
            .get(&content_id)
            .map(|r| r.phase.is_downloading())
            .unwrap_or(false)
    }

    /// Resolve the status of a catalog item: active record first, then
    /// offline record, else available.
    pub fn status(&self, content_id: ContentId) -> ContentStatus {
        if let Some(record) = self.active.get(&content_id) {
            return match &record.phase {
                DownloadPhase::Downloading => ContentStatus::Downloading {
                    progress: record.progress,
                    downloaded: record.downloaded,
                    total_size: record.total_size,
                },
                DownloadPhase::Failed { error } => ContentStatus::Failed {
                    error: error.clone(),
                },
            };
        }
        if let Some(record) = self.offline.get(&content_id) {
            return ContentStatus::Offline {
                total_size: record.total_size,
                completed_at: record.completed_at,
            };
        }
        ContentStatus::Available
    }

    /// Number of records in the active set.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Aggregate statistics. `total_size` sums offline records only:
    /// in-flight transfers do not count until they land.
    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            active: self.active.len(),
            completed: self.offline.len(),
            total_size: self.offline.values().map(|r| r.total_size).sum(),
        }
    }

    /// Active records, newest first.
    pub fn active_records(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<_> = self.active.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    /// Offline records, most recently completed first.
    pub fn offline_records(&self) -> Vec<OfflineRecord> {
        let mut records: Vec<_> = self.offline.values().cloned().collect();
        records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        records
    }
}

/// Read one collection, recovering from corruption by resetting it.
fn load_collection<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> HashMap<ContentId, T> {
    let snapshot = match store.get(key) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return HashMap::new(),
        Err(e) => {
            tracing::warn!("Failed to read '{}' snapshot, starting empty: {}", key, e);
            return HashMap::new();
        }
    };
    match serde_json::from_str(&snapshot) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(
                "Discarding corrupt '{}' snapshot ({} bytes): {}",
                key,
                snapshot.len(),
                e
            );
            HashMap::new()
        }
    }
}

// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Record and status types for the download/offline lifecycle.

use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContentId, ContentItem};

/// Status of a record resident in the active-download set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DownloadPhase {
    /// Transfer in progress
    Downloading,
    /// Transfer failed; the record stays in the active set until the user
    /// retries or cancels it
    Failed {
        /// What went wrong
        error: String,
    },
}

impl DownloadPhase {
    /// Returns true while the transfer is still running.
    pub fn is_downloading(&self) -> bool {
        matches!(self, DownloadPhase::Downloading)
    }

    /// Returns true once the transfer has failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, DownloadPhase::Failed { .. })
    }
}

/// One in-flight (or failed) download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Opaque download token, unique per start
    pub id: String,
    /// Catalog item being fetched
    pub content_id: ContentId,
    /// Denormalized title for display without a catalog round trip
    pub title: String,
    /// Current phase
    #[serde(flatten)]
    pub phase: DownloadPhase,
    /// Whole percent, 0-100, non-decreasing while downloading
    pub progress: u8,
    /// Size units fetched so far (abstract MB)
    pub downloaded: u64,
    /// Total transfer size, fixed once the driver picks it
    pub total_size: u64,
    /// When the download was started
    pub started_at: DateTime<Utc>,
    /// When the record was last touched
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// Create a fresh record for a catalog item. The download token folds
    /// in the content id and start time so concurrent restarts stay
    /// distinguishable.
    pub fn new(content: &ContentItem) -> Self {
        let now = Utc::now();
        Self {
            id: format!("download_{}_{}", content.id, now.timestamp_millis()),
            content_id: content.id,
            title: content.title.clone(),
            phase: DownloadPhase::Downloading,
            progress: 0,
            downloaded: 0,
            total_size: 0,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Completed, locally-available content. Built only from a finished
/// [`DownloadRecord`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    /// Download token of the transfer that produced this record
    pub id: String,
    /// Catalog item
    pub content_id: ContentId,
    /// Denormalized title
    pub title: String,
    /// Size units fetched (equals `total_size`)
    pub downloaded: u64,
    /// Total transfer size
    pub total_size: u64,
    /// When the download was started
    pub started_at: DateTime<Utc>,
    /// When the transfer finished
    pub completed_at: DateTime<Utc>,
}

impl OfflineRecord {
    /// Promote a finished download. Caller guarantees the transfer reached
    /// its full size.
    pub fn from_completed(record: DownloadRecord, completed_at: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            content_id: record.content_id,
            title: record.title,
            downloaded: record.total_size,
            total_size: record.total_size,
            started_at: record.started_at,
            completed_at,
        }
    }
}

/// Where a catalog item stands with respect to offline availability.
///
/// Resolution order: an active download record wins, then an offline
/// record, else the item is simply available for download.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStatus {
    /// Not downloaded and not downloading
    Available,
    /// Transfer in progress
    Downloading {
        progress: u8,
        downloaded: u64,
        total_size: u64,
    },
    /// Transfer failed and is waiting for a retry or cancel
    Failed { error: String },
    /// Locally available
    Offline {
        total_size: u64,
        completed_at: DateTime<Utc>,
    },
}

impl ContentStatus {
    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Downloading { .. } => "downloading",
            Self::Failed { .. } => "failed",
            Self::Offline { .. } => "offline",
        }
    }
}

/// Aggregate download statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    /// Records in the active set (downloading or failed)
    pub active: usize,
    /// Records in the offline set
    pub completed: usize,
    /// Sum of `total_size` across offline records only
    pub total_size: u64,
}

/// Progress event broadcast over a download's watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Catalog item this event belongs to
    pub content_id: ContentId,
    /// Download token; consumers use it to drop events from a superseded
    /// transfer of the same item
    pub download_id: String,
    /// What happened
    pub phase: ProgressPhase,
}

/// Phase carried by a [`ProgressUpdate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressPhase {
    /// A chunk landed
    Downloading {
        progress: u8,
        downloaded: u64,
        total_size: u64,
    },
    /// Transfer finished; the record moved to the offline set
    Completed { total_size: u64 },
    /// Transfer failed; the record stays in the active set
    Failed { error: String },
}

impl ProgressPhase {
    /// Returns true for completion or failure.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Knobs for the simulated transfer driver.
///
/// The driver stands in for a real chunked-transfer engine: it picks a
/// total size once, then repeatedly sleeps a tick and lands a chunk. The
/// defaults produce the realistic-looking progress the storefront UI wants;
/// tests pin everything with [`SimulationProfile::fixed`].
#[derive(Debug, Clone)]
pub struct SimulationProfile {
    /// Range the total transfer size is drawn from (size units)
    pub total_size: RangeInclusive<u64>,
    /// Range each chunk is drawn from (size units)
    pub chunk: RangeInclusive<u64>,
    /// Range each inter-chunk sleep is drawn from (milliseconds)
    pub tick_ms: RangeInclusive<u64>,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            total_size: 10..=60,
            chunk: 1..=3,
            tick_ms: 100..=300,
        }
    }
}

impl SimulationProfile {
    /// Pin all three knobs. A profile of `fixed(20, 5, 1)` finishes in
    /// exactly four chunks.
    pub fn fixed(total_size: u64, chunk: u64, tick_ms: u64) -> Self {
        Self {
            total_size: total_size..=total_size,
            chunk: chunk..=chunk,
            tick_ms: tick_ms..=tick_ms,
        }
    }
}

/// Whole-percent progress with floor semantics.
pub(crate) fn percent(downloaded: u64, total_size: u64) -> u8 {
    if total_size == 0 {
        return 0;
    }
    ((downloaded * 100) / total_size).min(100) as u8
}

// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download manager: lifecycle owner for taking content offline.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::error::{StoreError, StoreResult};
use crate::locks::{resilient_read, resilient_write};
use crate::store::KeyValueStore;
use crate::types::{ContentId, ContentItem};

use super::state::DownloadLedger;
use super::types::{
    ContentStatus, DownloadPhase, DownloadRecord, DownloadStats, OfflineRecord, ProgressPhase,
    ProgressUpdate, SimulationProfile,
};

/// Per-download control block held while a driver task is running.
struct DriverControls {
    /// Token of the download this block belongs to
    download_id: String,
    /// Progress broadcast to handles
    progress_tx: watch::Sender<ProgressUpdate>,
    /// Cancellation flag; the driver checks it at every suspension point
    cancel_tx: watch::Sender<bool>,
}

/// Handle to a running download, allowing status checks.
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    /// Catalog item being fetched
    pub content_id: ContentId,
    /// Opaque download token
    pub download_id: String,
    progress_rx: watch::Receiver<ProgressUpdate>,
}

impl DownloadHandle {
    /// Get the latest progress event.
    pub fn progress(&self) -> ProgressUpdate {
        self.progress_rx.borrow().clone()
    }

    /// Check if the download has reached a terminal phase.
    pub fn is_complete(&self) -> bool {
        self.progress_rx.borrow().phase.is_terminal()
    }

    /// Wait for the download to complete or fail.
    pub async fn wait(&mut self) -> ProgressUpdate {
        loop {
            if self.progress_rx.borrow().phase.is_terminal() {
                return self.progress_rx.borrow().clone();
            }
            if self.progress_rx.changed().await.is_err() {
                // Driver gone (cancelled mid-flight); last event stands
                return self.progress_rx.borrow().clone();
            }
        }
    }

    /// Subscribe a second observer to the same download.
    pub fn watch(&self) -> watch::Receiver<ProgressUpdate> {
        self.progress_rx.clone()
    }
}

/// Owner of the download/offline lifecycle.
///
/// Holds the persisted ledger in memory as the source of truth for queries,
/// spawns one simulated-transfer driver task per download, and broadcasts
/// progress over per-download watch channels. The driver has the same shape
/// a real chunked-transfer engine would (progress events, cancellation
/// flag, completion/failure terminals), so swapping in real transport
/// changes no interface.
pub struct DownloadManager {
    store: Arc<dyn KeyValueStore>,
    ledger: Arc<RwLock<DownloadLedger>>,
    registry: Arc<RwLock<HashMap<ContentId, DriverControls>>>,
    profile: SimulationProfile,
}

impl DownloadManager {
    /// Create a manager over the given store, loading any persisted state.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_profile(store, SimulationProfile::default())
    }

    /// Create a manager with explicit simulation knobs (tests pin them).
    pub fn with_profile(store: Arc<dyn KeyValueStore>, profile: SimulationProfile) -> Self {
        let ledger = DownloadLedger::load(store.as_ref());
        Self {
            store,
            ledger: Arc::new(RwLock::new(ledger)),
            registry: Arc::new(RwLock::new(HashMap::new())),
            profile,
        }
    }

    /// Start downloading a catalog item.
    ///
    /// Returns `None` when the item is already in the active set (in any
    /// phase) or already offline - the duplicate-start guard. Otherwise the
    /// record is inserted and persisted, a driver task is spawned, and a
    /// handle is returned immediately; completion is never awaited here.
    pub fn start(&self, content: &ContentItem) -> Option<DownloadHandle> {
        let record = DownloadRecord::new(content);
        let download_id = record.id.clone();
        let content_id = record.content_id;

        {
            let mut ledger = resilient_write(&self.ledger);
            if !ledger.insert_active(record) {
                tracing::debug!(
                    "Ignoring duplicate download start for content {}",
                    content_id
                );
                return None;
            }
            if let Err(e) = ledger.persist_active(self.store.as_ref()) {
                tracing::warn!("Failed to persist active downloads at start: {}", e);
            }
        }

        Some(self.attach_driver(content_id, download_id))
    }

    /// Retry a failed download.
    ///
    /// Only a record in the failed phase qualifies; it is dropped and the
    /// transfer restarts from zero under a fresh token. `NotFound` when no
    /// failed record is resident for the id.
    pub fn retry(&self, content_id: ContentId) -> StoreResult<DownloadHandle> {
        let download_id = {
            let mut ledger = resilient_write(&self.ledger);
            let old = ledger
                .take_failed(content_id)
                .ok_or_else(|| StoreError::not_found("failed download", content_id))?;

            let now = Utc::now();
            let record = DownloadRecord {
                id: format!("download_{}_{}", content_id, now.timestamp_millis()),
                content_id,
                title: old.title,
                phase: DownloadPhase::Downloading,
                progress: 0,
                downloaded: 0,
                total_size: 0,
                started_at: now,
                updated_at: now,
            };
            let download_id = record.id.clone();
            // The failed record just left under this same lock, so the
            // insert cannot be refused
            ledger.insert_active(record);
            if let Err(e) = ledger.persist_active(self.store.as_ref()) {
                tracing::warn!("Failed to persist active downloads at retry: {}", e);
            }
            download_id
        };

        Ok(self.attach_driver(content_id, download_id))
    }

    /// Cancel a download.
    ///
    /// Flips the driver's cancellation flag and removes the record from the
    /// active set immediately. No-op (returning false) for unknown ids; an
    /// already-offline item is untouched. The driver may still be asleep
    /// when this returns - its next tick sees the flag, and even a tick
    /// that races past the flag finds the record gone and stops silently.
    pub fn cancel(&self, content_id: ContentId) -> bool {
        if let Some(controls) = resilient_read(&self.registry).get(&content_id) {
            let _ = controls.cancel_tx.send(true);
        }

        let removed = {
            let mut ledger = resilient_write(&self.ledger);
            let removed = ledger.cancel(content_id);
            if removed {
                if let Err(e) = ledger.persist_active(self.store.as_ref()) {
                    tracing::warn!("Failed to persist active downloads at cancel: {}", e);
                }
            }
            removed
        };

        resilient_write(&self.registry).remove(&content_id);
        removed
    }

    /// Delete completed offline content. No-op (returning false) if absent.
    pub fn remove_offline(&self, content_id: ContentId) -> bool {
        let mut ledger = resilient_write(&self.ledger);
        let removed = ledger.remove_offline(content_id);
        if removed {
            if let Err(e) = ledger.persist_offline(self.store.as_ref()) {
                tracing::warn!("Failed to persist offline content at remove: {}", e);
            }
        }
        removed
    }

    /// True when the item is locally available.
    pub fn is_offline(&self, content_id: ContentId) -> bool {
        resilient_read(&self.ledger).is_offline(content_id)
    }

    /// True only while an active record is in the downloading phase.
    pub fn is_downloading(&self, content_id: ContentId) -> bool {
        resilient_read(&self.ledger).is_downloading(content_id)
    }

    /// Resolve the offline status of a catalog item.
    pub fn content_status(&self, content_id: ContentId) -> ContentStatus {
        resilient_read(&self.ledger).status(content_id)
    }

    /// Number of records in the active set.
    pub fn active_count(&self) -> usize {
        resilient_read(&self.ledger).active_count()
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> DownloadStats {
        resilient_read(&self.ledger).stats()
    }

    /// Active records, newest first.
    pub fn active_downloads(&self) -> Vec<DownloadRecord> {
        resilient_read(&self.ledger).active_records()
    }

    /// Offline records, most recently completed first.
    pub fn offline_content(&self) -> Vec<OfflineRecord> {
        resilient_read(&self.ledger).offline_records()
    }

    /// Latest progress event for an active download, if a driver is live.
    pub fn progress(&self, content_id: ContentId) -> Option<ProgressUpdate> {
        resilient_read(&self.registry)
            .get(&content_id)
            .map(|c| c.progress_tx.borrow().clone())
    }

    /// Re-read both collections from the store, replacing the in-memory
    /// view. Wire this to [`KeyValueStore::subscribe`] to follow mutations
    /// made by another storefront instance sharing the same store.
    pub fn reload(&self) {
        let fresh = DownloadLedger::load(self.store.as_ref());
        *resilient_write(&self.ledger) = fresh;
    }

    /// Register driver controls for a freshly inserted record and spawn
    /// the transfer task.
    fn attach_driver(&self, content_id: ContentId, download_id: String) -> DownloadHandle {
        let initial = ProgressUpdate {
            content_id,
            download_id: download_id.clone(),
            phase: ProgressPhase::Downloading {
                progress: 0,
                downloaded: 0,
                total_size: 0,
            },
        };
        let (progress_tx, progress_rx) = watch::channel(initial);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        resilient_write(&self.registry).insert(
            content_id,
            DriverControls {
                download_id: download_id.clone(),
                progress_tx,
                cancel_tx,
            },
        );

        tokio::spawn(drive(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            Arc::clone(&self.registry),
            self.profile.clone(),
            content_id,
            download_id.clone(),
            cancel_rx,
        ));

        DownloadHandle {
            content_id,
            download_id,
            progress_rx,
        }
    }
}

// ============================================================================
// SIMULATED TRANSFER DRIVER
// ============================================================================

/// One simulated transfer: pick a total, then sleep-and-chunk until done.
///
/// The cancellation flag is checked after every sleep. Ledger writes go
/// through [`DownloadLedger::apply_chunk`], which refuses stale tokens and
/// vanished records, so this task can always stop silently without
/// corrupting state. A persistence failure mid-transfer is the one genuine
/// fault here and turns the record into the failed phase.
async fn drive(
    store: Arc<dyn KeyValueStore>,
    ledger: Arc<RwLock<DownloadLedger>>,
    registry: Arc<RwLock<HashMap<ContentId, DriverControls>>>,
    profile: SimulationProfile,
    content_id: ContentId,
    download_id: String,
    cancel_rx: watch::Receiver<bool>,
) {
    let total_size = {
        let mut rng = rand::thread_rng();
        rng.gen_range(profile.total_size.clone())
    };

    {
        let mut guard = resilient_write(&ledger);
        guard.set_total_size(content_id, &download_id, total_size);
        if let Err(e) = guard.persist_active(store.as_ref()) {
            drop(guard);
            fail(&store, &ledger, &registry, content_id, &download_id, &e.to_string());
            return;
        }
    }
    tracing::debug!(
        "Download {} for content {} sized at {} MB",
        download_id,
        content_id,
        total_size
    );

    loop {
        let (tick_ms, chunk) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(profile.tick_ms.clone()),
                rng.gen_range(profile.chunk.clone()),
            )
        };
        sleep(Duration::from_millis(tick_ms)).await;

        if *cancel_rx.borrow() {
            tracing::debug!("Download {} cancelled, driver stopping", download_id);
            remove_controls(&registry, content_id, &download_id);
            return;
        }

        let snapshot = {
            let mut guard = resilient_write(&ledger);
            match guard.apply_chunk(content_id, &download_id, chunk) {
                Some(snapshot) => {
                    if let Err(e) = guard.persist_active(store.as_ref()) {
                        drop(guard);
                        fail(&store, &ledger, &registry, content_id, &download_id, &e.to_string());
                        return;
                    }
                    snapshot
                }
                None => {
                    // Record vanished or was superseded: stop silently
                    drop(guard);
                    remove_controls(&registry, content_id, &download_id);
                    return;
                }
            }
        };

        send_update(
            &registry,
            content_id,
            &download_id,
            ProgressPhase::Downloading {
                progress: snapshot.progress,
                downloaded: snapshot.downloaded,
                total_size: snapshot.total_size,
            },
        );

        if snapshot.finished {
            let completed_at = Utc::now();
            {
                let mut guard = resilient_write(&ledger);
                if guard.complete(content_id, &download_id, completed_at).is_some() {
                    // Both snapshots move together; failures here are logged
                    // and the in-memory ledger stays authoritative
                    if let Err(e) = guard.persist_active(store.as_ref()) {
                        tracing::warn!("Failed to persist active downloads at completion: {}", e);
                    }
                    if let Err(e) = guard.persist_offline(store.as_ref()) {
                        tracing::warn!("Failed to persist offline content at completion: {}", e);
                    }
                }
            }
            tracing::info!("Download {} for content {} completed", download_id, content_id);
            send_update(
                &registry,
                content_id,
                &download_id,
                ProgressPhase::Completed {
                    total_size: snapshot.total_size,
                },
            );
            remove_controls(&registry, content_id, &download_id);
            return;
        }
    }
}

/// Turn the record into the failed phase and notify watchers.
fn fail(
    store: &Arc<dyn KeyValueStore>,
    ledger: &Arc<RwLock<DownloadLedger>>,
    registry: &Arc<RwLock<HashMap<ContentId, DriverControls>>>,
    content_id: ContentId,
    download_id: &str,
    error: &str,
) {
    tracing::error!(
        "Download {} for content {} failed: {}",
        download_id,
        content_id,
        error
    );
    {
        let mut guard = resilient_write(ledger);
        if guard.mark_failed(content_id, download_id, error) {
            // Best effort: the substrate that just failed is the one we
            // would persist to
            if let Err(e) = guard.persist_active(store.as_ref()) {
                tracing::warn!("Failed to persist failed download record: {}", e);
            }
        }
    }
    send_update(
        registry,
        content_id,
        download_id,
        ProgressPhase::Failed {
            error: error.to_string(),
        },
    );
    remove_controls(registry, content_id, download_id);
}

/// Broadcast an event if our controls are still installed.
fn send_update(
    registry: &Arc<RwLock<HashMap<ContentId, DriverControls>>>,
    content_id: ContentId,
    download_id: &str,
    phase: ProgressPhase,
) {
    if let Some(controls) = resilient_read(registry).get(&content_id) {
        if controls.download_id == download_id {
            let _ = controls.progress_tx.send(ProgressUpdate {
                content_id,
                download_id: download_id.to_string(),
                phase,
            });
        }
    }
}

/// Drop our control block unless a newer download already replaced it.
fn remove_controls(
    registry: &Arc<RwLock<HashMap<ContentId, DriverControls>>>,
    content_id: ContentId,
    download_id: &str,
) {
    let mut registry = resilient_write(registry);
    if registry
        .get(&content_id)
        .map(|c| c.download_id == download_id)
        .unwrap_or(false)
    {
        registry.remove(&content_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreEvent};
    use crate::types::ContentKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast;

    fn item(id: ContentId) -> ContentItem {
        ContentItem {
            id,
            title: format!("Item {}", id),
            author: "Author".into(),
            price: 12.50,
            kind: ContentKind::Video,
            category: "Documentary".into(),
            section: "featured".into(),
            description: String::new(),
            image: None,
        }
    }

    /// Store that can be switched into a failing mode mid-test.
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                failing: AtomicBool::new(false),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("simulated storage outage");
            }
            self.inner.put(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_completes_and_moves_record() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(20, 5, 1));

        let mut handle = manager.start(&item(7)).expect("start should be accepted");
        let final_update = handle.wait().await;

        assert_eq!(final_update.phase, ProgressPhase::Completed { total_size: 20 });
        assert!(manager.is_offline(7));
        assert!(!manager.is_downloading(7));
        assert_eq!(manager.active_count(), 0);
        assert!(matches!(
            manager.content_status(7),
            ContentStatus::Offline { total_size: 20, .. }
        ));

        let stats = manager.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total_size, 20);
    }

    #[tokio::test]
    async fn test_duplicate_start_returns_null_token() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        // Slow ticks so the first download is still running
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(50, 1, 200));

        let first = manager.start(&item(3));
        assert!(first.is_some());
        let second = manager.start(&item(3));
        assert!(second.is_none(), "second start must be a no-op");

        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.stats().active, 1);
        manager.cancel(3);
    }

    #[tokio::test]
    async fn test_start_refused_when_already_offline() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(10, 10, 1));

        let mut handle = manager.start(&item(5)).unwrap();
        handle.wait().await;
        assert!(manager.is_offline(5));

        assert!(manager.start(&item(5)).is_none());
        assert_eq!(manager.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_cancel_removes_immediately_no_resurrection() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(100, 1, 30));

        manager.start(&item(9)).unwrap();
        assert!(manager.is_downloading(9));

        assert!(manager.cancel(9));
        assert!(!manager.is_downloading(9));
        assert_eq!(manager.active_count(), 0);

        // Give any in-flight tick time to land; it must not resurrect the
        // record or re-create the snapshot entry
        sleep(Duration::from_millis(120)).await;
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.content_status(9), ContentStatus::Available);
        let raw = store.get(crate::store::keys::DOWNLOADS).unwrap().unwrap();
        assert_eq!(raw, "{}");
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager = DownloadManager::new(Arc::clone(&store));
        assert!(!manager.cancel(404));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_leaves_offline_content_alone() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(10, 10, 1));

        let mut handle = manager.start(&item(2)).unwrap();
        handle.wait().await;

        assert!(!manager.cancel(2));
        assert!(manager.is_offline(2));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_bounded() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(12, 3, 10));

        let handle = manager.start(&item(11)).unwrap();
        let mut rx = handle.watch();

        let mut last_progress = 0u8;
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let update = rx.borrow().clone();
            match update.phase {
                ProgressPhase::Downloading {
                    progress,
                    downloaded,
                    total_size,
                } => {
                    assert!(progress >= last_progress, "progress went backwards");
                    assert!(progress <= 100);
                    assert!(downloaded <= total_size);
                    last_progress = progress;
                }
                ProgressPhase::Completed { .. } => break,
                ProgressPhase::Failed { error } => panic!("unexpected failure: {}", error),
            }
        }
        assert!(manager.is_offline(11));
    }

    #[tokio::test]
    async fn test_storage_outage_fails_download_and_retry_recovers() {
        let flaky = Arc::new(FlakyStore::new());
        flaky.set_failing(true);
        let store: Arc<dyn KeyValueStore> = Arc::clone(&flaky) as Arc<dyn KeyValueStore>;
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(10, 5, 1));

        let mut handle = manager.start(&item(6)).unwrap();
        let final_update = handle.wait().await;
        assert!(matches!(final_update.phase, ProgressPhase::Failed { .. }));

        // Failed record stays resident in the active set
        assert_eq!(manager.active_count(), 1);
        assert!(!manager.is_downloading(6));
        assert!(matches!(manager.content_status(6), ContentStatus::Failed { .. }));

        // Substrate recovers; explicit retry restarts from zero
        flaky.set_failing(false);
        let mut handle = manager.retry(6).expect("failed record should be retryable");
        let final_update = handle.wait().await;
        assert_eq!(final_update.phase, ProgressPhase::Completed { total_size: 10 });
        assert!(manager.is_offline(6));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_without_failed_record_is_not_found() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager = DownloadManager::new(Arc::clone(&store));
        let err = manager.retry(8).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { id: 8, .. }));
    }

    #[tokio::test]
    async fn test_remove_offline() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(10, 10, 1));

        let mut handle = manager.start(&item(4)).unwrap();
        handle.wait().await;
        assert!(manager.is_offline(4));

        assert!(manager.remove_offline(4));
        assert!(!manager.is_offline(4));
        assert_eq!(manager.content_status(4), ContentStatus::Available);
        // Second removal is a no-op
        assert!(!manager.remove_offline(4));
    }

    #[tokio::test]
    async fn test_state_survives_manager_restart() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let manager = DownloadManager::with_profile(
                Arc::clone(&store),
                SimulationProfile::fixed(15, 15, 1),
            );
            let mut handle = manager.start(&item(1)).unwrap();
            handle.wait().await;
        }

        // Fresh manager over the same store sees the offline record
        let manager = DownloadManager::new(Arc::clone(&store));
        assert!(manager.is_offline(1));
        assert_eq!(manager.stats().total_size, 15);
    }

    #[tokio::test]
    async fn test_reload_follows_external_mutation() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(10, 10, 1));
        let mut handle = manager.start(&item(3)).unwrap();
        handle.wait().await;
        assert!(manager.is_offline(3));

        // Another instance clears the offline snapshot behind our back
        store.put(crate::store::keys::OFFLINE, "{}").unwrap();
        manager.reload();
        assert!(!manager.is_offline(3));
    }
}

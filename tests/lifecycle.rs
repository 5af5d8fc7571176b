//! End-to-end lifecycle tests for the offshelf engine
//!
//! These drive the public API the way the storefront does: catalog lookups
//! feed the cart, wishlist and download manager, and everything persists
//! through a shared key-value store. Simulation profiles are pinned so the
//! tests finish in milliseconds.

use std::sync::Arc;

use offshelf::catalog::Catalog;
use offshelf::cart::Cart;
use offshelf::download::{ContentStatus, DownloadManager, ProgressPhase, SimulationProfile};
use offshelf::error::StoreError;
use offshelf::store::{JsonFileStore, KeyValueStore, MemoryStore};
use offshelf::types::{ContentId, ContentItem, ContentKind};
use offshelf::wishlist::Wishlist;

fn item(id: ContentId, price: f64) -> ContentItem {
    ContentItem {
        id,
        title: format!("Item {}", id),
        author: "Author".into(),
        price,
        kind: ContentKind::Ebook,
        category: "Fiction".into(),
        section: "featured".into(),
        description: "A test item".into(),
        image: None,
    }
}

// =============================================================================
// Download lifecycle
// =============================================================================

#[tokio::test]
async fn download_moves_content_offline_and_updates_stats() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let manager = DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(20, 5, 1));

    let content = item(7, 14.99);
    assert_eq!(manager.content_status(7), ContentStatus::Available);

    let mut handle = manager.start(&content).expect("fresh item should start");
    let final_update = handle.wait().await;
    assert_eq!(final_update.phase, ProgressPhase::Completed { total_size: 20 });

    // The record moved: gone from active, present offline at 100%
    assert_eq!(manager.active_count(), 0);
    assert!(manager.is_offline(7));
    assert!(matches!(
        manager.content_status(7),
        ContentStatus::Offline { total_size: 20, .. }
    ));

    let stats = manager.stats();
    assert_eq!((stats.active, stats.completed, stats.total_size), (0, 1, 20));
}

#[tokio::test]
async fn exclusive_membership_holds_through_the_lifecycle() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let manager = DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(10, 2, 5));

    let content = item(3, 9.99);
    let mut handle = manager.start(&content).unwrap();

    // While downloading: active, not offline
    assert!(manager.is_downloading(3) || manager.is_offline(3));
    assert!(!(manager.is_downloading(3) && manager.is_offline(3)));

    handle.wait().await;

    // After completion: offline, not active
    assert!(manager.is_offline(3));
    assert!(!manager.is_downloading(3));
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test]
async fn duplicate_start_is_idempotent_and_does_not_double_count() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let manager =
        DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(60, 1, 50));

    let content = item(5, 4.99);
    let first = manager.start(&content);
    let second = manager.start(&content);

    assert!(first.is_some());
    assert!(second.is_none(), "second start must return the null token");
    assert_eq!(manager.stats().active, 1);

    manager.cancel(5);
}

#[tokio::test]
async fn cancelled_download_stays_gone() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let manager =
        DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(100, 1, 20));

    manager.start(&item(9, 1.99)).unwrap();
    assert!(manager.cancel(9));
    assert_eq!(manager.content_status(9), ContentStatus::Available);

    // Let any stale driver tick land; nothing may come back
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    assert_eq!(manager.active_count(), 0);
    assert_eq!(manager.content_status(9), ContentStatus::Available);

    // And the id is free for a fresh start afterwards
    let handle = manager.start(&item(9, 1.99));
    assert!(handle.is_some());
    manager.cancel(9);
}

#[tokio::test]
async fn persisted_snapshots_round_trip_across_instances() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::with_dir(dir.path()));
        let manager =
            DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(25, 25, 1));
        let mut handle = manager.start(&item(2, 19.99)).unwrap();
        handle.wait().await;
    }

    // A second instance over the same directory sees the same state
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::with_dir(dir.path()));
    let manager = DownloadManager::new(store);
    assert!(manager.is_offline(2));
    assert_eq!(manager.stats().total_size, 25);
}

#[tokio::test]
async fn change_notification_lets_a_second_view_follow() {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn KeyValueStore> = Arc::clone(&store) as Arc<dyn KeyValueStore>;

    // Two managers over the same store: one writer, one reader
    let writer =
        DownloadManager::with_profile(Arc::clone(&store_dyn), SimulationProfile::fixed(10, 10, 1));
    let reader = DownloadManager::new(Arc::clone(&store_dyn));

    let mut events = store.subscribe();
    let mut handle = writer.start(&item(8, 3.50)).unwrap();
    handle.wait().await;

    // The reader's in-memory view is stale until it reloads on the signal
    assert!(!reader.is_offline(8));
    let mut saw_offline_key = false;
    while let Ok(event) = events.try_recv() {
        if event.key == offshelf::store::keys::OFFLINE {
            saw_offline_key = true;
        }
    }
    assert!(saw_offline_key, "offline snapshot write must be signalled");
    reader.reload();
    assert!(reader.is_offline(8));
}

// =============================================================================
// Cart and wishlist scenarios
// =============================================================================

#[tokio::test]
async fn cart_double_add_keeps_one_entry() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let cart = Cart::new(store);

    let content = item(3, 24.00);
    assert!(cart.add(&content).unwrap());
    assert!(!cart.add(&content).unwrap());

    assert_eq!(cart.total_items(), 1);
    assert!((cart.total_price() - 24.00).abs() < f64::EPSILON);
}

#[tokio::test]
async fn wishlist_duplicate_is_loud_but_harmless() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let wishlist = Wishlist::new(store).instant();

    let content = item(6, 11.99);
    wishlist.add(&content).await.unwrap();

    let err = wishlist.add(&content).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { id: 6, .. }));
    assert!(err.is_benign());
    assert_eq!(wishlist.all().await.len(), 1);
}

#[tokio::test]
async fn catalog_feeds_every_manager() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let catalog = Catalog::builtin().unwrap().instant();
    let cart = Cart::new(Arc::clone(&store));
    let wishlist = Wishlist::new(Arc::clone(&store)).instant();
    let manager =
        DownloadManager::with_profile(Arc::clone(&store), SimulationProfile::fixed(10, 5, 1));

    let found = catalog.search("marchetti").await;
    assert!(!found.is_empty());
    let pick = &found[0];

    cart.add(pick).unwrap();
    wishlist.add(pick).await.unwrap();
    let mut handle = manager.start(pick).unwrap();
    handle.wait().await;

    assert!(cart.is_in_cart(pick.id));
    assert!(wishlist.contains(pick.id).await);
    assert!(manager.is_offline(pick.id));

    // Unknown ids fail distinguishably at the catalog boundary
    let err = catalog.get_by_id(9999).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Key-value persistence substrate.
//!
//! Every collection offshelf owns (active downloads, offline content, cart,
//! wishlist) is persisted as a whole-snapshot JSON string under one key.
//! Managers keep an in-memory copy as the source of truth and rewrite the
//! full snapshot on every mutation, which makes concurrent writers
//! last-writer-wins: there is no locking across processes beyond the
//! advisory file lock held for the duration of a single read or write, and
//! no versioning. A second storefront instance sharing the same directory
//! learns about mutations through [`KeyValueStore::subscribe`] and reloads
//! its in-memory view.
//!
//! [`JsonFileStore`] is the production implementation (one file per key
//! under `~/.offshelf/`); [`MemoryStore`] backs tests and demos.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use tokio::sync::broadcast;

use crate::locks::{resilient_read, resilient_write};

/// Default timeout for acquiring file locks (5 seconds)
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Capacity of the change-notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Snapshot keys used by the offshelf managers.
pub mod keys {
    /// Active downloads: map of content id to download record
    pub const DOWNLOADS: &str = "downloads";
    /// Completed offline content: map of content id to offline record
    pub const OFFLINE: &str = "offline";
    /// Cart: array of catalog items
    pub const CART: &str = "cart";
    /// Wishlist: array of wishlist entries
    pub const WISHLIST: &str = "wishlist";
}

/// Notification that a key was mutated.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// The key that was written or removed
    pub key: String,
}

/// Abstraction over the local key-value store.
///
/// Values are raw JSON snapshots; serialization stays with the callers so a
/// store implementation never needs to know the record shapes. Injected
/// into every manager, which makes the substrate swappable (disk, memory,
/// something remote) without touching manager code.
pub trait KeyValueStore: Send + Sync {
    /// Read the snapshot under `key`. `None` when the key has never been
    /// written (a missing key is not an error).
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the snapshot under `key` and notify subscribers.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the snapshot under `key` and notify subscribers. No-op if the
    /// key is absent.
    fn remove(&self, key: &str) -> Result<()>;

    /// Subscribe to mutation notifications for every key in this store.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

// ============================================================================
// FILE-BACKED STORE
// ============================================================================

/// JSON-file-backed store: one `<key>.json` per key under a base directory.
///
/// Writes use a temp file + `sync_all` + atomic rename while holding an
/// exclusive advisory lock on a sibling `<key>.lock` file, so a crash
/// mid-write never leaves a torn snapshot and two processes never interleave
/// writes to the same key. Readers take a shared lock on the same file.
pub struct JsonFileStore {
    base_dir: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl JsonFileStore {
    /// Create a store rooted at the default data directory
    /// (`~/.offshelf`, falling back to a relative path without a home dir).
    pub fn new() -> Self {
        let base_dir = dirs::home_dir()
            .map(|h| h.join(".offshelf"))
            .unwrap_or_else(|| PathBuf::from(".offshelf"));
        Self::with_dir(base_dir)
    }

    /// Create a store rooted at an explicit directory.
    pub fn with_dir(base_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            base_dir: base_dir.into(),
            events,
        }
    }

    /// Directory this store writes under.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn snapshot_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.lock", key))
    }

    /// Acquire an exclusive lock with timeout.
    ///
    /// Returns the locked file handle on success, or an error if the
    /// timeout expires. Uses a separate `.lock` file so the lock can be
    /// held across the atomic rename of the snapshot itself.
    fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for lock file: {:?}", parent))?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {:?}", path))?;

        let start = Instant::now();
        loop {
            // Called through the trait so the fs2 methods are picked over
            // the std inherent file-locking methods of the same name
            match FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!(
                            "Timed out waiting for exclusive lock on {:?} after {:?}. \
                             Another instance may be writing to this key.",
                            path,
                            timeout
                        );
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to acquire exclusive lock on {:?}", path));
                }
            }
        }
    }

    /// Acquire a shared lock with timeout, allowing concurrent readers.
    fn acquire_shared_lock_with_timeout(file: &File, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            match FileExt::try_lock_shared(file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!(
                            "Timed out waiting for shared lock after {:?}. \
                             Another instance may be writing to this key.",
                            timeout
                        );
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| "Failed to acquire shared lock on snapshot");
                }
            }
        }
    }

    fn notify(&self, key: &str) {
        // Nobody listening is fine
        let _ = self.events.send(StoreEvent { key: key.to_string() });
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.snapshot_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(key))
            .with_context(|| format!("Failed to open lock file for key '{}'", key))?;
        Self::acquire_shared_lock_with_timeout(&lock_file, LOCK_TIMEOUT)?;

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read snapshot for key '{}'", key))?;

        // Lock released when lock_file drops
        Ok(Some(content))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create store directory: {:?}", self.base_dir))?;

        let _lock_guard =
            Self::acquire_exclusive_lock_with_timeout(&self.lock_path(key), LOCK_TIMEOUT)?;

        let path = self.snapshot_path(key);
        let temp_path = path.with_extension("tmp");
        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
            temp_file
                .write_all(value.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            temp_file
                .sync_all()
                .with_context(|| "Failed to sync temp file to disk")?;
        }

        // Atomic on POSIX, best-effort on Windows; the lock is still held
        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to rename {:?} -> {:?}", temp_path, path))?;

        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.snapshot_path(key);
        if !path.exists() {
            return Ok(());
        }

        let _lock_guard =
            Self::acquire_exclusive_lock_with_timeout(&self.lock_path(key), LOCK_TIMEOUT)?;
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove snapshot for key '{}'", key))?;

        self.notify(key);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory store for tests and demos. Same contract as the file store,
/// minus durability.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(resilient_read(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        resilient_write(&self.entries).insert(key.to_string(), value.to_string());
        let _ = self.events.send(StoreEvent { key: key.to_string() });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        resilient_write(&self.entries).remove(key);
        let _ = self.events.send(StoreEvent { key: key.to_string() });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

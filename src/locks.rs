// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Resilient lock helpers.
//!
//! The download driver runs on a background task and shares state with the
//! managers through `RwLock`s. If a task panics while holding a lock, the
//! lock is poisoned and every later acquisition would panic too. These
//! helpers log the event and recover the guard instead: stale data beats
//! taking the whole process down.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "offshelf::locks",
                event = "LOCK_POISONED_READ",
                "RwLock was poisoned during read acquisition; recovering. \
                 A task previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "offshelf::locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock was poisoned during write acquisition; recovering. \
                 A task previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

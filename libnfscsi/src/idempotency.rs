//! In-flight operation registry.
//!
//! [`IdempotencyGuard`] remembers which volume keys (a display name during
//! create, a volume id during delete) are currently inside a lifecycle
//! operation.  Presence in the set is the only per-volume lock the plugin
//! has.
//!
//! Prefer [`IdempotencyGuard::try_begin`]: it checks and inserts under a
//! single lock acquisition and hands back a [`ProcessingToken`] that removes
//! the key again when dropped, on every exit path.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

/// Process-wide set of keys currently being processed.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    processing: Mutex<HashSet<String>>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the set half-updated, so a
    // poisoned mutex is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.processing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `key` is currently being processed.
    pub fn is_processing(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    /// Mark `key` as processing.
    ///
    /// This does not check for a concurrent holder; callers must have seen
    /// `is_processing(key) == false` first.  Use [`Self::try_begin`] instead
    /// where possible.
    pub fn begin_processing(&self, key: &str) {
        self.lock().insert(key.to_owned());
    }

    /// Remove `key` from the processing set.
    pub fn end_processing(&self, key: &str) {
        debug!(key, "removing volume from processing set");
        self.lock().remove(key);
    }

    /// Atomically claim `key`.
    ///
    /// Returns `None` if another operation already holds it.  The returned
    /// token releases the claim when dropped.
    pub fn try_begin(&self, key: &str) -> Option<ProcessingToken<'_>> {
        if !self.lock().insert(key.to_owned()) {
            return None;
        }
        Some(ProcessingToken {
            guard: self,
            key: key.to_owned(),
        })
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Claim on one key of an [`IdempotencyGuard`], released on drop.
#[derive(Debug)]
#[must_use = "the claim is released as soon as the token is dropped"]
pub struct ProcessingToken<'a> {
    guard: &'a IdempotencyGuard,
    key: String,
}

impl ProcessingToken<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ProcessingToken<'_> {
    fn drop(&mut self) {
        self.guard.end_processing(&self.key);
    }
}

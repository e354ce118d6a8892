//! Capacity-bounded LRU of base session tokens
//!
//! Keys are `endpoint|kind|identity`, so every session opened against one
//! node shares the `endpoint|` prefix and can be dropped with a single
//! `delete_by_prefix` when that node goes away, without the pool having to
//! remember which identities used it.
//!
//! Recency lives in the `IndexMap` order: the front is the least recently
//! used entry, `get` and `put` move an entry to the back. Moves are memmoves
//! bounded by the capacity (100 by default).
//!
//! The cache also tracks the last network epoch the pool has seen. Entries
//! are treated as gone once fewer than half their lifetime remains, so a
//! token handed out is never at or past its expiration epoch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use tracing::debug;

use crate::key::PublicKey;
use crate::token::{SessionKind, SessionToken};

/// Default number of cached sessions.
pub const DEFAULT_CAPACITY: usize = 100;

/// Cache key prefix shared by every session of one endpoint.
pub fn node_prefix(endpoint: &str) -> String {
    format!("{endpoint}|")
}

/// Cache key for the base session of `identity` on `endpoint`.
pub fn cache_key(endpoint: &str, kind: SessionKind, identity: &PublicKey) -> String {
    format!("{endpoint}|{kind}|{identity}")
}

/// Thread-safe LRU of base session tokens with prefix invalidation.
pub struct SessionCache {
    entries: Mutex<IndexMap<String, SessionToken>>,
    capacity: usize,
    token_duration: u64,
    epoch: AtomicU64,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` tokens minted with
    /// `token_duration` epochs of lifetime.
    pub fn new(capacity: usize, token_duration: u64) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            token_duration,
            epoch: AtomicU64::new(0),
        }
    }

    /// Fetch a token and mark it most recently used.
    ///
    /// Stale tokens are removed and reported as missing.
    pub fn get(&self, key: &str) -> Option<SessionToken> {
        let mut entries = self.lock();
        let idx = entries.get_index_of(key)?;
        let last = entries.len() - 1;
        entries.move_index(idx, last);

        if self.is_stale(&entries[last]) {
            entries.pop();
            debug!(key, epoch = self.epoch(), "dropping stale session");
            return None;
        }
        Some(entries[last].clone())
    }

    /// Insert or replace a token. Returns `true` if an older entry was evicted.
    pub fn put(&self, key: String, token: SessionToken) -> bool {
        let mut entries = self.lock();
        entries.shift_remove(&key);
        entries.insert(key, token);

        let mut evicted = false;
        while entries.len() > self.capacity {
            if let Some((old, _)) = entries.shift_remove_index(0) {
                debug!(key = %old, "evicting least recently used session");
                evicted = true;
            }
        }
        evicted
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().shift_remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count removed.
    pub fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(prefix, removed, "purged sessions by prefix");
        }
        removed
    }

    /// Record a newly observed network epoch. The stored epoch never goes back.
    pub fn update_epoch(&self, epoch: u64) {
        self.epoch.fetch_max(epoch, Ordering::AcqRel);
    }

    /// Last known network epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys ordered from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn is_stale(&self, token: &SessionToken) -> bool {
        let margin = (self.token_duration / 2).max(1);
        token.expired_at(self.epoch().saturating_add(margin))
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, SessionToken>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::error!("session cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

//! In-process session store
//!
//! Entries live in a [`DashMap`], so every operation locks only the shard
//! owning its key and no guard is ever held across an `.await`.
//!
//! Expired entries are treated as absent by every read and dropped lazily.
//! [`InProcessSessionStore::cleanup_expired`] reclaims entries nobody read
//! after they expired; [`InProcessSessionStore::spawn_sweeper`] runs it on an
//! interval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::SessionStore;
use crate::error::SessionResult;

/// Longest entry lifetime (ten years); longer TTLs are clamped
const MAX_ENTRY_TTL: Duration = Duration::from_secs(315_360_000);

#[derive(Debug)]
struct Entry {
    payload: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn new(payload: &[u8], ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            payload: payload.to_vec(),
            expires_at: now
                .checked_add(ttl.min(MAX_ENTRY_TTL))
                .unwrap_or(now + MAX_ENTRY_TTL),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

type Entries = DashMap<String, Entry>;

fn cleanup_expired(entries: &Entries) -> usize {
    let now = Instant::now();
    let mut removed = 0;
    entries.retain(|_, entry| {
        let live = !entry.is_expired(now);
        if !live {
            removed += 1;
        }
        live
    });
    removed
}

/// Concurrency-safe in-memory [`SessionStore`]
#[derive(Debug)]
pub struct InProcessSessionStore {
    entries: Arc<Entries>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Default for InProcessSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a store and start its periodic sweeper
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_sweeper(interval: Duration) -> Self {
        let store = Self::new();
        store.spawn_sweeper(interval);
        store
    }

    /// Start (or restart) the background task running
    /// [`cleanup_expired`](Self::cleanup_expired) every `interval`
    pub fn spawn_sweeper(&self, interval: Duration) {
        let entries = Arc::downgrade(&self.entries);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let removed = cleanup_expired(&entries);
                if removed > 0 {
                    log::debug!("Swept {removed} expired in-process session entries");
                }
            }
        });

        if let Some(previous) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }

    /// Remove every expired entry, returning how many were reclaimed
    #[must_use]
    pub fn cleanup_expired(&self) -> usize {
        cleanup_expired(&self.entries)
    }

    /// Number of stored entries, including expired ones not yet reclaimed
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for InProcessSessionStore {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[async_trait]
impl SessionStore for InProcessSessionStore {
    async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<()> {
        if ttl.is_zero() {
            self.entries.remove(key);
            return Ok(());
        }
        self.entries.insert(key.to_string(), Entry::new(payload, ttl));
        Ok(())
    }

    async fn set_if_present(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<bool> {
        let now = Instant::now();
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(false);
        };
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            return Ok(false);
        }
        if ttl.is_zero() {
            drop(entry);
            self.entries.remove(key);
        } else {
            *entry = Entry::new(payload, ttl);
        }
        Ok(true)
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.payload.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn take(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.payload))
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn list_by_prefix(&self, prefix: &str) -> SessionResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix) && !item.value().is_expired(now))
            .map(|item| item.key().clone())
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.stop_sweeper();
        self.entries.clear();
        log::debug!("In-process session store closed");
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

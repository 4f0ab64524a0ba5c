//! Persisted block-list store.
//!
//! A plain JSON document mapping resource identity keys to block entries,
//! rewritten wholesale after every mutation. The file is the only
//! cross-process coordination mechanism: other processes sharing the same
//! resource list observe blocks on their next load. Entries older than the
//! TTL are dropped on load, and the file is rewritten if pruning occurred.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::PoolError;

/// Default block window: 48 hours.
pub const DEFAULT_BLOCK_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// One persisted block record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// Epoch seconds when the block was inserted.
    pub blocked_at: u64,
    /// Why the resource was blocked (last failure reason).
    pub reason: String,
}

/// Key -> entry store with whole-file persistence.
///
/// The store itself is not synchronized; the resource pool owns one behind
/// its mutex and every mutating pool operation runs under that lock.
#[derive(Debug)]
pub struct BlockListStore {
    path: Option<PathBuf>,
    ttl: Duration,
    entries: HashMap<String, BlockEntry>,
}

impl BlockListStore {
    /// Create an in-memory store with no backing file (tests, session-keyed
    /// mode).
    #[must_use]
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            path: None,
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Load the store from `path`, pruning entries whose TTL elapsed before
    /// `now` and rewriting the file if pruning occurred. A missing file
    /// yields an empty store.
    pub fn load(path: impl Into<PathBuf>, ttl: Duration, now: u64) -> Result<Self, PoolError> {
        let path = path.into();
        let mut entries: HashMap<String, BlockEntry> = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            HashMap::new()
        };

        let before = entries.len();
        let ttl_secs = ttl.as_secs();
        entries.retain(|_, e| now.saturating_sub(e.blocked_at) < ttl_secs);
        let pruned = before - entries.len();

        let store = Self {
            path: Some(path),
            ttl,
            entries,
        };
        if pruned > 0 {
            info!(pruned, "dropped expired block entries on load");
            store.save()?;
        }
        Ok(store)
    }

    /// Insert or refresh a block for `key`, then persist.
    pub fn insert(&mut self, key: &str, reason: &str, now: u64) -> Result<(), PoolError> {
        debug!(key, reason, "blocking resource");
        self.entries.insert(
            key.to_string(),
            BlockEntry {
                blocked_at: now,
                reason: reason.to_string(),
            },
        );
        self.save()
    }

    /// Whether `key` is covered by a non-expired entry at `now`.
    #[must_use]
    pub fn is_blocked(&self, key: &str, now: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| now.saturating_sub(e.blocked_at) < self.ttl.as_secs())
    }

    /// Drop expired entries; persists only if something was removed.
    /// Returns the number of entries dropped.
    pub fn prune(&mut self, now: u64) -> Result<usize, PoolError> {
        let before = self.entries.len();
        let ttl_secs = self.ttl.as_secs();
        self.entries
            .retain(|_, e| now.saturating_sub(e.blocked_at) < ttl_secs);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            self.save()?;
        }
        Ok(dropped)
    }

    /// Entry for `key`, expired or not.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BlockEntry> {
        self.entries.get(key)
    }

    /// Number of stored entries, including any not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys with an active (non-expired) block at `now`.
    #[must_use]
    pub fn active_keys(&self, now: u64) -> Vec<String> {
        let ttl_secs = self.ttl.as_secs();
        self.entries
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.blocked_at) < ttl_secs)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Backing file path, if this store persists.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn save(&self) -> Result<(), PoolError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        if let Err(e) = fs::write(path, raw) {
            warn!(path = %path.display(), error = %e, "failed to persist block-list");
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_block_window() {
        let mut store = BlockListStore::in_memory(Duration::from_secs(100));
        store.insert("1.2.3.4:8080", "rate limited", 1_000).unwrap();
        assert!(store.is_blocked("1.2.3.4:8080", 1_000));
        assert!(store.is_blocked("1.2.3.4:8080", 1_099));
        assert!(!store.is_blocked("1.2.3.4:8080", 1_100));
        assert!(!store.is_blocked("5.6.7.8:8080", 1_000));
    }

    #[test]
    fn test_roundtrip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.json");
        let ttl = Duration::from_secs(1_000);

        let mut store = BlockListStore::load(&path, ttl, 0).unwrap();
        store.insert("a:1", "challenge", 100).unwrap();
        store.insert("b:2", "rate limited", 200).unwrap();

        let reloaded = BlockListStore::load(&path, ttl, 300).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("a:1").unwrap().reason, "challenge");
        assert_eq!(reloaded.get("b:2").unwrap().blocked_at, 200);
    }

    #[test]
    fn test_load_prunes_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.json");
        let ttl = Duration::from_secs(100);

        let mut store = BlockListStore::load(&path, ttl, 0).unwrap();
        store.insert("old:1", "stale", 0).unwrap();
        store.insert("new:2", "fresh", 950).unwrap();

        // "old" expired at t=100; a reload at t=1000 must drop it and
        // rewrite the file so the next load agrees.
        let reloaded = BlockListStore::load(&path, ttl, 1_000).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("old:1").is_none());

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("old:1"));
        assert!(raw.contains("new:2"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let store = BlockListStore::load(&path, DEFAULT_BLOCK_TTL, 0).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_prune_counts() {
        let mut store = BlockListStore::in_memory(Duration::from_secs(50));
        store.insert("a:1", "x", 0).unwrap();
        store.insert("b:2", "y", 100).unwrap();
        assert_eq!(store.prune(120).unwrap(), 1);
        assert_eq!(store.active_keys(120), vec!["b:2".to_string()]);
    }
}

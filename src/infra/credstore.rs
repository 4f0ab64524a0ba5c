//! Optional persisted credential cache.
//!
//! Maps a profile identity to its last issued session token so a fresh run
//! can reuse credentials that are still inside the freshness window instead
//! of opening a new automation session per worker. Same persistence shape as
//! the block-list: one JSON document, rewritten wholesale on each mutation.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::core::backend::Credential;
use crate::core::error::PoolError;

/// Profile-keyed credential cache with whole-file persistence.
#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    entries: HashMap<String, Credential>,
}

impl CredentialStore {
    /// Create an in-memory store with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
        }
    }

    /// Load the store from `path`; a missing file yields an empty store.
    /// Stale entries are kept on disk and filtered at lookup time, since
    /// freshness depends on the caller's TTL policy.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PoolError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Credential for `profile` if present and still fresh at `now`.
    #[must_use]
    pub fn get_fresh(&self, profile: &str, ttl_secs: u64, now: u64) -> Option<Credential> {
        self.entries
            .get(profile)
            .filter(|c| c.is_fresh(ttl_secs, now))
            .cloned()
    }

    /// Store a credential for `profile`, then persist.
    pub fn put(&mut self, profile: &str, credential: Credential) -> Result<(), PoolError> {
        debug!(profile, issued_at = credential.issued_at, "caching credential");
        self.entries.insert(profile.to_string(), credential);
        self.save()
    }

    /// Drop the credential for `profile` (forced refresh path), then persist.
    pub fn invalidate(&mut self, profile: &str) -> Result<(), PoolError> {
        if self.entries.remove(profile).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Number of cached credentials, fresh or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no credentials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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
            warn!(path = %path.display(), error = %e, "failed to persist credential cache");
            return Err(e.into());
        }
        Ok(())
    }
}

//! Resource pool: identity records, allocation, rotation, and block-list
//! integration.
//!
//! The pool is the only structure shared across worker threads. Every
//! mutating operation takes the internal mutex for its full duration;
//! callers hold no lock across backend calls. Selection is uniform-random
//! rather than round-robin because several independent processes may share
//! the same resource list through the persisted block-list; round-robin
//! would make every process pick the same record at the same logical step.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::PoolError;
use crate::infra::blocklist::BlockListStore;
use crate::util::clock::now_secs;

/// An outbound network identity (what the deployment calls a proxy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Optional credential user. In session-keyed mode the session id is
    /// appended here.
    pub username: Option<String>,
    /// Optional credential secret.
    pub password: Option<String>,
}

impl ResourceIdentity {
    /// Stable key used in the block-list and cool-down maps.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.username {
            Some(user) => format!("{}:{}:{user}", self.host, self.port),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    /// Credentials are never printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Assignment state of a pooled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Available for allocation.
    Free,
    /// Held by exactly one worker.
    Assigned,
    /// Covered by an active block entry.
    Blocked,
}

/// One pooled identity with its mutable allocation state.
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    /// The identity itself.
    pub identity: ResourceIdentity,
    /// Current assignment state.
    pub state: ResourceState,
    /// Worker currently holding the record, if any.
    pub assigned_worker: Option<usize>,
    /// Consecutive failures since the last success on this record.
    pub fail_count: u32,
    /// Epoch seconds of the last allocation or success.
    pub last_used_at: u64,
}

impl ResourceRecord {
    fn new(identity: ResourceIdentity) -> Self {
        Self {
            identity,
            state: ResourceState::Free,
            assigned_worker: None,
            fail_count: 0,
            last_used_at: 0,
        }
    }
}

/// How identities are produced.
///
/// The two modes are mutually exclusive configuration choices, never
/// composed.
#[derive(Debug, Clone)]
pub enum AllocationMode {
    /// A fixed record list with assignment bookkeeping and block tracking.
    FixedPool(Vec<ResourceIdentity>),
    /// Identities derived per session from a base identity; one distinct
    /// outbound identity per session id, no bookkeeping at all.
    SessionKeyed {
        /// Identity whose username is suffixed with the session id.
        base: ResourceIdentity,
    },
}

/// Lock-free counters for pool observability.
#[derive(Debug, Default)]
struct PoolCounters {
    acquired: AtomicU64,
    degraded: AtomicU64,
    rotations: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Records in the pool (zero in session-keyed mode).
    pub total_records: usize,
    /// Records currently assigned to a worker.
    pub assigned: usize,
    /// Records covered by an active block entry.
    pub blocked: usize,
    /// Successful acquisitions since construction.
    pub acquired: u64,
    /// Acquisitions served in degraded (shared-record) mode.
    pub degraded: u64,
    /// Rotations performed.
    pub rotations: u64,
    /// Failures reported.
    pub failures: u64,
}

struct PoolInner {
    records: Vec<ResourceRecord>,
    blocklist: BlockListStore,
    /// Key -> epoch seconds until which the record sits out after a
    /// cool-down release. In-memory only, independent of the persisted TTL.
    cooldown: HashMap<String, u64>,
}

/// Thread-safe pool of outbound identities.
pub struct ResourcePool {
    inner: Mutex<PoolInner>,
    session_base: Option<ResourceIdentity>,
    rotation_threshold: u32,
    cooldown: Duration,
    counters: PoolCounters,
}

impl ResourcePool {
    /// Construct a pool from an allocation mode and a block-list store.
    ///
    /// `rotation_threshold` is the consecutive-failure count that
    /// [`ResourcePool::report_failure`] reports as rotation-worthy;
    /// `cooldown` is the transient sit-out applied by
    /// [`ResourcePool::release`] with `cool_down = true`.
    #[must_use]
    pub fn new(
        mode: AllocationMode,
        blocklist: BlockListStore,
        rotation_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        let (records, session_base) = match mode {
            AllocationMode::FixedPool(identities) => {
                (identities.into_iter().map(ResourceRecord::new).collect(), None)
            }
            AllocationMode::SessionKeyed { base } => (Vec::new(), Some(base)),
        };
        Self {
            inner: Mutex::new(PoolInner {
                records,
                blocklist,
                cooldown: HashMap::new(),
            }),
            session_base,
            rotation_threshold,
            cooldown,
            counters: PoolCounters::default(),
        }
    }

    /// Derive the identity for `session_id` in session-keyed mode.
    ///
    /// Deterministic per session id; returns `None` in fixed-pool mode.
    #[must_use]
    pub fn derive_for_session(&self, session_id: &str) -> Option<ResourceIdentity> {
        self.session_base.as_ref().map(|base| {
            let mut derived = base.clone();
            derived.username = Some(match &base.username {
                Some(user) => format!("{user}-{session_id}"),
                None => session_id.to_string(),
            });
            derived
        })
    }

    /// Acquire an identity for `worker_id`.
    ///
    /// Fixed-pool mode: sticky affinity first (the worker's current
    /// non-blocked record is returned unchanged), then uniform-random among
    /// free, non-blocked, non-cooling records, then a degraded fallback to
    /// any non-blocked record even if assigned elsewhere. Fails with
    /// [`PoolError::NoResourceAvailable`] only when every record is blocked.
    ///
    /// Session-keyed mode: a fresh identity derived from a random session
    /// id, no bookkeeping.
    pub fn acquire(&self, worker_id: usize) -> Result<ResourceIdentity, PoolError> {
        if self.session_base.is_some() {
            let session_id = uuid::Uuid::new_v4().simple().to_string();
            let identity = self
                .derive_for_session(&session_id)
                .ok_or_else(|| PoolError::Backend("session base vanished".into()))?;
            self.counters.acquired.fetch_add(1, Ordering::Relaxed);
            debug!(worker_id, identity = %identity, "derived session-keyed identity");
            return Ok(identity);
        }

        let now = now_secs();
        let mut inner = self.inner.lock();

        // Sticky affinity: keep the current record while it stays unblocked.
        {
            let PoolInner {
                records, blocklist, ..
            } = &mut *inner;
            if let Some(rec) = records
                .iter_mut()
                .find(|r| r.assigned_worker == Some(worker_id))
            {
                let key = rec.identity.key();
                if blocklist.is_blocked(&key, now) {
                    rec.state = ResourceState::Blocked;
                    rec.assigned_worker = None;
                } else {
                    rec.last_used_at = now;
                    self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                    return Ok(rec.identity.clone());
                }
            }
        }

        self.acquire_locked(&mut inner, worker_id, now, None)
    }

    /// Record a failure on the worker's current record.
    ///
    /// Returns whether the consecutive-failure count has reached the
    /// rotation threshold. Acting on that is the caller's responsibility;
    /// [`ResourcePool::rotate`] never re-checks it.
    pub fn report_failure(&self, worker_id: usize, reason: &str) -> bool {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        if self.session_base.is_some() {
            // No record state to count against; rotation is always cheap.
            return true;
        }
        let mut inner = self.inner.lock();
        match inner
            .records
            .iter_mut()
            .find(|r| r.assigned_worker == Some(worker_id))
        {
            Some(rec) => {
                rec.fail_count += 1;
                debug!(
                    worker_id,
                    identity = %rec.identity,
                    fail_count = rec.fail_count,
                    reason,
                    "failure reported on resource"
                );
                rec.fail_count >= self.rotation_threshold
            }
            None => {
                debug!(worker_id, reason, "failure reported with no assigned resource");
                false
            }
        }
    }

    /// Reset the failure count on the worker's record after a success.
    pub fn report_success(&self, worker_id: usize) {
        if self.session_base.is_some() {
            return;
        }
        let now = now_secs();
        let mut inner = self.inner.lock();
        if let Some(rec) = inner
            .records
            .iter_mut()
            .find(|r| r.assigned_worker == Some(worker_id))
        {
            rec.fail_count = 0;
            rec.last_used_at = now;
        }
    }

    /// Block the worker's current record, persist the block entry, and
    /// acquire a replacement excluding the just-blocked identity.
    ///
    /// Rotation is unconditional once called.
    pub fn rotate(&self, worker_id: usize, reason: &str) -> Result<ResourceIdentity, PoolError> {
        self.counters.rotations.fetch_add(1, Ordering::Relaxed);
        if self.session_base.is_some() {
            // A fresh session id is a fresh identity; nothing to block.
            let session_id = uuid::Uuid::new_v4().simple().to_string();
            let identity = self
                .derive_for_session(&session_id)
                .ok_or_else(|| PoolError::Backend("session base vanished".into()))?;
            info!(worker_id, identity = %identity, reason, "rotated session-keyed identity");
            return Ok(identity);
        }

        let now = now_secs();
        let mut inner = self.inner.lock();

        let blocked_key = if let Some(rec) = inner
            .records
            .iter_mut()
            .find(|r| r.assigned_worker == Some(worker_id))
        {
            let key = rec.identity.key();
            info!(worker_id, identity = %rec.identity, reason, "rotating away from resource");
            rec.state = ResourceState::Blocked;
            rec.assigned_worker = None;
            rec.fail_count = 0;
            Some(key)
        } else {
            None
        };

        if let Some(key) = &blocked_key {
            inner.blocklist.insert(key, reason, now)?;
        }

        self.acquire_locked(&mut inner, worker_id, now, blocked_key.as_deref())
    }

    /// Free the worker's record. With `cool_down` the record sits out a
    /// short in-memory window so the next acquire (for any worker) skips
    /// it; this is independent of the persisted block TTL.
    pub fn release(&self, worker_id: usize, cool_down: bool) {
        if self.session_base.is_some() {
            return;
        }
        let now = now_secs();
        let cooldown_secs = self.cooldown.as_secs();
        let mut inner = self.inner.lock();
        let key = inner
            .records
            .iter_mut()
            .find(|r| r.assigned_worker == Some(worker_id))
            .map(|rec| {
                rec.state = ResourceState::Free;
                rec.assigned_worker = None;
                rec.identity.key()
            });
        if let Some(key) = key {
            if cool_down {
                debug!(worker_id, key, cooldown_secs, "releasing resource with cool-down");
                inner.cooldown.insert(key, now + cooldown_secs);
            }
        }
    }

    /// Identity currently assigned to `worker_id`, if any.
    #[must_use]
    pub fn assigned_identity(&self, worker_id: usize) -> Option<ResourceIdentity> {
        let inner = self.inner.lock();
        inner
            .records
            .iter()
            .find(|r| r.assigned_worker == Some(worker_id))
            .map(|r| r.identity.clone())
    }

    /// Drop expired block entries and return freed records to the pool.
    pub fn prune_blocked(&self) -> Result<usize, PoolError> {
        let now = now_secs();
        let mut inner = self.inner.lock();
        let dropped = inner.blocklist.prune(now)?;
        let unblocked: Vec<usize> = inner
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.state == ResourceState::Blocked && !inner.blocklist.is_blocked(&r.identity.key(), now)
            })
            .map(|(i, _)| i)
            .collect();
        for idx in unblocked {
            inner.records[idx].state = ResourceState::Free;
            inner.records[idx].fail_count = 0;
        }
        Ok(dropped)
    }

    /// Snapshot pool utilization and counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let now = now_secs();
        let inner = self.inner.lock();
        PoolStats {
            total_records: inner.records.len(),
            assigned: inner
                .records
                .iter()
                .filter(|r| r.assigned_worker.is_some())
                .count(),
            blocked: inner
                .records
                .iter()
                .filter(|r| inner.blocklist.is_blocked(&r.identity.key(), now))
                .count(),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            rotations: self.counters.rotations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn acquire_locked(
        &self,
        inner: &mut PoolInner,
        worker_id: usize,
        now: u64,
        exclude_key: Option<&str>,
    ) -> Result<ResourceIdentity, PoolError> {
        let PoolInner {
            records,
            blocklist,
            cooldown,
        } = &mut *inner;
        cooldown.retain(|_, until| *until > now);

        // Primary selection: free, not blocked, not cooling down.
        let free: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                let key = r.identity.key();
                r.assigned_worker.is_none()
                    && !blocklist.is_blocked(&key, now)
                    && exclude_key != Some(key.as_str())
                    && !cooldown.contains_key(&key)
            })
            .map(|(i, _)| i)
            .collect();

        if let Some(&idx) = free.choose(&mut rand::rng()) {
            let rec = &mut records[idx];
            rec.state = ResourceState::Assigned;
            rec.assigned_worker = Some(worker_id);
            rec.fail_count = 0;
            rec.last_used_at = now;
            self.counters.acquired.fetch_add(1, Ordering::Relaxed);
            debug!(worker_id, identity = %rec.identity, "acquired resource");
            return Ok(rec.identity.clone());
        }

        // Degraded fallback: share any non-blocked record, even one assigned
        // elsewhere. Assignment state is not disturbed. Cooling records are
        // only eligible once nothing else is left.
        let eligible = |r: &ResourceRecord| {
            let key = r.identity.key();
            !blocklist.is_blocked(&key, now) && exclude_key != Some(key.as_str())
        };
        let mut shared: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| eligible(r) && !cooldown.contains_key(&r.identity.key()))
            .map(|(i, _)| i)
            .collect();
        if shared.is_empty() {
            shared = records
                .iter()
                .enumerate()
                .filter(|(_, r)| eligible(r))
                .map(|(i, _)| i)
                .collect();
        }

        if let Some(&idx) = shared.choose(&mut rand::rng()) {
            let identity = records[idx].identity.clone();
            self.counters.acquired.fetch_add(1, Ordering::Relaxed);
            self.counters.degraded.fetch_add(1, Ordering::Relaxed);
            warn!(
                worker_id,
                identity = %identity,
                "no free resource; sharing an assigned record in degraded mode"
            );
            return Ok(identity);
        }

        warn!(worker_id, "every resource is blocked");
        Err(PoolError::NoResourceAvailable)
    }
}

//! Worker coordinator: slots, credential lifecycle, and job execution.
//!
//! Each worker slot is driven by exactly one thread; a slot's resource and
//! credential pair is never touched from anywhere else. The resource pool
//! is the only cross-slot state and carries its own lock. Credential
//! freshness, forced refresh on authorization failures, and the
//! rotation-on-threshold dance all live here so the scheduler only ever
//! sees the error taxonomy.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::backend::{Credential, JobPayload, JobResult, SessionBackend};
use crate::core::error::PoolError;
use crate::core::resource_pool::{ResourceIdentity, ResourcePool};
use crate::infra::credstore::CredentialStore;
use crate::util::clock::now_secs;

/// Default credential freshness window: 50 minutes.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(50 * 60);

/// One worker slot and its private session state.
#[derive(Debug)]
struct WorkerSlot {
    id: usize,
    profile: String,
    credential: Option<Credential>,
    busy: bool,
}

/// Coordinates N worker slots over a shared pool and a session backend.
pub struct WorkerCoordinator<B: SessionBackend> {
    backend: Arc<B>,
    pool: Arc<ResourcePool>,
    credential_ttl: Duration,
    probe_identity: bool,
    // One mutex per slot: only the slot's own thread contends on it, the
    // lock just keeps the compiler honest about interior mutability.
    slots: Vec<Mutex<WorkerSlot>>,
    credstore: Option<Mutex<CredentialStore>>,
}

impl<B: SessionBackend> WorkerCoordinator<B> {
    /// Create a coordinator with `worker_count` slots named `profile-{id}`.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        pool: Arc<ResourcePool>,
        worker_count: usize,
        credential_ttl: Duration,
    ) -> Self {
        let slots = (0..worker_count)
            .map(|id| {
                Mutex::new(WorkerSlot {
                    id,
                    profile: format!("profile-{id}"),
                    credential: None,
                    busy: false,
                })
            })
            .collect();
        Self {
            backend,
            pool,
            credential_ttl,
            probe_identity: false,
            slots,
            credstore: None,
        }
    }

    /// Attach a persisted credential cache for cross-run reuse.
    #[must_use]
    pub fn with_credential_store(mut self, store: CredentialStore) -> Self {
        self.credstore = Some(Mutex::new(store));
        self
    }

    /// Probe each freshly acquired identity before committing to it.
    #[must_use]
    pub fn with_identity_probe(mut self) -> Self {
        self.probe_identity = true;
        self
    }

    /// Number of worker slots.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// Shared resource pool handle.
    #[must_use]
    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// Return a fresh credential for the slot, issuing a new one when the
    /// cached credential aged out or `force` is set.
    pub async fn ensure_credential(
        &self,
        worker_id: usize,
        resource: &ResourceIdentity,
        force: bool,
    ) -> Result<Credential, PoolError> {
        let slot = self
            .slots
            .get(worker_id)
            .ok_or_else(|| PoolError::Backend(format!("unknown worker {worker_id}")))?;
        let now = now_secs();
        let ttl = self.credential_ttl.as_secs();
        let profile = {
            let guard = slot.lock();
            if !force {
                if let Some(cred) = guard
                    .credential
                    .as_ref()
                    .filter(|c| c.is_fresh(ttl, now))
                {
                    return Ok(cred.clone());
                }
            }
            guard.profile.clone()
        };

        if !force {
            if let Some(store) = &self.credstore {
                if let Some(cred) = store.lock().get_fresh(&profile, ttl, now) {
                    debug!(worker_id, profile, "reusing persisted credential");
                    slot.lock().credential = Some(cred.clone());
                    return Ok(cred);
                }
            }
        }

        info!(worker_id, profile, force, "issuing session credential");
        let cred = self.backend.issue_credential(resource, &profile).await?;
        slot.lock().credential = Some(cred.clone());
        if let Some(store) = &self.credstore {
            if let Err(e) = store.lock().put(&profile, cred.clone()) {
                warn!(worker_id, error = %e, "failed to persist credential");
            }
        }
        Ok(cred)
    }

    /// Execute one job on the slot: acquire a resource and credential, run
    /// the backend, and recover locally where the taxonomy allows.
    ///
    /// Authorization failures force one credential refresh and one retry of
    /// the same job; a second authorization failure is reclassified as a
    /// transient block. Transient blocks count against the slot's resource
    /// and trigger rotation at the threshold; the job error still surfaces
    /// so the scheduler can side-list the task.
    pub async fn run_job(&self, worker_id: usize, job: &JobPayload) -> Result<JobResult, PoolError> {
        let slot = self
            .slots
            .get(worker_id)
            .ok_or_else(|| PoolError::Backend(format!("unknown worker {worker_id}")))?;
        {
            let mut guard = slot.lock();
            debug_assert_eq!(guard.id, worker_id);
            debug_assert!(!guard.busy, "slot driven by more than one job");
            guard.busy = true;
        }
        let result = self.run_job_inner(worker_id, job).await;
        slot.lock().busy = false;
        result
    }

    async fn run_job_inner(
        &self,
        worker_id: usize,
        job: &JobPayload,
    ) -> Result<JobResult, PoolError> {
        let mut resource = self.pool.acquire(worker_id)?;

        if self.probe_identity {
            let (ok, observed) = self.backend.test_identity(&resource).await;
            if ok {
                debug!(worker_id, observed, "identity probe passed");
            } else {
                warn!(worker_id, identity = %resource, "identity probe failed");
                if self.pool.report_failure(worker_id, "probe failed") {
                    resource = self.pool.rotate(worker_id, "probe failed")?;
                }
            }
        }

        let credential = self.ensure_credential(worker_id, &resource, false).await?;

        match self.backend.execute_job(&credential, &resource, job).await {
            Ok(result) => {
                self.pool.report_success(worker_id);
                Ok(result)
            }
            Err(PoolError::AuthExpired) => {
                info!(worker_id, job = job.label(), "authorization expired; refreshing once");
                let refreshed = self.ensure_credential(worker_id, &resource, true).await?;
                match self.backend.execute_job(&refreshed, &resource, job).await {
                    Ok(result) => {
                        self.pool.report_success(worker_id);
                        Ok(result)
                    }
                    // A credential that fails twice in a row looks like the
                    // service refusing the identity, not the token.
                    Err(PoolError::AuthExpired) => {
                        self.handle_transient(worker_id, "authorization refused after refresh")
                    }
                    Err(err) if err.is_transient_block() => {
                        self.handle_transient(worker_id, &err.reason())
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) if err.is_transient_block() => self.handle_transient(worker_id, &err.reason()),
            Err(err) => Err(err),
        }
    }

    /// Release the slot's resource, optionally with a cool-down, and drop
    /// its cached credential.
    pub fn release_worker(&self, worker_id: usize, cool_down: bool) {
        self.pool.release(worker_id, cool_down);
        if let Some(slot) = self.slots.get(worker_id) {
            slot.lock().credential = None;
        }
    }

    fn handle_transient(&self, worker_id: usize, reason: &str) -> Result<JobResult, PoolError> {
        if self.pool.report_failure(worker_id, reason) {
            match self.pool.rotate(worker_id, reason) {
                Ok(next) => {
                    info!(worker_id, identity = %next, "rotated after repeated blocks");
                }
                Err(e) => {
                    warn!(worker_id, error = %e, "rotation found no replacement");
                }
            }
        }
        Err(PoolError::TransientBlock(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource_pool::AllocationMode;
    use crate::infra::blocklist::BlockListStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted backend: fails the first `fail_auth` executions with
    /// AuthExpired and the first `fail_block` with TransientBlock.
    struct ScriptedBackend {
        issued: AtomicU32,
        executed: AtomicU32,
        fail_auth: u32,
        fail_block: u32,
    }

    impl ScriptedBackend {
        fn new(fail_auth: u32, fail_block: u32) -> Self {
            Self {
                issued: AtomicU32::new(0),
                executed: AtomicU32::new(0),
                fail_auth,
                fail_block,
            }
        }
    }

    #[async_trait]
    impl SessionBackend for ScriptedBackend {
        async fn issue_credential(
            &self,
            _resource: &ResourceIdentity,
            profile: &str,
        ) -> Result<Credential, PoolError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                token: format!("{profile}-tok-{n}"),
                issued_at: now_secs(),
            })
        }

        async fn execute_job(
            &self,
            _credential: &Credential,
            _resource: &ResourceIdentity,
            _job: &JobPayload,
        ) -> Result<JobResult, PoolError> {
            let n = self.executed.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_auth {
                return Err(PoolError::AuthExpired);
            }
            if n < self.fail_auth + self.fail_block {
                return Err(PoolError::TransientBlock("rate limited".into()));
            }
            Ok(JobResult {
                output: "artifact".into(),
                observed_address: None,
            })
        }

        async fn test_identity(&self, resource: &ResourceIdentity) -> (bool, String) {
            (true, resource.host.clone())
        }
    }

    fn pool_of(count: u16) -> Arc<ResourcePool> {
        let identities = (1..=count)
            .map(|n| ResourceIdentity {
                host: format!("10.0.1.{n}"),
                port: 3128,
                username: None,
                password: None,
            })
            .collect();
        Arc::new(ResourcePool::new(
            AllocationMode::FixedPool(identities),
            BlockListStore::in_memory(Duration::from_secs(3600)),
            3,
            Duration::from_secs(60),
        ))
    }

    fn job() -> JobPayload {
        JobPayload::SceneImage {
            prompt: "a quiet harbor".into(),
            scene_index: 0,
        }
    }

    #[tokio::test]
    async fn test_credential_cached_while_fresh() {
        let backend = Arc::new(ScriptedBackend::new(0, 0));
        let coord = WorkerCoordinator::new(
            Arc::clone(&backend),
            pool_of(2),
            2,
            DEFAULT_CREDENTIAL_TTL,
        );
        let resource = coord.pool().acquire(0).unwrap();

        let a = coord.ensure_credential(0, &resource, false).await.unwrap();
        let b = coord.ensure_credential(0, &resource, false).await.unwrap();
        assert_eq!(a.token, b.token);
        assert_eq!(backend.issued.load(Ordering::SeqCst), 1);

        // Forced refresh bypasses the freshness check.
        let c = coord.ensure_credential(0, &resource, true).await.unwrap();
        assert_ne!(a.token, c.token);
        assert_eq!(backend.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_credential_reissued() {
        let backend = Arc::new(ScriptedBackend::new(0, 0));
        // Zero TTL: every credential is immediately stale.
        let coord = WorkerCoordinator::new(
            Arc::clone(&backend),
            pool_of(2),
            1,
            Duration::from_secs(0),
        );
        let resource = coord.pool().acquire(0).unwrap();
        coord.ensure_credential(0, &resource, false).await.unwrap();
        coord.ensure_credential(0, &resource, false).await.unwrap();
        assert_eq!(backend.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_once_and_retries() {
        let backend = Arc::new(ScriptedBackend::new(1, 0));
        let coord = WorkerCoordinator::new(
            Arc::clone(&backend),
            pool_of(2),
            1,
            DEFAULT_CREDENTIAL_TTL,
        );
        let result = coord.run_job(0, &job()).await.unwrap();
        assert_eq!(result.output, "artifact");
        // First token, then the forced refresh.
        assert_eq!(backend.issued.load(Ordering::SeqCst), 2);
        assert_eq!(backend.executed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_double_auth_failure_reclassified() {
        let backend = Arc::new(ScriptedBackend::new(2, 0));
        let coord = WorkerCoordinator::new(
            Arc::clone(&backend),
            pool_of(2),
            1,
            DEFAULT_CREDENTIAL_TTL,
        );
        let err = coord.run_job(0, &job()).await.unwrap_err();
        assert!(err.is_transient_block());
    }

    #[tokio::test]
    async fn test_transient_block_rotates_at_threshold() {
        let backend = Arc::new(ScriptedBackend::new(0, 3));
        let pool = pool_of(3);
        let coord = WorkerCoordinator::new(
            Arc::clone(&backend),
            Arc::clone(&pool),
            1,
            DEFAULT_CREDENTIAL_TTL,
        );

        let first = pool.acquire(0).unwrap();
        for _ in 0..3 {
            let err = coord.run_job(0, &job()).await.unwrap_err();
            assert!(err.is_transient_block());
        }
        // Threshold reached on the third failure: the identity rotated.
        let current = pool.assigned_identity(0).unwrap();
        assert_ne!(current.key(), first.key());
        assert_eq!(pool.stats().rotations, 1);

        // Backend script exhausted its failures; next job succeeds.
        let result = coord.run_job(0, &job()).await.unwrap();
        assert_eq!(result.output, "artifact");
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        struct PermanentBackend;
        #[async_trait]
        impl SessionBackend for PermanentBackend {
            async fn issue_credential(
                &self,
                _resource: &ResourceIdentity,
                profile: &str,
            ) -> Result<Credential, PoolError> {
                Ok(Credential {
                    token: profile.to_string(),
                    issued_at: now_secs(),
                })
            }
            async fn execute_job(
                &self,
                _credential: &Credential,
                _resource: &ResourceIdentity,
                _job: &JobPayload,
            ) -> Result<JobResult, PoolError> {
                Err(PoolError::Permanent("malformed payload".into()))
            }
            async fn test_identity(&self, _resource: &ResourceIdentity) -> (bool, String) {
                (true, String::new())
            }
        }

        let coord = WorkerCoordinator::new(
            Arc::new(PermanentBackend),
            pool_of(1),
            1,
            DEFAULT_CREDENTIAL_TTL,
        );
        let err = coord.run_job(0, &job()).await.unwrap_err();
        assert!(matches!(err, PoolError::Permanent(_)));
        assert_eq!(coord.pool().stats().rotations, 0);
    }

    #[tokio::test]
    async fn test_credstore_reuse() {
        let backend = Arc::new(ScriptedBackend::new(0, 0));
        let mut store = CredentialStore::in_memory();
        store
            .put(
                "profile-0",
                Credential {
                    token: "from-disk".into(),
                    issued_at: now_secs(),
                },
            )
            .unwrap();
        let coord = WorkerCoordinator::new(
            Arc::clone(&backend),
            pool_of(1),
            1,
            DEFAULT_CREDENTIAL_TTL,
        )
        .with_credential_store(store);

        let resource = coord.pool().acquire(0).unwrap();
        let cred = coord.ensure_credential(0, &resource, false).await.unwrap();
        assert_eq!(cred.token, "from-disk");
        assert_eq!(backend.issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_release_worker_clears_credential() {
        let backend = Arc::new(ScriptedBackend::new(0, 0));
        let coord = WorkerCoordinator::new(
            Arc::clone(&backend),
            pool_of(2),
            1,
            DEFAULT_CREDENTIAL_TTL,
        );
        coord.run_job(0, &job()).await.unwrap();
        assert!(coord.pool().assigned_identity(0).is_some());
        coord.release_worker(0, false);
        assert!(coord.pool().assigned_identity(0).is_none());

        // Next job issues a fresh credential.
        coord.run_job(0, &job()).await.unwrap();
        assert_eq!(backend.issued.load(Ordering::SeqCst), 2);
    }
}

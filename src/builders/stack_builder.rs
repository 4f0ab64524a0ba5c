//! Construct pool, scheduler, and coordinator from a [`RotationConfig`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::settings::{AllocationModeConfig, RotationConfig};
use crate::core::backend::SessionBackend;
use crate::core::error::PoolError;
use crate::core::resource_pool::{AllocationMode, ResourcePool};
use crate::core::retry::RetryPolicy;
use crate::core::scheduler::{SchedulerLimits, TurnScheduler};
use crate::core::worker::WorkerCoordinator;
use crate::infra::blocklist::BlockListStore;
use crate::infra::credstore::CredentialStore;
use crate::util::clock::now_secs;

/// Build a resource pool, loading the persisted block-list when a path is
/// configured.
pub fn build_pool(cfg: &RotationConfig) -> Result<ResourcePool, PoolError> {
    cfg.validate().map_err(PoolError::InvalidConfig)?;

    let ttl = Duration::from_secs(cfg.pool.block_ttl_secs);
    let blocklist = match &cfg.pool.blocklist_path {
        Some(path) => BlockListStore::load(path, ttl, now_secs())?,
        None => BlockListStore::in_memory(ttl),
    };
    let mode = match cfg.pool.allocation.clone() {
        AllocationModeConfig::FixedPool { resources } => AllocationMode::FixedPool(resources),
        AllocationModeConfig::SessionKeyed { base } => AllocationMode::SessionKeyed { base },
    };
    Ok(ResourcePool::new(
        mode,
        blocklist,
        cfg.pool.rotation_threshold,
        Duration::from_secs(cfg.pool.cooldown_secs),
    ))
}

/// Build a turn scheduler from the scheduler section.
pub fn build_scheduler(cfg: &RotationConfig) -> Result<TurnScheduler, PoolError> {
    cfg.validate().map_err(PoolError::InvalidConfig)?;
    Ok(TurnScheduler::new(
        SchedulerLimits {
            max_voices: cfg.scheduler.max_voices,
            poll_interval: Duration::from_millis(cfg.scheduler.poll_interval_ms),
        },
        retry_policy(cfg),
    ))
}

/// Build a worker coordinator over `pool` and `backend`, wiring the
/// persisted credential cache and the identity probe when configured.
pub fn build_coordinator<B: SessionBackend>(
    cfg: &RotationConfig,
    pool: Arc<ResourcePool>,
    backend: Arc<B>,
) -> Result<WorkerCoordinator<B>, PoolError> {
    cfg.validate().map_err(PoolError::InvalidConfig)?;
    let mut coordinator = WorkerCoordinator::new(
        backend,
        pool,
        cfg.worker.worker_count,
        Duration::from_secs(cfg.worker.credential_ttl_secs),
    );
    if let Some(path) = &cfg.worker.credstore_path {
        coordinator = coordinator.with_credential_store(CredentialStore::load(path)?);
    }
    if cfg.worker.probe_identity {
        coordinator = coordinator.with_identity_probe();
    }
    Ok(coordinator)
}

fn retry_policy(cfg: &RotationConfig) -> RetryPolicy {
    RetryPolicy {
        rotation_threshold: cfg.pool.rotation_threshold,
        retry_rounds: cfg.scheduler.retry_rounds,
        round_delay_base: Duration::from_secs(cfg.scheduler.round_delay_secs),
    }
}

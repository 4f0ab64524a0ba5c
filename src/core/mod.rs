//! Core rotation and scheduling components.

pub mod backend;
pub mod error;
pub mod resource_pool;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use backend::{Credential, JobPayload, JobResult, SessionBackend};
pub use error::{AppResult, PoolError};
pub use resource_pool::{
    AllocationMode, PoolStats, ResourceIdentity, ResourcePool, ResourceRecord, ResourceState,
};
pub use retry::{wait_interruptible, RetryPolicy};
pub use scheduler::{SchedulerLimits, Task, TurnScheduler, VoiceSummary};
pub use worker::{WorkerCoordinator, DEFAULT_CREDENTIAL_TTL};

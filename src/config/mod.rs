//! Configuration models for the pool, scheduler, and workers.

pub mod settings;

pub use settings::{
    AllocationModeConfig, PoolSettings, RotationConfig, SchedulerSettings, WorkerSettings,
};

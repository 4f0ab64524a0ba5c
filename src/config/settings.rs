//! Configuration structures for the pool, scheduler, and workers.

use serde::{Deserialize, Serialize};

use crate::core::resource_pool::ResourceIdentity;

/// Identity supply configuration. The two modes are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AllocationModeConfig {
    /// A fixed resource list with assignment and block tracking.
    FixedPool {
        /// The pooled identities.
        resources: Vec<ResourceIdentity>,
    },
    /// Identities derived per session from one base identity.
    SessionKeyed {
        /// Identity whose username carries the session suffix.
        base: ResourceIdentity,
    },
}

/// Resource pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Identity supply mode.
    pub allocation: AllocationModeConfig,
    /// Consecutive failures before rotation is indicated.
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: u32,
    /// Persisted block TTL in seconds (default 48 hours).
    #[serde(default = "default_block_ttl_secs")]
    pub block_ttl_secs: u64,
    /// In-memory cool-down after a `release(cool_down = true)`, seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Block-list file path; `None` keeps the block-list in memory.
    #[serde(default)]
    pub blocklist_path: Option<String>,
}

/// Turn scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Maximum concurrently registered voices.
    #[serde(default = "default_max_voices")]
    pub max_voices: usize,
    /// Turn-poll sleep in milliseconds; bounds scheduling latency.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Rounds of the post-pass retry phase.
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,
    /// Base delay between retry rounds in seconds (round n waits n * base).
    #[serde(default = "default_round_delay_secs")]
    pub round_delay_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_voices: default_max_voices(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_rounds: default_retry_rounds(),
            round_delay_secs: default_round_delay_secs(),
        }
    }
}

/// Worker coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Worker slots; defaults to the number of CPUs.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Credential freshness window in seconds (default 50 minutes).
    #[serde(default = "default_credential_ttl_secs")]
    pub credential_ttl_secs: u64,
    /// Credential cache file path; `None` disables cross-run reuse.
    #[serde(default)]
    pub credstore_path: Option<String>,
    /// Probe each freshly acquired identity before use.
    #[serde(default)]
    pub probe_identity: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            credential_ttl_secs: default_credential_ttl_secs(),
            credstore_path: None,
            probe_identity: false,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Resource pool section.
    pub pool: PoolSettings,
    /// Scheduler section.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Worker section.
    #[serde(default)]
    pub worker: WorkerSettings,
}

const fn default_rotation_threshold() -> u32 {
    3
}
const fn default_block_ttl_secs() -> u64 {
    48 * 60 * 60
}
const fn default_cooldown_secs() -> u64 {
    60
}
const fn default_max_voices() -> usize {
    8
}
const fn default_poll_interval_ms() -> u64 {
    100
}
const fn default_retry_rounds() -> u32 {
    3
}
const fn default_round_delay_secs() -> u64 {
    5
}
fn default_worker_count() -> usize {
    num_cpus::get()
}
const fn default_credential_ttl_secs() -> u64 {
    50 * 60
}

impl PoolSettings {
    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.rotation_threshold == 0 {
            return Err("rotation_threshold must be greater than 0".into());
        }
        if self.block_ttl_secs == 0 {
            return Err("block_ttl_secs must be greater than 0".into());
        }
        if let AllocationModeConfig::FixedPool { resources } = &self.allocation {
            if resources.is_empty() {
                return Err("fixed_pool requires at least one resource".into());
            }
        }
        Ok(())
    }
}

impl SchedulerSettings {
    /// Validate scheduler configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_voices == 0 {
            return Err("max_voices must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

impl WorkerSettings {
    /// Validate worker configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.credential_ttl_secs == 0 {
            return Err("credential_ttl_secs must be greater than 0".into());
        }
        Ok(())
    }
}

impl RotationConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler: {e}"))?;
        self.worker.validate().map_err(|e| format!("worker: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply environment overrides on top of the parsed document.
    ///
    /// Loads a `.env` file if present, then honors `TURNWHEEL_WORKERS`,
    /// `TURNWHEEL_MAX_VOICES`, `TURNWHEEL_BLOCKLIST`, and
    /// `TURNWHEEL_CREDSTORE`. Malformed numeric values are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let _ = dotenvy::dotenv();
        if let Ok(raw) = std::env::var("TURNWHEEL_WORKERS") {
            if let Ok(n) = raw.parse() {
                self.worker.worker_count = n;
            }
        }
        if let Ok(raw) = std::env::var("TURNWHEEL_MAX_VOICES") {
            if let Ok(n) = raw.parse() {
                self.scheduler.max_voices = n;
            }
        }
        if let Ok(path) = std::env::var("TURNWHEEL_BLOCKLIST") {
            self.pool.blocklist_path = Some(path);
        }
        if let Ok(path) = std::env::var("TURNWHEEL_CREDSTORE") {
            self.worker.credstore_path = Some(path);
        }
        self
    }
}

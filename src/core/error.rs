//! Error taxonomy for pool, scheduler, and worker operations.
//!
//! The taxonomy drives recovery: transient blocks trigger resource rotation
//! and task-level retry, expired authorizations trigger a single forced
//! credential refresh, and only budget or resource exhaustion surfaces to
//! the voice-level result.

use thiserror::Error;

/// Errors produced by pool, scheduler, and worker components.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The remote service refused the request (rate limit, bot challenge).
    /// Retryable via resource rotation until the per-task budget is spent.
    #[error("transient block: {0}")]
    TransientBlock(String),
    /// The session credential is no longer accepted by the remote service.
    #[error("authorization expired")]
    AuthExpired,
    /// Every resource in the pool is covered by an active block entry.
    #[error("no resource available")]
    NoResourceAvailable,
    /// Unrecoverable failure (malformed payload, misconfiguration). Never
    /// retried.
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// A persisted store could not be read or written.
    #[error("persistence error: {0}")]
    Persist(String),
    /// A voice id beyond the configured maximum was registered.
    #[error("voice limit exceeded: voice {0} with maximum {1}")]
    VoiceLimit(usize, usize),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The shared stop flag was raised while waiting.
    #[error("shutdown in progress")]
    Shutdown,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl PoolError {
    /// Whether this error is a transient block, eligible for rotation and
    /// task-level retry.
    #[must_use]
    pub const fn is_transient_block(&self) -> bool {
        matches!(self, Self::TransientBlock(_))
    }

    /// Whether this error calls for a forced credential refresh.
    #[must_use]
    pub const fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Short reason string recorded in block entries and voice summaries.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::TransientBlock(r) | Self::Permanent(r) | Self::Backend(r) => r.clone(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for PoolError {
    fn from(err: std::io::Error) -> Self {
        Self::Persist(err.to_string())
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persist(err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

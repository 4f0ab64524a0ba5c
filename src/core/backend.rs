//! Session backend abstraction and job payload types.
//!
//! The crate never talks to the remote service itself. All page navigation,
//! token issuance, and generation work happens behind [`SessionBackend`],
//! which an automation driver implements. Backend errors must map onto the
//! taxonomy in [`crate::core::error::PoolError`] so the worker coordinator
//! can decide between rotation, credential refresh, and terminal failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::PoolError;
use crate::core::resource_pool::ResourceIdentity;

/// A time-limited session token bound to one worker slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque session token as issued by the backend.
    pub token: String,
    /// Issuance time in epoch seconds. Freshness is judged against the
    /// configured credential TTL.
    pub issued_at: u64,
}

impl Credential {
    /// Whether the credential is still within its freshness window at `now`.
    #[must_use]
    pub const fn is_fresh(&self, ttl_secs: u64, now: u64) -> bool {
        now.saturating_sub(self.issued_at) < ttl_secs
    }
}

/// Job kinds dispatched to the backend.
///
/// A closed set rather than an untyped dictionary: the scheduler only ever
/// dispatches these three shapes of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Generate a scene image from a prompt.
    SceneImage {
        /// Generation prompt.
        prompt: String,
        /// Position of the scene within the voice's script.
        scene_index: usize,
    },
    /// Generate an image anchored to an uploaded reference.
    ReferenceImage {
        /// Generation prompt.
        prompt: String,
        /// Local path of the reference image to upload.
        source_path: String,
    },
    /// Animate a still into a video clip.
    VideoClip {
        /// Motion prompt.
        prompt: String,
        /// Effect filter string applied by the remote service.
        effect: String,
        /// Requested clip length in seconds.
        duration_secs: u32,
    },
}

impl JobPayload {
    /// Stable label used in logs and summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SceneImage { .. } => "scene_image",
            Self::ReferenceImage { .. } => "reference_image",
            Self::VideoClip { .. } => "video_clip",
        }
    }
}

/// Result of one executed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Backend-defined output handle (URL or local path of the artifact).
    pub output: String,
    /// Outbound address the backend observed, when it reports one.
    pub observed_address: Option<String>,
}

/// Capabilities the automation driver must provide.
///
/// Calls may take tens of seconds and must be assumed to fail transiently;
/// each worker thread blocks on them from its own runtime.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Open an automation session bound to the given outbound identity and
    /// local profile, returning a session credential.
    async fn issue_credential(
        &self,
        resource: &ResourceIdentity,
        profile: &str,
    ) -> Result<Credential, PoolError>;

    /// Perform the actual generation work for one job.
    async fn execute_job(
        &self,
        credential: &Credential,
        resource: &ResourceIdentity,
        job: &JobPayload,
    ) -> Result<JobResult, PoolError>;

    /// Lightweight connectivity probe used before committing a worker to a
    /// resource. Returns reachability and the address observed through it.
    async fn test_identity(&self, resource: &ResourceIdentity) -> (bool, String);
}

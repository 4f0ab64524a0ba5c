//! # Turnwheel
//!
//! Resource rotation, credential lifecycle, and round-robin turn scheduling
//! for concurrent automation sessions.
//!
//! This library manages the contended resources behind fleets of parallel
//! automation sessions that drive a remote, rate-limited service. Sessions
//! borrow network identities from a shared pool, take strictly alternating
//! turns against the remote API, and recover from the failure modes such
//! services exhibit: identity blocks, expiring credentials, and pool
//! exhaustion.
//!
//! ## Core Problem Solved
//!
//! Automation against rate-limited services fails in ways ordinary job
//! queues don't account for:
//!
//! - **Identity Blocks**: The remote side blocks a network identity after
//!   too much traffic; that identity must be benched for a long time and
//!   the bench must survive process restarts
//! - **Bursty Submission**: Two sessions submitting at the same instant
//!   trip rate limits that the same load, interleaved, would not
//! - **Expiring Credentials**: Session tokens go stale mid-run and must be
//!   refreshed without failing the task that noticed
//! - **Pool Exhaustion**: When every identity is blocked, doing nothing is
//!   worse than proceeding carefully on a degraded identity
//!
//! ## Key Features
//!
//! - **Resource Pool**: Random assignment with sticky per-worker affinity,
//!   failure-count-driven rotation, and a persisted 48-hour block-list
//! - **Turn Scheduler**: Round-robin turn-taking across voices with one
//!   in-flight task per turn, skip without consuming the turn, and a
//!   bounded post-pass retry phase
//! - **Worker Coordinator**: Per-worker credential cache with TTL refresh,
//!   forced refresh on auth failure, and retry-once-then-reclassify
//! - **Voice Driver**: One dedicated OS thread per voice, each with its
//!   own single-threaded async runtime
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use turnwheel::builders::{build_coordinator, build_pool, build_scheduler};
//! use turnwheel::config::RotationConfig;
//! use turnwheel::core::scheduler::Task;
//! use turnwheel::runtime::VoiceDriver;
//!
//! let cfg = RotationConfig::from_json_str(&std::fs::read_to_string("turnwheel.json")?)?
//!     .with_env_overrides();
//!
//! let pool = Arc::new(build_pool(&cfg)?);
//! let scheduler = Arc::new(build_scheduler(&cfg)?);
//! let coordinator = Arc::new(build_coordinator(&cfg, Arc::clone(&pool), my_backend)?);
//!
//! let driver = VoiceDriver::new(scheduler, coordinator);
//! let summaries = driver.run(vec![(0, voice_zero_tasks), (1, voice_one_tasks)])?;
//! for s in summaries {
//!     println!("voice {}: {} ok, {} failed", s.voice_id, s.success, s.failed);
//! }
//! ```
//!
//! For complete examples, see:
//! - `tests/rotation_flow_test.rs` - Full integration tests
//! - `README.md` - Comprehensive documentation

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core pool, scheduler, worker, and retry machinery.
pub mod core;
/// Configuration models for the pool, scheduler, and workers.
pub mod config;
/// Builders to construct the rotation stack from configuration.
pub mod builders;
/// Infrastructure adapters for persisted block-list and credential state.
pub mod infra;
/// Runtime drivers that run scheduled voices on dedicated OS threads.
pub mod runtime;
/// Shared utilities.
pub mod util;

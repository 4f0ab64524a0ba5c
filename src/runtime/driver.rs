//! Thread-per-voice driver.
//!
//! Spawns one dedicated OS thread per voice, each with its own
//! single-threaded tokio runtime so blocking on backend calls never stalls
//! another voice. Parallelism comes entirely from the N voice threads; the
//! turn scheduler paces them against the remote API.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info, warn};

use crate::core::backend::{JobPayload, SessionBackend};
use crate::core::error::PoolError;
use crate::core::scheduler::{Task, TurnScheduler, VoiceSummary};
use crate::core::worker::WorkerCoordinator;

/// Predicate deciding whether a task's output already exists and the task
/// can be skipped without consuming the turn.
pub type SkipCheck = Arc<dyn Fn(&JobPayload) -> bool + Send + Sync>;

/// Drives registered voices to completion over a coordinator.
pub struct VoiceDriver<B: SessionBackend> {
    scheduler: Arc<TurnScheduler>,
    coordinator: Arc<WorkerCoordinator<B>>,
    skip_check: Option<SkipCheck>,
}

impl<B: SessionBackend> VoiceDriver<B> {
    /// Create a driver over a scheduler and coordinator.
    #[must_use]
    pub const fn new(scheduler: Arc<TurnScheduler>, coordinator: Arc<WorkerCoordinator<B>>) -> Self {
        Self {
            scheduler,
            coordinator,
            skip_check: None,
        }
    }

    /// Install a skip predicate for already-satisfied tasks.
    #[must_use]
    pub fn with_skip_check(mut self, check: SkipCheck) -> Self {
        self.skip_check = Some(check);
        self
    }

    /// Request a graceful stop: in-flight waits return early and every
    /// voice thread exits after its current task.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Register the given voices, run them all to completion (main pass
    /// plus retry phase), and return per-voice summaries ordered by voice
    /// id.
    ///
    /// Each voice occupies the worker slot with the same id, so a voice id
    /// must stay below the coordinator's worker count.
    pub fn run(&self, voices: Vec<(usize, Vec<Task>)>) -> Result<Vec<VoiceSummary>, PoolError> {
        let worker_count = self.coordinator.worker_count();
        for (voice_id, _) in &voices {
            if *voice_id >= worker_count {
                return Err(PoolError::VoiceLimit(*voice_id, worker_count));
            }
        }
        for (voice_id, tasks) in &voices {
            self.scheduler.add_voice(*voice_id, tasks.clone())?;
        }

        let voice_count = voices.len();
        let (tx, rx) = bounded::<VoiceSummary>(voice_count);
        let mut handles = Vec::with_capacity(voice_count);
        for (voice_id, _) in voices {
            handles.push(self.spawn_voice(voice_id, tx.clone())?);
        }
        drop(tx);

        let mut summaries: Vec<VoiceSummary> = rx.iter().take(voice_count).collect();
        join_all(handles);
        summaries.sort_by_key(|s| s.voice_id);
        info!(voices = voice_count, "all voices drained");
        Ok(summaries)
    }

    fn spawn_voice(
        &self,
        voice_id: usize,
        tx: Sender<VoiceSummary>,
    ) -> Result<JoinHandle<()>, PoolError> {
        let scheduler = Arc::clone(&self.scheduler);
        let coordinator = Arc::clone(&self.coordinator);
        let skip_check = self.skip_check.clone();

        thread::Builder::new()
            .name(format!("voice-{voice_id}"))
            .spawn(move || {
                debug!(voice_id, "voice thread started");
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(voice_id, error = %e, "failed to create voice runtime");
                        let _ = tx.send(VoiceSummary {
                            voice_id,
                            last_error: Some(e.to_string()),
                            ..VoiceSummary::default()
                        });
                        return;
                    }
                };

                // Main pass, paced by the turn scheduler.
                while let Some(task) = scheduler.next_task(voice_id) {
                    if let Some(check) = &skip_check {
                        if check(&task.payload) {
                            debug!(voice_id, job = task.payload.label(), "output exists, skipping");
                            scheduler.skip(voice_id);
                            continue;
                        }
                    }
                    match rt.block_on(coordinator.run_job(voice_id, &task.payload)) {
                        Ok(result) => {
                            debug!(voice_id, output = result.output, "task completed");
                            scheduler.complete_task(voice_id, true, false, None);
                        }
                        Err(err) => {
                            let transient = err.is_transient_block();
                            warn!(voice_id, error = %err, transient, "task failed");
                            scheduler.complete_task(voice_id, false, transient, Some(&err.reason()));
                        }
                    }
                }

                // Retry phase: this voice drains its own side-list,
                // independent of the turn rotation.
                scheduler.drain_failed(voice_id, |task| {
                    rt.block_on(coordinator.run_job(voice_id, &task.payload))
                        .map(|_| ())
                });

                coordinator.release_worker(voice_id, false);
                let summary = scheduler.summary(voice_id).unwrap_or(VoiceSummary {
                    voice_id,
                    ..VoiceSummary::default()
                });
                debug!(voice_id, success = summary.success, failed = summary.failed, "voice thread exiting");
                let _ = tx.send(summary);
            })
            .map_err(|e| PoolError::Backend(format!("failed to spawn voice thread: {e}")))
    }
}

/// Join voice threads, detaching any that fail to exit promptly.
fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().unwrap_or("voice").to_string();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let joiner = thread::spawn(move || {
            let ok = handle.join().is_ok();
            let _ = done_tx.send(ok);
        });
        match done_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(true) => {
                debug!(thread = name, "voice thread joined");
                let _ = joiner.join();
            }
            Ok(false) => {
                warn!(thread = name, "voice thread panicked");
                let _ = joiner.join();
            }
            // Leave the joiner thread behind; the stuck voice thread keeps
            // it alive and both end with the process.
            Err(_) => warn!(thread = name, "voice thread did not exit in time, detaching"),
        }
    }
}

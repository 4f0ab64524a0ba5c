//! Round-robin turn scheduler for concurrent voices.
//!
//! The scheduler exists to space calls to a rate-limited remote API across
//! N concurrently-running voices without fixed artificial delays: exactly
//! one task is in flight per wall-clock turn, so the natural latency of one
//! task becomes the spacing for the other N-1 voices.
//!
//! Waiting for a turn is a cooperative poll with a short sleep rather than
//! a condition-variable wait because the "is it my turn" predicate depends
//! on a dynamically shrinking set of active voices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::backend::JobPayload;
use crate::core::error::PoolError;
use crate::core::retry::{wait_interruptible, RetryPolicy};

/// One schedulable unit of work inside a voice queue.
#[derive(Debug, Clone)]
pub struct Task {
    /// What the backend should do.
    pub payload: JobPayload,
    /// Transient-block retries consumed so far.
    pub retry_count: u32,
    /// Per-task retry budget.
    pub max_retries: u32,
}

impl Task {
    /// Build a task with the given retry budget.
    #[must_use]
    pub const fn new(payload: JobPayload, max_retries: u32) -> Self {
        Self {
            payload,
            retry_count: 0,
            max_retries,
        }
    }
}

/// Per-voice result counters surfaced to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceSummary {
    /// Voice identifier.
    pub voice_id: usize,
    /// Tasks that completed successfully.
    pub success: u32,
    /// Tasks that failed terminally.
    pub failed: u32,
    /// Tasks skipped because their output already existed.
    pub skipped: u32,
    /// Reason of the last terminal failure, if any.
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct VoiceQueue {
    voice_id: usize,
    tasks: Vec<Task>,
    current_index: usize,
    success: u32,
    failed: u32,
    skipped: u32,
    done: bool,
    failed_tasks: Vec<Task>,
    last_error: Option<String>,
}

impl VoiceQueue {
    fn summary(&self) -> VoiceSummary {
        VoiceSummary {
            voice_id: self.voice_id,
            success: self.success,
            failed: self.failed,
            skipped: self.skipped,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct TurnState {
    active_voices: Vec<usize>,
    turn_counter: u64,
}

impl TurnState {
    /// Voice currently holding the turn, if any voice is active.
    fn holder(&self) -> Option<usize> {
        if self.active_voices.is_empty() {
            return None;
        }
        let len = self.active_voices.len() as u64;
        let idx = usize::try_from(self.turn_counter % len).unwrap_or(0);
        Some(self.active_voices[idx])
    }

    fn remove(&mut self, voice_id: usize) {
        self.active_voices.retain(|&v| v != voice_id);
    }
}

struct SchedulerInner {
    voices: HashMap<usize, VoiceQueue>,
    turn: TurnState,
}

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct SchedulerLimits {
    /// Maximum concurrently registered voices.
    pub max_voices: usize,
    /// Sleep between turn-ownership polls; bounds scheduling latency.
    pub poll_interval: Duration,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_voices: 8,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Round-robin scheduler granting one in-flight task per turn.
pub struct TurnScheduler {
    inner: Mutex<SchedulerInner>,
    limits: SchedulerLimits,
    retry: RetryPolicy,
    stop: Arc<AtomicBool>,
}

impl TurnScheduler {
    /// Create a scheduler with the given limits and retry policy.
    #[must_use]
    pub fn new(limits: SchedulerLimits, retry: RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                voices: HashMap::new(),
                turn: TurnState::default(),
            }),
            limits,
            retry,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop flag; raising it makes every wait return early.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Raise the stop flag. Workers exit after their current task.
    pub fn stop(&self) {
        info!("stop requested; scheduler winding down");
        self.stop.store(true, Ordering::Release);
    }

    /// Register a voice with its ordered task list.
    ///
    /// # Errors
    ///
    /// [`PoolError::VoiceLimit`] when `voice_id` is outside the configured
    /// maximum.
    pub fn add_voice(&self, voice_id: usize, tasks: Vec<Task>) -> Result<(), PoolError> {
        if voice_id >= self.limits.max_voices {
            return Err(PoolError::VoiceLimit(voice_id, self.limits.max_voices));
        }
        let mut inner = self.inner.lock();
        debug!(voice_id, tasks = tasks.len(), "voice registered");
        inner.voices.insert(
            voice_id,
            VoiceQueue {
                voice_id,
                tasks,
                current_index: 0,
                success: 0,
                failed: 0,
                skipped: 0,
                done: false,
                failed_tasks: Vec::new(),
                last_error: None,
            },
        );
        inner.turn.remove(voice_id);
        inner.turn.active_voices.push(voice_id);
        Ok(())
    }

    /// Block (cooperative poll) until the turn pointer selects `voice_id`,
    /// then return the next unprocessed task. Returns `None` once the voice
    /// has no more main-pass tasks (the voice is marked done and leaves the
    /// rotation) or the stop flag is raised.
    #[must_use]
    pub fn next_task(&self, voice_id: usize) -> Option<Task> {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            {
                let mut inner = self.inner.lock();
                let Some(vq) = inner.voices.get(&voice_id) else {
                    return None;
                };
                if vq.done {
                    return None;
                }
                if inner.turn.holder() == Some(voice_id) {
                    let vq = inner
                        .voices
                        .get_mut(&voice_id)
                        .unwrap_or_else(|| unreachable!("voice checked above"));
                    if vq.current_index < vq.tasks.len() {
                        return Some(vq.tasks[vq.current_index].clone());
                    }
                    // Main pass exhausted: the voice leaves the rotation.
                    vq.done = true;
                    debug!(voice_id, "voice done with main pass");
                    inner.turn.remove(voice_id);
                    return None;
                }
            }
            std::thread::sleep(self.limits.poll_interval);
        }
    }

    /// Resolve the task at the voice's cursor and advance the turn.
    ///
    /// Success advances the cursor and counts a success. A failure with
    /// `transient_block` and budget left moves the task to the retry
    /// side-list instead of counting terminally. The turn advances in every
    /// case; a voice never holds the turn across two tasks.
    pub fn complete_task(
        &self,
        voice_id: usize,
        success: bool,
        transient_block: bool,
        error_reason: Option<&str>,
    ) {
        let mut inner = self.inner.lock();
        if let Some(vq) = inner.voices.get_mut(&voice_id) {
            if vq.current_index < vq.tasks.len() {
                let task = vq.tasks[vq.current_index].clone();
                if success {
                    vq.success += 1;
                } else if transient_block
                    && RetryPolicy::budget_left(task.retry_count, task.max_retries)
                {
                    let mut retry = task;
                    retry.retry_count += 1;
                    debug!(
                        voice_id,
                        retry_count = retry.retry_count,
                        "task deferred to retry side-list"
                    );
                    vq.failed_tasks.push(retry);
                } else {
                    vq.failed += 1;
                    vq.last_error = error_reason.map(ToString::to_string);
                }
                vq.current_index += 1;
                if vq.current_index == vq.tasks.len() {
                    vq.done = true;
                    inner.turn.remove(voice_id);
                }
            }
        }
        inner.turn.turn_counter += 1;
    }

    /// Advance past an already-satisfied task without consuming the turn.
    ///
    /// Lets a voice race through work whose output already exists without
    /// spending other voices' fairness budget.
    pub fn skip(&self, voice_id: usize) {
        let mut inner = self.inner.lock();
        if let Some(vq) = inner.voices.get_mut(&voice_id) {
            if vq.current_index < vq.tasks.len() {
                vq.skipped += 1;
                vq.current_index += 1;
                if vq.current_index == vq.tasks.len() {
                    vq.done = true;
                    inner.turn.remove(voice_id);
                }
            }
        }
    }

    /// Drain the voice's retry side-list in up to `retry_rounds` rounds,
    /// waiting `round * base` between rounds (linear backoff, interruptible
    /// by the stop flag). `run` executes one task; a transient-block error
    /// with budget left re-queues the task for the next round.
    ///
    /// Runs on the voice's own worker thread, independent of the turn
    /// rotation, once the main pass is over.
    pub fn drain_failed<F>(&self, voice_id: usize, mut run: F)
    where
        F: FnMut(&Task) -> Result<(), PoolError>,
    {
        for round in 1..=self.retry.retry_rounds {
            let batch = {
                let mut inner = self.inner.lock();
                match inner.voices.get_mut(&voice_id) {
                    Some(vq) if !vq.failed_tasks.is_empty() => std::mem::take(&mut vq.failed_tasks),
                    _ => return,
                }
            };

            info!(voice_id, round, tasks = batch.len(), "retry round starting");
            if !wait_interruptible(
                self.retry.round_delay(round),
                &self.stop,
                self.limits.poll_interval,
            ) {
                // Stop raised mid-wait; put the batch back and bail.
                let mut inner = self.inner.lock();
                if let Some(vq) = inner.voices.get_mut(&voice_id) {
                    vq.failed_tasks.extend(batch);
                }
                return;
            }

            for task in batch {
                match run(&task) {
                    Ok(()) => {
                        let mut inner = self.inner.lock();
                        if let Some(vq) = inner.voices.get_mut(&voice_id) {
                            vq.success += 1;
                        }
                    }
                    Err(err) => {
                        let transient = err.is_transient_block();
                        let mut inner = self.inner.lock();
                        if let Some(vq) = inner.voices.get_mut(&voice_id) {
                            if transient
                                && RetryPolicy::budget_left(task.retry_count, task.max_retries)
                            {
                                let mut retry = task.clone();
                                retry.retry_count += 1;
                                vq.failed_tasks.push(retry);
                            } else {
                                vq.failed += 1;
                                vq.last_error = Some(err.reason());
                            }
                        }
                    }
                }
            }
        }

        // Budget spent: anything still queued is a terminal failure.
        let mut inner = self.inner.lock();
        if let Some(vq) = inner.voices.get_mut(&voice_id) {
            let leftovers = std::mem::take(&mut vq.failed_tasks);
            if !leftovers.is_empty() {
                vq.failed += u32::try_from(leftovers.len()).unwrap_or(u32::MAX);
                if vq.last_error.is_none() {
                    vq.last_error = Some("retry rounds exhausted".to_string());
                }
            }
        }
    }

    /// Whether every registered voice has finished its main pass.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let inner = self.inner.lock();
        !inner.voices.is_empty() && inner.voices.values().all(|v| v.done)
    }

    /// Summary for one voice.
    #[must_use]
    pub fn summary(&self, voice_id: usize) -> Option<VoiceSummary> {
        let inner = self.inner.lock();
        inner.voices.get(&voice_id).map(VoiceQueue::summary)
    }

    /// Summaries for all voices, ordered by voice id.
    #[must_use]
    pub fn summaries(&self) -> Vec<VoiceSummary> {
        let inner = self.inner.lock();
        let mut out: Vec<VoiceSummary> = inner.voices.values().map(VoiceQueue::summary).collect();
        out.sort_by_key(|s| s.voice_id);
        out
    }

    /// Current turn counter (monotonically increasing).
    #[must_use]
    pub fn turn_counter(&self) -> u64 {
        self.inner.lock().turn.turn_counter
    }

    /// Voice currently holding the turn, if any.
    #[must_use]
    pub fn current_holder(&self) -> Option<usize> {
        self.inner.lock().turn.holder()
    }
}

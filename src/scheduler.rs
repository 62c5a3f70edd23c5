//! Delayed task scheduling
//!
//! Scheduled retries go through the `Scheduler` trait instead of calling
//! `tokio::time::sleep` directly. Production code uses `TokioScheduler`;
//! tests use `ManualScheduler`, which only runs tasks when its
//! `ManualClock` is advanced.
//!
//! Handles are cancellable but dropping one does not cancel the task.
//! Tasks are expected to re-check their preconditions when they fire.

use crate::clock::{Clock, ManualClock};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A unit of delayed work
pub type ScheduledTask = BoxFuture<'static, ()>;

/// Capability to run a task after a delay
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle;
}

/// Handle to a scheduled task
pub struct ScheduleHandle {
    id: String,
    cancel_fn: Box<dyn FnOnce() + Send>,
}

impl ScheduleHandle {
    /// Create a handle with a cancel callback
    pub fn new(id: impl Into<String>, cancel_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: id.into(),
            cancel_fn: Box::new(cancel_fn),
        }
    }

    /// Scheduler-assigned task id (task-<uuid>)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Prevent the task from running if it has not started yet
    pub fn cancel(self) {
        (self.cancel_fn)()
    }
}

impl std::fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleHandle").field("id", &self.id).finish()
    }
}

fn task_id() -> String {
    format!("task-{}", uuid::Uuid::new_v4())
}

/// Scheduler backed by the tokio runtime
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle {
        let id = task_id();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        tracing::trace!(task = %id, delay_ms = delay.as_millis() as u64, "Task scheduled");
        ScheduleHandle::new(id, move || join.abort())
    }
}

struct PendingTask {
    due: u64,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: ScheduledTask,
}

/// Virtual-time scheduler for tests
///
/// Tasks are queued with a due time on the shared `ManualClock` and run,
/// in due order, by [`ManualScheduler::advance`]. Clones share the queue.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    queue: Arc<Mutex<Vec<PendingTask>>>,
    seq: Arc<AtomicU64>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of queued, non-cancelled tasks
    pub fn pending(&self) -> usize {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Due times (Unix ms) of queued, non-cancelled tasks, earliest first
    pub fn due_times(&self) -> Vec<u64> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let mut due: Vec<u64> = queue
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .map(|t| t.due)
            .collect();
        due.sort_unstable();
        due
    }

    /// Advance the clock by `by`, running every task that falls due
    ///
    /// Tasks run one at a time in due order, with the clock set to each
    /// task's due time. Tasks scheduled while advancing run too if they fall
    /// due before the target. Returns the number of tasks run.
    pub async fn advance(&self, by: Duration) -> usize {
        let target = self.clock.now_millis().saturating_add(by.as_millis() as u64);
        let mut ran = 0;

        while let Some(next) = self.pop_due(target) {
            if next.due > self.clock.now_millis() {
                self.clock.set(next.due);
            }
            if !next.cancelled.load(Ordering::SeqCst) {
                next.task.await;
                ran += 1;
            }
        }

        if target > self.clock.now_millis() {
            self.clock.set(target);
        }
        ran
    }

    /// Run tasks already due without moving the clock
    pub async fn run_due(&self) -> usize {
        self.advance(Duration::ZERO).await
    }

    fn pop_due(&self, target: u64) -> Option<PendingTask> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        Some(queue.swap_remove(index))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let pending = PendingTask {
            due: self.clock.now_millis().saturating_add(delay.as_millis() as u64),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            cancelled: cancelled.clone(),
            task,
        };

        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pending);

        ScheduleHandle::new(task_id(), move || cancelled.store(true, Ordering::SeqCst))
    }
}

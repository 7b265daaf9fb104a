//! Recurring tasks for Courier connections.
//!
//! A [`RecurringTask`] is a unit of periodic work that runs against a
//! connection's execution context. The connection's execute worker polls
//! each live task with [`RecurringTask::should_execute`] once per
//! invocation, runs the ones that are due, and marks them
//! [`done`](RecurringTask::done).
//!
//! # State machine
//!
//! ```text
//!            pause()              cancel()
//!   Active ─────────→ Paused ─────────────→ Cancelled (terminal)
//!     ↑  ←─────────────  │
//!     │     resume()     │
//!     └──── cancel() ────┴──────────────────→ Cancelled
//! ```
//!
//! On top of the state, a one-shot *skip* bit suppresses exactly the next
//! `should_execute` check.
//!
//! Tasks are controlled through a cloneable [`TaskHandle`]; the task body
//! receives its own handle, so it can cancel itself.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Interval used when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest interval a task accepts; anything lower is clamped up.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle state of a recurring task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Active,
    Paused,
    /// Terminal. A cancelled task never runs again and is dropped from the
    /// connection the next time its tasks are listed.
    Cancelled,
}

#[derive(Debug)]
struct Schedule {
    state: TaskState,
    skip_pending: bool,
    interval: Duration,
    last_execution: Instant,
}

/// Shared control handle for one recurring task.
///
/// Clones refer to the same task.
#[derive(Clone)]
pub struct TaskHandle {
    schedule: Arc<Mutex<Schedule>>,
}

impl TaskHandle {
    fn new(interval: Duration) -> Self {
        let interval = if interval < MIN_INTERVAL {
            warn!(
                interval_us = interval.as_micros() as u64,
                min_us = MIN_INTERVAL.as_micros() as u64,
                "recurring task interval below minimum, clamping"
            );
            MIN_INTERVAL
        } else {
            interval
        };
        Self {
            schedule: Arc::new(Mutex::new(Schedule {
                state: TaskState::Active,
                skip_pending: false,
                interval,
                // Creation counts as the first execution.
                last_execution: Instant::now(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops the task from running until [`resume`](Self::resume).
    /// No effect on a cancelled task.
    pub fn pause(&self) {
        let mut s = self.lock();
        if s.state == TaskState::Active {
            s.state = TaskState::Paused;
            debug!("recurring task paused");
        }
    }

    /// Returns a paused task to active. No effect on a cancelled task.
    pub fn resume(&self) {
        let mut s = self.lock();
        if s.state == TaskState::Paused {
            s.state = TaskState::Active;
            debug!("recurring task resumed");
        }
    }

    /// Suppresses exactly the next `should_execute` check.
    pub fn skip(&self) {
        self.lock().skip_pending = true;
    }

    /// Permanently stops the task.
    pub fn cancel(&self) {
        let mut s = self.lock();
        if s.state != TaskState::Cancelled {
            s.state = TaskState::Cancelled;
            debug!("recurring task cancelled");
        }
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.state() == TaskState::Paused
    }

    pub fn interval(&self) -> Duration {
        self.lock().interval
    }

    /// Instant of the last run (or creation, if it has never run).
    pub fn last_execution(&self) -> Instant {
        self.lock().last_execution
    }

    /// Whether the task is due at `now`.
    ///
    /// A pending skip is consumed by this call whatever the outcome.
    pub fn should_execute(&self, now: Instant) -> bool {
        let mut s = self.lock();
        let skipped = std::mem::take(&mut s.skip_pending);
        match s.state {
            TaskState::Cancelled | TaskState::Paused => false,
            TaskState::Active if skipped => false,
            TaskState::Active => now.saturating_duration_since(s.last_execution) >= s.interval,
        }
    }

    /// Records a run at `now`.
    pub fn done(&self, now: Instant) {
        self.lock().last_execution = now;
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.lock();
        f.debug_struct("TaskHandle")
            .field("state", &s.state)
            .field("skip_pending", &s.skip_pending)
            .field("interval", &s.interval)
            .finish()
    }
}

type TaskBody<C> = Box<dyn FnMut(&mut C, &TaskHandle) + Send>;

/// A periodic unit of work run against a context of type `C`.
pub struct RecurringTask<C> {
    handle: TaskHandle,
    body: TaskBody<C>,
}

impl<C> RecurringTask<C> {
    /// Creates an active task that first becomes due `interval` after now.
    ///
    /// Intervals below [`MIN_INTERVAL`] are clamped.
    pub fn new<F>(interval: Duration, body: F) -> Self
    where
        F: FnMut(&mut C, &TaskHandle) + Send + 'static,
    {
        Self {
            handle: TaskHandle::new(interval),
            body: Box::new(body),
        }
    }

    /// Creates a task with [`DEFAULT_INTERVAL`].
    pub fn with_default_interval<F>(body: F) -> Self
    where
        F: FnMut(&mut C, &TaskHandle) + Send + 'static,
    {
        Self::new(DEFAULT_INTERVAL, body)
    }

    /// A control handle sharing this task's state.
    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    pub fn should_execute(&self, now: Instant) -> bool {
        self.handle.should_execute(now)
    }

    /// Runs the body once against `context`.
    pub fn run(&mut self, context: &mut C) {
        (self.body)(context, &self.handle);
    }

    pub fn done(&self, now: Instant) {
        self.handle.done(now);
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl<C> fmt::Debug for RecurringTask<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurringTask")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Produces a fresh task for every connection built from one builder.
pub type RecurringTaskFactory<C> = Arc<dyn Fn() -> RecurringTask<C> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_clamped_to_minimum() {
        let task = RecurringTask::<()>::new(Duration::ZERO, |_, _| {});
        assert_eq!(task.handle().interval(), MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_interval_is_one_second() {
        let task = RecurringTask::<()>::with_default_interval(|_, _| {});
        assert_eq!(task.handle().interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_does_not_revive_cancelled_task() {
        let task = RecurringTask::<()>::new(Duration::from_millis(5), |_, _| {});
        let handle = task.handle();
        handle.cancel();
        handle.resume();
        assert_eq!(handle.state(), TaskState::Cancelled);
        handle.pause();
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_receives_its_own_handle() {
        let mut task = RecurringTask::new(Duration::from_millis(5), |runs: &mut u32, h| {
            *runs += 1;
            if *runs == 2 {
                h.cancel();
            }
        });
        let mut runs = 0;
        task.run(&mut runs);
        assert!(!task.is_cancelled());
        task.run(&mut runs);
        assert!(task.is_cancelled());
    }
}

//! Timer tasks and their scheduling state.
//!
//! A [`ScheduledTask`] packs the task state and a schedule generation into
//! one atomic word. Every transition is a compare-and-swap on that word, so a
//! run and a concurrent cancel can't both win, and a stale queue entry left
//! behind by an earlier schedule can't fire the task again.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::error;

use crate::timer::TimerError;

/// Work run by a [`SipTimer`](crate::timer::SipTimer).
pub trait TimerTask: Send + Sync + 'static {
    fn run_task(&self);

    /// Called once when the task is cancelled while scheduled or running.
    fn clean_up_before_cancel(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Scheduled,
    Running,
    Cancelled,
    Completed,
}

impl TaskState {
    fn from_bits(bits: u64) -> Self {
        match bits & STATE_MASK {
            SCHEDULED => TaskState::Scheduled,
            RUNNING => TaskState::Running,
            CANCELLED => TaskState::Cancelled,
            COMPLETED => TaskState::Completed,
            _ => TaskState::Idle,
        }
    }
}

const STATE_MASK: u64 = 0xff;
const IDLE: u64 = 0;
const SCHEDULED: u64 = 1;
const RUNNING: u64 = 2;
const CANCELLED: u64 = 3;
const COMPLETED: u64 = 4;

fn word(generation: u64, state: u64) -> u64 {
    (generation << 8) | state
}

/// The backend primitive a scheduled task is bound to.
#[derive(Debug)]
pub(crate) enum TimerHandle {
    /// Sitting in a backend owned queue, removed lazily
    Queued,
    /// Driven by its own runtime task
    Spawned(AbortHandle),
}

struct Inner {
    task: Box<dyn TimerTask>,
    state: AtomicU64,
    handle: Mutex<Option<TimerHandle>>,
}

/// A [`TimerTask`] as seen by the timers, cheap to clone.
#[derive(Clone)]
pub struct ScheduledTask {
    inner: Arc<Inner>,
}

impl ScheduledTask {
    pub fn new<T: TimerTask>(task: T) -> Self {
        Self { inner: Arc::new(Inner { task: Box::new(task), state: AtomicU64::new(IDLE), handle: Mutex::new(None) }) }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_bits(self.inner.state.load(Ordering::Acquire))
    }

    /// Scheduled or running.
    pub fn is_pending(&self) -> bool {
        matches!(self.state(), TaskState::Scheduled | TaskState::Running)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    pub(crate) fn ptr_eq(&self, other: &ScheduledTask) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Moves the task to `Scheduled` under a fresh generation.
    pub(crate) fn begin_schedule(&self) -> Result<u64, TimerError> {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if matches!(current & STATE_MASK, SCHEDULED | RUNNING) {
                return Err(TimerError::AlreadyScheduled);
            }
            let generation = (current >> 8).wrapping_add(1);
            match self.inner.state.compare_exchange(current, word(generation, SCHEDULED), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(generation),
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn set_handle(&self, handle: TimerHandle) {
        *self.inner.handle.lock() = Some(handle);
    }

    /// `Scheduled -> Running` for `generation`, fails once cancelled or
    /// rescheduled.
    pub(crate) fn try_begin_run(&self, generation: u64) -> bool {
        self.inner
            .state
            .compare_exchange(word(generation, SCHEDULED), word(generation, RUNNING), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ends a run. Returns `true` when a periodic task should be queued
    /// again, which is never the case after a cancel.
    pub(crate) fn finish_run(&self, generation: u64, periodic: bool) -> bool {
        let next = if periodic { SCHEDULED } else { COMPLETED };
        let finished = self
            .inner
            .state
            .compare_exchange(word(generation, RUNNING), word(generation, next), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if finished && !periodic {
            self.inner.handle.lock().take();
        }
        finished && periodic
    }

    /// Runs the task, a panic is logged and swallowed.
    pub(crate) fn run_guarded(&self) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.inner.task.run_task())) {
            let cause = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error!(cause, "sip timer task panicked");
        }
    }

    /// Cancels a scheduled or running task.
    ///
    /// Only the caller that moves the task to `Cancelled` runs the cleanup
    /// hook and releases the backend handle, everybody else gets `false`.
    /// A run already in progress is not interrupted.
    pub(crate) fn cancel(&self) -> bool {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if !matches!(current & STATE_MASK, SCHEDULED | RUNNING) {
                return false;
            }
            let cancelled = word(current >> 8, CANCELLED);
            match self.inner.state.compare_exchange(current, cancelled, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.inner.task.clean_up_before_cancel();
        if let Some(TimerHandle::Spawned(abort)) = self.inner.handle.lock().take() {
            abort.abort();
        }
        true
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask").field("state", &self.state()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
        cleanups: AtomicUsize,
    }

    impl TimerTask for Arc<Counting> {
        fn run_task(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }

        fn clean_up_before_cancel(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn one_shot_lifecycle() {
        let counting = Arc::new(Counting::default());
        let task = ScheduledTask::new(Arc::clone(&counting));
        assert_eq!(task.state(), TaskState::Idle);
        assert!(!task.cancel());

        let generation = task.begin_schedule().unwrap();
        assert!(matches!(task.begin_schedule(), Err(TimerError::AlreadyScheduled)));
        assert!(task.try_begin_run(generation));
        task.run_guarded();
        assert!(!task.finish_run(generation, false));

        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(counting.runs.load(Ordering::SeqCst), 1);
        assert!(!task.cancel());
        assert_eq!(counting.cleanups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_wins_over_stale_entries() {
        let counting = Arc::new(Counting::default());
        let task = ScheduledTask::new(Arc::clone(&counting));

        let first = task.begin_schedule().unwrap();
        assert!(task.cancel());
        assert!(!task.cancel());
        assert_eq!(counting.cleanups.load(Ordering::SeqCst), 1);

        let second = task.begin_schedule().unwrap();
        assert!(!task.try_begin_run(first));
        assert!(task.try_begin_run(second));
    }

    #[test]
    fn cancel_during_run_stops_periodic() {
        let task = ScheduledTask::new(Arc::new(Counting::default()));
        let generation = task.begin_schedule().unwrap();

        assert!(task.try_begin_run(generation));
        assert!(task.cancel());
        assert!(!task.finish_run(generation, true));
        assert!(task.is_cancelled());
    }

    #[test]
    fn panics_are_contained() {
        struct Boom;
        impl TimerTask for Boom {
            fn run_task(&self) {
                panic!("boom");
            }
        }

        ScheduledTask::new(Boom).run_guarded();
    }
}

//! Retransmission timers.
//!
//! [`SipTimer`] schedules one-shot and fixed-delay [`TimerTask`]s on threads
//! owned by the timer. Three backends implement it:
//!
//! - [`DefaultTimer`]: one thread waiting on a deadline heap
//! - [`HashWheelTimer`]: one thread advancing a hashed wheel in coarse ticks,
//!   periodic tasks are re-queued after each run
//! - [`ExecutorTimer`]: a tokio multi-thread runtime with one sleeping task per
//!   scheduled timer
//!
//! All of them contain panics escaping [`TimerTask::run_task`], so a failing
//! task never takes the scheduling thread down.

mod default_timer;
mod executor_timer;
mod hash_wheel_timer;
mod task;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;

pub use default_timer::DefaultTimer;
pub use executor_timer::ExecutorTimer;
pub use hash_wheel_timer::HashWheelTimer;
pub use task::{ScheduledTask, TaskState, TimerTask};

pub(crate) use task::TimerHandle;

pub trait SipTimer: Send + Sync + fmt::Debug {
    /// Spawns the backend threads. Starting twice is a no-op.
    fn start(&self, config: &TimerConfig) -> Result<(), TimerError>;

    /// Cancels every outstanding task and rejects later scheduling.
    fn stop(&self);

    fn schedule(&self, task: &ScheduledTask, delay: Duration) -> Result<(), TimerError>;

    /// Runs `task` after `delay`, then again `period` after each run ends.
    fn schedule_with_fixed_delay(&self, task: &ScheduledTask, delay: Duration, period: Duration) -> Result<(), TimerError>;

    /// Cancels `task`, returning `false` when it wasn't scheduled or running.
    ///
    /// The cleanup hook runs exactly once however many callers race here. No
    /// run starts after this returns, a run already in progress finishes.
    fn cancel(&self, task: &ScheduledTask) -> bool {
        task.cancel()
    }

    fn is_started(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer is not started")]
    NotStarted,

    #[error("timer is stopped")]
    Stopped,

    #[error("task is already scheduled")]
    AlreadyScheduled,

    #[error("period must not be zero")]
    ZeroPeriod,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TimerError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    #[default]
    Default,
    HashWheel,
    Executor,
}

impl std::str::FromStr for TimerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(TimerKind::Default),
            "hash_wheel" | "hashwheel" | "hash-wheel" => Ok(TimerKind::HashWheel),
            "executor" => Ok(TimerKind::Executor),
            other => Err(format!("unknown timer kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub kind: TimerKind,
    /// Worker threads of the executor backend
    pub threads: usize,
    /// Tick length of the hash wheel backend
    pub tick_ms: u64,
    /// Bucket count of the hash wheel backend
    pub ticks_per_wheel: usize,
}

impl TimerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { kind: TimerKind::Default, threads: 1, tick_ms: 50, ticks_per_wheel: 1280 }
    }
}

/// Builds an unstarted timer of the given kind.
pub fn new_timer(kind: TimerKind) -> Box<dyn SipTimer> {
    match kind {
        TimerKind::Default => Box::new(DefaultTimer::new()),
        TimerKind::HashWheel => Box::new(HashWheelTimer::new()),
        TimerKind::Executor => Box::new(ExecutorTimer::new()),
    }
}

/// About thirty years, the cap for delays that would overflow [`Instant`]
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, clamped instead of overflowing.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).or_else(|| now.checked_add(FAR_FUTURE)).unwrap_or(now)
}

const NEW: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// `new -> started -> stopped`, shared by the backends.
#[derive(Debug, Default)]
struct Lifecycle(AtomicU8);

impl Lifecycle {
    /// Returns `true` for the caller that actually started.
    fn start(&self) -> Result<bool, TimerError> {
        match self.0.compare_exchange(NEW, STARTED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(true),
            Err(STARTED) => Ok(false),
            Err(_) => Err(TimerError::Stopped),
        }
    }

    /// Returns `true` when the timer was running.
    fn stop(&self) -> bool {
        self.0.swap(STOPPED, Ordering::AcqRel) == STARTED
    }

    fn check(&self) -> Result<(), TimerError> {
        match self.0.load(Ordering::Acquire) {
            STARTED => Ok(()),
            NEW => Err(TimerError::NotStarted),
            _ => Err(TimerError::Stopped),
        }
    }

    fn is_started(&self) -> bool {
        self.0.load(Ordering::Acquire) == STARTED
    }

    fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire) == STOPPED
    }
}

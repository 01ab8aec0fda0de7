use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::ensure;
use crate::timer::{Lifecycle, ScheduledTask, SipTimer, TimerConfig, TimerError, TimerHandle};

/// Timers on a dedicated tokio runtime.
///
/// Every scheduled task gets its own runtime task sleeping out the delay, so
/// fixed-delay recurrence is a plain loop. Cancel aborts that runtime task.
#[derive(Debug, Default)]
pub struct ExecutorTimer {
    lifecycle: Lifecycle,
    runtime: Mutex<Option<Runtime>>,
    /// Tasks handed out so far, pruned on schedule, cancelled on stop
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl ExecutorTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(&self, task: &ScheduledTask, delay: Duration, period: Option<Duration>) -> Result<(), TimerError> {
        let runtime = self.runtime.lock();
        self.lifecycle.check()?;
        let handle: Handle = runtime.as_ref().map(|runtime| runtime.handle().clone()).ok_or(TimerError::NotStarted)?;
        let generation = task.begin_schedule()?;

        {
            let mut tasks = self.tasks.lock();
            tasks.retain(ScheduledTask::is_pending);
            if !tasks.iter().any(|known| known.ptr_eq(task)) {
                tasks.push(task.clone());
            }
        }

        let scheduled = task.clone();
        let join = handle.spawn(async move {
            let mut wait = delay;
            loop {
                tokio::time::sleep(wait).await;
                if !scheduled.try_begin_run(generation) {
                    return;
                }
                scheduled.run_guarded();
                if !scheduled.finish_run(generation, period.is_some()) {
                    return;
                }
                // finish_run only asks for another round when periodic
                wait = period.unwrap_or_default();
            }
        });
        task.set_handle(TimerHandle::Spawned(join.abort_handle()));
        Ok(())
    }
}

impl Drop for ExecutorTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SipTimer for ExecutorTimer {
    fn start(&self, config: &TimerConfig) -> Result<(), TimerError> {
        let mut runtime = self.runtime.lock();
        if !self.lifecycle.start()? {
            return Ok(());
        }

        let built = Builder::new_multi_thread().worker_threads(config.threads.max(1)).thread_name("sip-executor-timer").enable_time().build();
        match built {
            Ok(built) => {
                *runtime = Some(built);
                debug!(threads = config.threads, "executor sip timer started");
                Ok(())
            }
            Err(e) => {
                self.lifecycle.stop();
                Err(TimerError::io(e))
            }
        }
    }

    fn stop(&self) {
        let runtime = {
            let mut runtime = self.runtime.lock();
            if !self.lifecycle.stop() {
                return;
            }
            runtime.take()
        };

        for task in std::mem::take(&mut *self.tasks.lock()) {
            task.cancel();
        }
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        debug!("executor sip timer stopped");
    }

    fn schedule(&self, task: &ScheduledTask, delay: Duration) -> Result<(), TimerError> {
        self.spawn(task, delay, None)
    }

    fn schedule_with_fixed_delay(&self, task: &ScheduledTask, delay: Duration, period: Duration) -> Result<(), TimerError> {
        ensure!(!period.is_zero(), TimerError::ZeroPeriod);
        self.spawn(task, delay, Some(period))
    }

    fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }
}

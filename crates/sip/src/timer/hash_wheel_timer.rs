use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::ensure;
use crate::timer::{Lifecycle, ScheduledTask, SipTimer, TimerConfig, TimerError, TimerHandle, deadline_after};

/// A hashed timing wheel driven by one thread.
///
/// Time advances in ticks of [`TimerConfig::tick_ms`]. A timeout lands in
/// bucket `tick % ticks_per_wheel` with the number of full wheel rounds still
/// to wait, so scheduling is O(1) and firing precision is one tick. New
/// timeouts are handed over through a pending list and moved into the wheel
/// at the next tick. Periodic tasks are put back into the pending list after
/// each run, unless they were cancelled meanwhile.
#[derive(Debug, Default)]
pub struct HashWheelTimer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct Shared {
    lifecycle: Lifecycle,
    pending: Mutex<Vec<Timeout>>,
    wakeup: Condvar,
}

#[derive(Debug)]
struct Timeout {
    task: ScheduledTask,
    generation: u64,
    deadline: Instant,
    period: Option<Duration>,
}

#[derive(Debug)]
struct Slot {
    timeout: Timeout,
    rounds: u64,
}

impl HashWheelTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, task: &ScheduledTask, delay: Duration, period: Option<Duration>) -> Result<(), TimerError> {
        let deadline = deadline_after(delay);
        let mut pending = self.shared.pending.lock();
        self.shared.lifecycle.check()?;
        let generation = task.begin_schedule()?;
        task.set_handle(TimerHandle::Queued);

        pending.push(Timeout { task: task.clone(), generation, deadline, period });
        Ok(())
    }
}

impl Drop for HashWheelTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SipTimer for HashWheelTimer {
    fn start(&self, config: &TimerConfig) -> Result<(), TimerError> {
        if !self.shared.lifecycle.start()? {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let wheel = Wheel::new(config.tick(), config.ticks_per_wheel.max(1));
        let worker =
            thread::Builder::new().name("sip-hash-wheel-timer".into()).spawn(move || wheel.run(&shared)).map_err(TimerError::io)?;
        *self.worker.lock() = Some(worker);
        debug!(tick_ms = config.tick_ms, ticks_per_wheel = config.ticks_per_wheel, "hash wheel sip timer started");
        Ok(())
    }

    fn stop(&self) {
        {
            let _pending = self.shared.pending.lock();
            if !self.shared.lifecycle.stop() {
                return;
            }
            self.shared.wakeup.notify_all();
        }

        if let Some(worker) = self.worker.lock().take()
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
        debug!("hash wheel sip timer stopped");
    }

    fn schedule(&self, task: &ScheduledTask, delay: Duration) -> Result<(), TimerError> {
        self.enqueue(task, delay, None)
    }

    fn schedule_with_fixed_delay(&self, task: &ScheduledTask, delay: Duration, period: Duration) -> Result<(), TimerError> {
        ensure!(!period.is_zero(), TimerError::ZeroPeriod);
        self.enqueue(task, delay, Some(period))
    }

    fn is_started(&self) -> bool {
        self.shared.lifecycle.is_started()
    }
}

struct Wheel {
    tick: Duration,
    buckets: Vec<Vec<Slot>>,
    start: Instant,
    current: u64,
}

impl Wheel {
    fn new(tick: Duration, ticks_per_wheel: usize) -> Self {
        Self { tick, buckets: (0..ticks_per_wheel).map(|_| Vec::new()).collect(), start: Instant::now(), current: 0 }
    }

    fn run(mut self, shared: &Shared) {
        loop {
            let tick_end = self.start + self.tick * u32::try_from(self.current + 1).unwrap_or(u32::MAX);

            let mut pending = shared.pending.lock();
            while !shared.lifecycle.is_stopped() && Instant::now() < tick_end {
                shared.wakeup.wait_until(&mut pending, tick_end);
            }
            if shared.lifecycle.is_stopped() {
                let leftovers = std::mem::take(&mut *pending);
                drop(pending);
                self.cancel_all(leftovers);
                return;
            }
            let arrived = std::mem::take(&mut *pending);
            drop(pending);

            for timeout in arrived {
                self.insert(timeout);
            }
            let resubmit = self.expire();
            if !resubmit.is_empty() {
                shared.pending.lock().extend(resubmit);
            }
            self.current += 1;
        }
    }

    /// Places `timeout` in the bucket of the first tick ending at or after
    /// its deadline, never before the current tick.
    fn insert(&mut self, timeout: Timeout) {
        let elapsed = timeout.deadline.saturating_duration_since(self.start);
        let ticks = u64::try_from(elapsed.as_nanos().div_ceil(self.tick.as_nanos().max(1))).unwrap_or(u64::MAX);
        let target = ticks.saturating_sub(1).max(self.current);

        let len = self.buckets.len() as u64;
        let rounds = (target - self.current) / len;
        let index = usize::try_from(target % len).unwrap_or_default();
        self.buckets[index].push(Slot { timeout, rounds });
    }

    /// Fires the due timeouts of the current bucket, returns periodic ones to
    /// queue again.
    fn expire(&mut self) -> Vec<Timeout> {
        let len = self.buckets.len() as u64;
        let index = usize::try_from(self.current % len).unwrap_or_default();
        let slots = std::mem::take(&mut self.buckets[index]);

        let mut resubmit = Vec::new();
        for mut slot in slots {
            if slot.rounds > 0 {
                slot.rounds -= 1;
                self.buckets[index].push(slot);
                continue;
            }

            let Timeout { task, generation, period, .. } = slot.timeout;
            if !task.try_begin_run(generation) {
                trace!("skip cancelled wheel timeout");
                continue;
            }
            task.run_guarded();

            if task.finish_run(generation, period.is_some())
                && let Some(period) = period
            {
                resubmit.push(Timeout { task, generation, deadline: deadline_after(period), period: Some(period) });
            }
        }
        resubmit
    }

    fn cancel_all(&mut self, pending: Vec<Timeout>) {
        let wheel = self.buckets.iter_mut().flat_map(std::mem::take).map(|slot| slot.timeout);
        for timeout in wheel.chain(pending) {
            timeout.task.cancel();
        }
    }
}

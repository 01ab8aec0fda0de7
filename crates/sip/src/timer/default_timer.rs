use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::ensure;
use crate::timer::{Lifecycle, ScheduledTask, SipTimer, TimerConfig, TimerError, TimerHandle, deadline_after};

/// A single timer thread sleeping until the earliest deadline.
///
/// Cancelled tasks stay in the heap and are skipped when they surface, the
/// schedule generation of each entry tells stale entries apart.
#[derive(Debug, Default)]
pub struct DefaultTimer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct Shared {
    lifecycle: Lifecycle,
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

#[derive(Debug, Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Queue {
    fn push(&mut self, task: ScheduledTask, generation: u64, deadline: Instant, period: Option<Duration>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { deadline, seq, generation, period, task });
    }
}

#[derive(Debug)]
struct Entry {
    deadline: Instant,
    seq: u64,
    generation: u64,
    period: Option<Duration>,
    task: ScheduledTask,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed, earliest deadline on top
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl DefaultTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, task: &ScheduledTask, delay: Duration, period: Option<Duration>) -> Result<(), TimerError> {
        // stop flips the lifecycle under this lock, nothing is queued after the final drain
        let deadline = deadline_after(delay);
        let mut queue = self.shared.queue.lock();
        self.shared.lifecycle.check()?;
        let generation = task.begin_schedule()?;
        task.set_handle(TimerHandle::Queued);

        queue.push(task.clone(), generation, deadline, period);
        self.shared.wakeup.notify_one();
        Ok(())
    }
}

impl Drop for DefaultTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SipTimer for DefaultTimer {
    fn start(&self, _config: &TimerConfig) -> Result<(), TimerError> {
        if !self.shared.lifecycle.start()? {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new().name("sip-timer".into()).spawn(move || run(&shared)).map_err(TimerError::io)?;
        *self.worker.lock() = Some(worker);
        debug!("default sip timer started");
        Ok(())
    }

    fn stop(&self) {
        {
            let _queue = self.shared.queue.lock();
            if !self.shared.lifecycle.stop() {
                return;
            }
            self.shared.wakeup.notify_all();
        }

        // a task stopping its own timer can't wait for itself
        if let Some(worker) = self.worker.lock().take()
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
        debug!("default sip timer stopped");
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

fn run(shared: &Shared) {
    let mut queue = shared.queue.lock();
    while !shared.lifecycle.is_stopped() {
        let Some(deadline) = queue.heap.peek().map(|entry| entry.deadline) else {
            shared.wakeup.wait(&mut queue);
            continue;
        };

        if deadline > Instant::now() {
            shared.wakeup.wait_until(&mut queue, deadline);
            continue;
        }

        let Some(entry) = queue.heap.pop() else {
            continue;
        };
        if !entry.task.try_begin_run(entry.generation) {
            trace!("skip cancelled timer entry");
            continue;
        }

        MutexGuard::unlocked(&mut queue, || entry.task.run_guarded());

        if entry.task.finish_run(entry.generation, entry.period.is_some())
            && let Some(period) = entry.period
        {
            queue.push(entry.task, entry.generation, deadline_after(period), Some(period));
        }
    }

    let leftovers: Vec<Entry> = queue.heap.drain().collect();
    drop(queue);
    for entry in leftovers {
        entry.task.cancel();
    }
}

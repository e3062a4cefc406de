//! Deterministic time: a manual clock and a scheduler driven by it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mirrorline_channel::{CancelToken, Clock, ScheduledTask, Scheduler, Task};
use parking_lot::Mutex;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    fn set_elapsed(&self, at: Duration) {
        let mut offset = self.offset.lock();
        if at > *offset {
            *offset = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

struct Pending {
    seq: u64,
    due: Duration,
    delay: Duration,
    token: CancelToken,
    task: Task,
}

#[derive(Default)]
struct Queue {
    next_seq: u64,
    pending: Vec<Pending>,
}

/// A [`Scheduler`] whose tasks run only inside [`advance`](Self::advance)
/// or [`run_due`](Self::run_due).
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    queue: Mutex<Queue>,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            queue: Mutex::new(Queue::default()),
        })
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Tasks that are scheduled and not cancelled.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .pending
            .iter()
            .filter(|p| !p.token.is_cancelled())
            .count()
    }

    /// Requested delays of the live tasks, in scheduling order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.queue
            .lock()
            .pending
            .iter()
            .filter(|p| !p.token.is_cancelled())
            .map(|p| p.delay)
            .collect()
    }

    /// Move the clock forward by `by`, running every task that falls due on
    /// the way in due order. Tasks scheduled meanwhile run too if they fall
    /// inside the window. Returns how many tasks ran.
    pub async fn advance(&self, by: Duration) -> usize {
        let target = self.clock.elapsed() + by;
        let mut ran = 0;
        while let Some(pending) = self.take_next(target) {
            self.clock.set_elapsed(pending.due);
            if !pending.token.is_cancelled() {
                pending.task.await;
                ran += 1;
            }
        }
        self.clock.set_elapsed(target);
        ran
    }

    /// Run tasks already due without moving the clock.
    pub async fn run_due(&self) -> usize {
        self.advance(Duration::ZERO).await
    }

    fn take_next(&self, until: Duration) -> Option<Pending> {
        let mut queue = self.queue.lock();
        queue.pending.retain(|p| !p.token.is_cancelled());
        let index = queue
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= until)
            .min_by_key(|(_, p)| (p.due, p.seq))
            .map(|(i, _)| i)?;
        Some(queue.pending.remove(index))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let token = CancelToken::new();
        let mut queue = self.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.pending.push(Pending {
            seq,
            due: self.clock.elapsed() + delay,
            delay,
            token: token.clone(),
            task,
        });
        ScheduledTask::new(token, None)
    }
}

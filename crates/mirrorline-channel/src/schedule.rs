//! Delayed task scheduling and time sources.
//!
//! Retry timers go through a [`Scheduler`] and cooldown windows read a
//! [`Clock`], so both can be driven by hand in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

/// A unit of deferred work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task; call [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancelToken,
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    /// Wrap a cancellation token (and optionally the runtime task).
    pub fn new(token: CancelToken, abort: Option<AbortHandle>) -> Self {
        Self { token, abort }
    }

    /// Prevent the task from running if it has not started yet.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;
}

/// Scheduler backed by the tokio timer. Must be used inside a runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let token = CancelToken::new();
        let guard = token.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !guard.is_cancelled() {
                task.await;
            }
        });
        ScheduledTask::new(token, Some(handle.abort_handle()))
    }
}

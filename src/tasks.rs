//! Tracked, panic-isolated background work.
//!
//! Request handlers hand fire-and-forget work (sending an email, say) to
//! [`BackgroundTasks::submit`] instead of calling `tokio::spawn` directly, so that
//! shutdown can wait for it.
//!
//! Invariants:
//! - The in-flight counter is incremented before the task is spawned and decremented
//!   exactly once when it ends: success, returned error, panic, or cancellation.
//! - Errors and panics inside a task are logged and never propagate.
//! - Once [`close`](BackgroundTasks::close)d, no new work is accepted, so
//!   [`wait`](BackgroundTasks::wait) observes a counter that only decreases.
//!
//! ```rust
//! use greenlight::BackgroundTasks;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let tasks = BackgroundTasks::new();
//! tasks
//!     .submit("welcome_email", async {
//!         // deliver the email...
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .unwrap();
//! tasks.close();
//! tasks.wait().await;
//! assert_eq!(tasks.in_flight(), 0);
//! # }
//! ```

use crate::error::TaskError;
use crate::recover::panic_message;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: AtomicUsize,
    closed: AtomicBool,
    idle: Notify,
}

/// Counting tracker for background work. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    state: Arc<TrackerState>,
}

/// Holds one unit of the in-flight count; releasing it is the only way to decrement.
///
/// Dropped on every exit path of the task, including unwinding and runtime shutdown.
#[derive(Debug)]
pub struct TaskGuard {
    state: Arc<TrackerState>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}

impl BackgroundTasks {
    /// Create an empty, open tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an in-flight slot. Fails once the tracker is closed.
    ///
    /// Most callers want [`submit`](Self::submit); this is for work driven by an
    /// executor other than tokio's.
    pub fn guard(&self, task: &str) -> Result<TaskGuard, TaskError> {
        // Count first, then check: a `wait()` racing with `close()` either sees this
        // slot or we back out through the guard's drop. Both sides store then load,
        // so all four accesses must be SeqCst.
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = TaskGuard { state: Arc::clone(&self.state) };
        if self.state.closed.load(Ordering::SeqCst) {
            drop(guard);
            return Err(TaskError::Closed { task: task.to_string() });
        }
        Ok(guard)
    }

    /// Run `work` on an independently scheduled tokio task. Returns immediately.
    ///
    /// A returned error is logged at error level; a panic is caught and logged the
    /// same way. Neither reaches the caller.
    pub fn submit<F, E>(&self, task: impl Into<String>, work: F) -> Result<(), TaskError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let task = task.into();
        let guard = self.guard(&task)?;
        tokio::spawn(async move {
            let _guard = guard;
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(target: "greenlight::tasks", task = %task, "background task finished");
                }
                Ok(Err(err)) => {
                    error!(
                        target: "greenlight::tasks",
                        task = %task,
                        error = %err,
                        "background task failed"
                    );
                }
                Err(payload) => {
                    error!(
                        target: "greenlight::tasks",
                        task = %task,
                        panic = %panic_message(&*payload),
                        "background task panicked"
                    );
                }
            }
        });
        Ok(())
    }

    /// Stop accepting new work. Idempotent.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Current number of running tasks.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no task is in flight.
    pub async fn wait(&self) {
        loop {
            let idle = self.state.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a decrement between the check and the
            // await still wakes us.
            idle.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// [`wait`](Self::wait) bounded by `timeout`. On expiry returns the number of
    /// tasks still running; they are left to run.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), usize> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.in_flight()),
        }
    }
}

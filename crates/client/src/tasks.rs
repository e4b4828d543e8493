// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cooperative composite task runner.
//!
//! One worker task drives a set of registered tasks that are either
//! pending or idle. `wakeup` requests coalesce into at most one extra
//! pass; when nothing is pending the worker parks for at most 100 ms so
//! shutdown stays prompt even without a wakeup.
//!
//! Fairness: a task found pending is run and rotated to the back of the
//! list before the scan restarts, so two permanently-pending tasks
//! alternate instead of starving each other.
//!
//! The worker holds its own `Arc` of the runner core, so a task callback
//! may drop the owning object (transport teardown re-entering the
//! runner) without pulling the state out from under the loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// A short, idempotent unit of work scheduled on the runner.
///
/// `iterate` must handle its own failures; the runner never tears down
/// for a misbehaving task.
pub trait CompositeTask: Send + Sync {
    fn is_pending(&self) -> bool;
    fn iterate(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

const STATE_RUNNING: u8 = 0;
const STATE_STOPPING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// How long the worker parks when no task is pending.
const IDLE_PARK: Duration = Duration::from_millis(100);

struct RunnerCore {
    tasks: parking_lot::Mutex<Vec<Arc<dyn CompositeTask>>>,
    state: AtomicU8,
    pending: AtomicBool,
    wake: Notify,
    stopped: Notify,
}

#[derive(Clone)]
pub struct CompositeTaskRunner {
    core: Arc<RunnerCore>,
}

impl Default for CompositeTaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeTaskRunner {
    pub fn new() -> Self {
        Self {
            core: Arc::new(RunnerCore {
                tasks: parking_lot::Mutex::new(Vec::new()),
                state: AtomicU8::new(STATE_RUNNING),
                pending: AtomicBool::new(false),
                wake: Notify::new(),
                stopped: Notify::new(),
            }),
        }
    }

    /// Spawn the worker. A no-op once shutdown has begun.
    pub fn start(&self) {
        if self.core.state.load(Ordering::Acquire) != STATE_RUNNING {
            return;
        }
        let core = Arc::clone(&self.core);
        tokio::spawn(run_loop(core));
    }

    pub fn add(&self, task: Arc<dyn CompositeTask>) {
        self.core.tasks.lock().push(task);
        self.wakeup();
    }

    /// Unregister by identity; unknown tasks are ignored.
    pub fn remove(&self, task: &Arc<dyn CompositeTask>) {
        let mut tasks = self.core.tasks.lock();
        tasks.retain(|t| !Arc::ptr_eq(t, task));
        drop(tasks);
        self.wakeup();
    }

    /// Request a pass over all tasks; concurrent wakeups coalesce.
    pub fn wakeup(&self) {
        if self.core.state.load(Ordering::Acquire) != STATE_RUNNING {
            return;
        }
        self.core.pending.store(true, Ordering::Release);
        self.core.wake.notify_one();
    }

    /// Signal shutdown without waiting for the worker to exit. Safe to
    /// call from inside a task callback.
    pub fn shutdown(&self) {
        if self
            .core
            .state
            .compare_exchange(STATE_RUNNING, STATE_STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.core.pending.store(true, Ordering::Release);
        self.core.wake.notify_one();
    }

    /// Signal shutdown and wait (bounded) for the worker to exit. Must
    /// not be awaited from inside a task callback; use
    /// [`shutdown`](Self::shutdown) there.
    pub async fn shutdown_and_wait(&self, wait: Duration) {
        self.shutdown();
        let deadline = tokio::time::Instant::now() + wait;
        while self.core.state.load(Ordering::Acquire) != STATE_STOPPED {
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            let _ = timeout(Duration::from_millis(10), self.core.stopped.notified()).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.core.state.load(Ordering::Acquire) == STATE_STOPPED
    }
}

async fn run_loop(core: Arc<RunnerCore>) {
    // `core` is a local strong handle: the owning runner may be dropped
    // re-entrantly by a task while this loop is mid-iteration.
    loop {
        if core.state.load(Ordering::Acquire) != STATE_RUNNING {
            break;
        }
        core.pending.store(false, Ordering::Release);

        if iterate(&core).await {
            // A task with no internal await point must not monopolize
            // the executor between passes.
            tokio::task::yield_now().await;
        } else {
            if core.state.load(Ordering::Acquire) != STATE_RUNNING {
                break;
            }
            if !core.pending.load(Ordering::Acquire) {
                let _ = timeout(IDLE_PARK, core.wake.notified()).await;
            }
        }
    }

    core.state.store(STATE_STOPPED, Ordering::Release);
    core.stopped.notify_waiters();
}

/// Run the first pending task, rotate it to the back, and report whether
/// anything ran. Scanning restarts from the front on the next call, so
/// the rotation is what provides fairness.
async fn iterate(core: &Arc<RunnerCore>) -> bool {
    let task = {
        let mut tasks = core.tasks.lock();
        let position = tasks.iter().position(|t| t.is_pending());
        match position {
            Some(index) => {
                let task = tasks.remove(index);
                tasks.push(Arc::clone(&task));
                Some(task)
            }
            None => None,
        }
    };

    match task {
        Some(task) => {
            task.iterate().await;
            true
        }
        None => false,
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;

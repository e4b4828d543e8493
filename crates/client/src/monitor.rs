// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reentrant monitor: an owner-and-depth recursive lock paired with a
//! wait/notify condition, in the style of a Java object monitor.
//!
//! The operation that makes this more than a recursive mutex is the
//! atomic full-release-and-restore pair `fully_unlock`/`re_lock`, which
//! lets a thread park on the condition from arbitrary recursion depth and
//! come back at the same depth. [`ReentrantMonitor::wait`] performs that
//! dance internally against a single core mutex, so a notification between
//! release and park cannot be lost.
//!
//! Misuse by a non-owner (unlock, wait, fully_unlock) is a no-op.

use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Core {
    owner: Option<ThreadId>,
    depth: usize,
}

#[derive(Debug, Default)]
pub struct ReentrantMonitor {
    core: Mutex<Core>,
    /// Signaled whenever the monitor becomes free.
    lock_free: Condvar,
    /// The wait/notify condition.
    signal: Condvar,
}

impl ReentrantMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire, blocking until available. Reentrant for the owner.
    pub fn lock(&self) {
        let tid = thread::current().id();
        let mut core = self.core.lock();
        if core.owner == Some(tid) {
            core.depth += 1;
            return;
        }
        while core.owner.is_some() {
            self.lock_free.wait(&mut core);
        }
        core.owner = Some(tid);
        core.depth = 1;
    }

    /// Acquire without blocking; reentrant acquisitions always succeed.
    pub fn try_lock(&self) -> bool {
        let tid = thread::current().id();
        let mut core = self.core.lock();
        if core.owner == Some(tid) {
            core.depth += 1;
            return true;
        }
        if core.owner.is_some() {
            return false;
        }
        core.owner = Some(tid);
        core.depth = 1;
        true
    }

    /// Release one level. Releasing to depth zero frees the monitor.
    pub fn unlock(&self) {
        let tid = thread::current().id();
        let mut core = self.core.lock();
        if core.owner != Some(tid) {
            return;
        }
        core.depth -= 1;
        if core.depth == 0 {
            core.owner = None;
            self.lock_free.notify_one();
        }
    }

    /// Release every held level at once. Returns the depth that was held
    /// so [`re_lock`](Self::re_lock) can restore it, or 0 for a
    /// non-owner.
    pub fn fully_unlock(&self) -> usize {
        let tid = thread::current().id();
        let mut core = self.core.lock();
        if core.owner != Some(tid) {
            return 0;
        }
        let saved = core.depth;
        core.owner = None;
        core.depth = 0;
        self.lock_free.notify_one();
        saved
    }

    /// Reacquire at the given depth after a [`fully_unlock`](Self::fully_unlock).
    pub fn re_lock(&self, depth: usize) {
        if depth == 0 {
            return;
        }
        let tid = thread::current().id();
        let mut core = self.core.lock();
        while core.owner.is_some() {
            self.lock_free.wait(&mut core);
        }
        core.owner = Some(tid);
        core.depth = depth;
    }

    /// Park on the condition, releasing the monitor for the duration and
    /// restoring ownership at the previous depth before returning.
    ///
    /// Spurious wakeups are possible; callers loop on their predicate.
    /// A `None` timeout waits until notified.
    pub fn wait(&self, timeout: Option<Duration>) {
        let tid = thread::current().id();
        let mut core = self.core.lock();
        if core.owner != Some(tid) {
            return;
        }
        let saved = core.depth;
        core.owner = None;
        core.depth = 0;
        self.lock_free.notify_one();

        // Same mutex for state and condition: release and park are atomic.
        match timeout {
            Some(duration) => {
                let _ = self.signal.wait_for(&mut core, duration);
            }
            None => self.signal.wait(&mut core),
        }

        while core.owner.is_some() {
            self.lock_free.wait(&mut core);
        }
        core.owner = Some(tid);
        core.depth = saved;
    }

    /// Wake every thread parked in [`wait`](Self::wait).
    pub fn notify_all(&self) {
        let _core = self.core.lock();
        self.signal.notify_all();
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.core.lock().owner == Some(thread::current().id())
    }

    pub fn is_locked(&self) -> bool {
        self.core.lock().owner.is_some()
    }

    /// Recursion depth held by the calling thread; 0 for non-owners.
    pub fn depth(&self) -> usize {
        let core = self.core.lock();
        if core.owner == Some(thread::current().id()) {
            core.depth
        } else {
            0
        }
    }

    /// Run `f` with the monitor held.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// RAII acquisition; the guard releases one level on drop.
    pub fn enter(&self) -> MonitorGuard<'_> {
        self.lock();
        MonitorGuard { monitor: self }
    }
}

pub struct MonitorGuard<'a> {
    monitor: &'a ReentrantMonitor,
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.monitor.unlock();
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bidirectional keep-alive.
//!
//! Two cooperative tasks on the connection's composite runner:
//! - the write checker sends a KeepAliveInfo when nothing has been
//!   written for half the negotiated inactivity window;
//! - the read checker declares the transport dead when nothing has been
//!   read for a full window.
//!
//! Both stay disabled until the WireFormatInfo exchange has been seen in
//! both directions, then wait out the negotiated initial delay before
//! engaging. A negotiated window of 0 disables the monitor entirely.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use openwire::command::{CommandKind, WireFormatInfo};
use openwire::Command;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::tasks::{CompositeTask, CompositeTaskRunner};
use crate::transport::{ListenerSlot, Transport, TransportListener};

struct Shared {
    next: Arc<dyn Transport>,
    listeners: ListenerSlot,
    epoch: Instant,
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
    /// 0 until negotiated; u64::MAX once permanently disabled.
    period_ms: AtomicU64,
    armed_at_ms: AtomicU64,
    keep_alive_response_required: AtomicBool,
    read_failed: AtomicBool,
    closed: AtomicBool,
    local_info: Mutex<Option<WireFormatInfo>>,
    remote_info: Mutex<Option<WireFormatInfo>>,
}

impl Shared {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn armed(&self) -> bool {
        let period = self.period_ms.load(Ordering::Acquire);
        if period == 0 || period == u64::MAX || self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.now_ms() >= self.armed_at_ms.load(Ordering::Acquire)
    }

    /// Called with both WireFormatInfos in hand: fix the window and the
    /// arming instant.
    fn try_arm(&self) {
        let local = self.local_info.lock().clone();
        let remote = self.remote_info.lock().clone();
        let (Some(local), Some(remote)) = (local, remote) else { return };

        let period = if local.max_inactivity_duration == 0 || remote.max_inactivity_duration == 0 {
            0
        } else {
            local.max_inactivity_duration.min(remote.max_inactivity_duration)
        };
        if period <= 0 {
            self.period_ms.store(u64::MAX, Ordering::Release);
            tracing::debug!("inactivity monitor disabled by negotiation");
            return;
        }
        let initial_delay = local
            .max_inactivity_duration_initial_delay
            .min(remote.max_inactivity_duration_initial_delay)
            .max(0) as u64;

        let now = self.now_ms();
        self.last_read_ms.store(now, Ordering::Release);
        self.last_write_ms.store(now, Ordering::Release);
        self.armed_at_ms.store(now + initial_delay, Ordering::Release);
        self.period_ms.store(period as u64, Ordering::Release);
        tracing::debug!(period_ms = period, initial_delay_ms = initial_delay, "inactivity monitor armed");
    }
}

/// Keep-alive probe on the write side.
struct WriteChecker {
    shared: Arc<Shared>,
}

impl CompositeTask for WriteChecker {
    fn is_pending(&self) -> bool {
        if !self.shared.armed() {
            return false;
        }
        let period = self.shared.period_ms.load(Ordering::Acquire);
        let idle = self.shared.now_ms().saturating_sub(self.shared.last_write_ms.load(Ordering::Acquire));
        idle >= period / 2
    }

    fn iterate(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut command = Command::new(CommandKind::KeepAliveInfo);
            command.response_required =
                self.shared.keep_alive_response_required.load(Ordering::Acquire);
            // Stamp the write eagerly so a slow send does not double-fire.
            self.shared.last_write_ms.store(self.shared.now_ms(), Ordering::Release);
            if let Err(error) = self.shared.next.oneway(command).await {
                tracing::debug!(error = %error, "keep-alive send failed");
            }
        })
    }
}

/// Peer-silence detector on the read side.
struct ReadChecker {
    shared: Arc<Shared>,
}

impl CompositeTask for ReadChecker {
    fn is_pending(&self) -> bool {
        if !self.shared.armed() || self.shared.read_failed.load(Ordering::Acquire) {
            return false;
        }
        let period = self.shared.period_ms.load(Ordering::Acquire);
        let idle = self.shared.now_ms().saturating_sub(self.shared.last_read_ms.load(Ordering::Acquire));
        idle > period
    }

    fn iterate(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.shared.read_failed.swap(true, Ordering::AcqRel) {
                return;
            }
            let period = self.shared.period_ms.load(Ordering::Acquire);
            tracing::warn!(period_ms = period, "no inbound traffic inside inactivity window");
            self.shared.listeners.on_exception(Error::io(format!(
                "inactivity read check timed out: no traffic for {period} ms"
            )));
        })
    }
}

pub struct InactivityMonitor {
    shared: Arc<Shared>,
    runner: CompositeTaskRunner,
    tasks: Mutex<Vec<Arc<dyn CompositeTask>>>,
}

impl InactivityMonitor {
    pub fn new(
        next: Arc<dyn Transport>,
        runner: CompositeTaskRunner,
        keep_alive_response_required: bool,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            next,
            listeners: ListenerSlot::new(),
            epoch: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
            period_ms: AtomicU64::new(0),
            armed_at_ms: AtomicU64::new(u64::MAX),
            keep_alive_response_required: AtomicBool::new(keep_alive_response_required),
            read_failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            local_info: Mutex::new(None),
            remote_info: Mutex::new(None),
        });
        let this = Arc::new(Self {
            shared: Arc::clone(&shared),
            runner,
            tasks: Mutex::new(Vec::new()),
        });
        this.shared.next.set_listener(Arc::clone(&this) as Arc<dyn TransportListener>);
        this
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.shared.armed()
    }
}

#[async_trait]
impl Transport for InactivityMonitor {
    async fn start(&self) -> Result<()> {
        self.shared.next.start().await?;
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            let read: Arc<dyn CompositeTask> =
                Arc::new(ReadChecker { shared: Arc::clone(&self.shared) });
            let write: Arc<dyn CompositeTask> =
                Arc::new(WriteChecker { shared: Arc::clone(&self.shared) });
            self.runner.add(Arc::clone(&read));
            self.runner.add(Arc::clone(&write));
            tasks.push(read);
            tasks.push(write);
        }
        Ok(())
    }

    async fn oneway(&self, command: Command) -> Result<()> {
        if let CommandKind::WireFormatInfo(info) = &command.kind {
            *self.shared.local_info.lock() = Some(info.clone());
            self.shared.try_arm();
        }
        self.shared.next.oneway(command).await?;
        self.shared.last_write_ms.store(self.shared.now_ms(), Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        // De-register before the socket goes away so no task fires into a
        // dead transport.
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            self.runner.remove(task);
        }
        self.shared.next.close().await
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        self.shared.listeners.set(listener);
    }

    fn is_connected(&self) -> bool {
        self.shared.next.is_connected() && !self.shared.read_failed.load(Ordering::Acquire)
    }
}

impl TransportListener for InactivityMonitor {
    fn on_command(&self, command: Command) {
        self.shared.last_read_ms.store(self.shared.now_ms(), Ordering::Release);
        if let CommandKind::WireFormatInfo(info) = &command.kind {
            *self.shared.remote_info.lock() = Some(info.clone());
            self.shared.try_arm();
        }
        self.shared.listeners.on_command(command);
    }

    fn on_exception(&self, error: Error) {
        self.shared.listeners.on_exception(error);
    }

    fn transport_interrupted(&self) {
        self.shared.listeners.transport_interrupted();
    }

    fn transport_resumed(&self) {
        self.shared.listeners.transport_resumed();
    }
}

#[cfg(test)]
#[path = "inactivity_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message dispatch channels between the connection's dispatch path and
//! consumer workers.
//!
//! Two shapes behind one trait: plain FIFO and an eight-band priority
//! channel. Both gate delivery on `start`: until then `peek`, `dequeue`
//! and `dequeue_no_wait` yield nothing, so a channel can be pre-loaded
//! with recovered messages before delivery begins. `stop` pauses
//! delivery the same way; `close` is terminal and wakes every blocked
//! dequeuer.
//!
//! Blocking waits ride the channel's [`ReentrantMonitor`]; enqueue and
//! dequeue never hold any higher-level lock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use openwire::command::MessageDispatch;
use parking_lot::Mutex;

use crate::monitor::ReentrantMonitor;

/// Priority bands in the priority channel. JMS priorities 0-9 fold into
/// bands 0-6; band 7 is reserved for recovered (`enqueue_first`)
/// traffic so redeliveries always precede newly arrived messages.
pub const PRIORITY_BANDS: usize = 8;
const RECOVERED_BAND: usize = PRIORITY_BANDS - 1;

/// Band for a JMS priority 0-9 (values above 9 clamp).
pub fn priority_band(priority: u8) -> usize {
    match priority {
        0..=3 => 0,
        4 => 1,
        5 => 2,
        6 => 3,
        7 => 4,
        8 => 5,
        _ => 6,
    }
}

pub trait DispatchChannel: Send + Sync {
    fn enqueue(&self, dispatch: MessageDispatch);
    /// Queue ahead of everything else; used for recovered messages.
    fn enqueue_first(&self, dispatch: MessageDispatch);
    fn dequeue_no_wait(&self) -> Option<MessageDispatch>;
    /// Blocking dequeue; `None` timeout waits until a message arrives or
    /// the channel closes.
    fn dequeue(&self, timeout: Option<Duration>) -> Option<MessageDispatch>;
    fn peek(&self) -> Option<MessageDispatch>;
    /// Drain everything, started or not.
    fn remove_all(&self) -> Vec<MessageDispatch>;
    fn start(&self);
    fn stop(&self);
    fn close(&self);
    fn is_running(&self) -> bool;
    fn is_closed(&self) -> bool;
    fn size(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[derive(Debug, Default)]
struct Flags {
    running: bool,
    closed: bool,
}

/// Strict arrival-order channel.
#[derive(Default)]
pub struct FifoDispatchChannel {
    monitor: ReentrantMonitor,
    queue: Mutex<VecDeque<MessageDispatch>>,
    flags: Mutex<Flags>,
}

impl FifoDispatchChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self) {
        self.monitor.with(|| self.monitor.notify_all());
    }
}

impl DispatchChannel for FifoDispatchChannel {
    fn enqueue(&self, dispatch: MessageDispatch) {
        if self.flags.lock().closed {
            return;
        }
        self.queue.lock().push_back(dispatch);
        self.notify();
    }

    fn enqueue_first(&self, dispatch: MessageDispatch) {
        if self.flags.lock().closed {
            return;
        }
        self.queue.lock().push_front(dispatch);
        self.notify();
    }

    fn dequeue_no_wait(&self) -> Option<MessageDispatch> {
        let flags = self.flags.lock();
        if flags.closed || !flags.running {
            return None;
        }
        drop(flags);
        self.queue.lock().pop_front()
    }

    fn dequeue(&self, timeout: Option<Duration>) -> Option<MessageDispatch> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let _guard = self.monitor.enter();
        loop {
            {
                let flags = self.flags.lock();
                if flags.closed {
                    return None;
                }
                if flags.running {
                    drop(flags);
                    if let Some(dispatch) = self.queue.lock().pop_front() {
                        return Some(dispatch);
                    }
                }
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.monitor.wait(Some(deadline - now));
                }
                None => self.monitor.wait(None),
            }
        }
    }

    fn peek(&self) -> Option<MessageDispatch> {
        let flags = self.flags.lock();
        if flags.closed || !flags.running {
            return None;
        }
        drop(flags);
        self.queue.lock().front().cloned()
    }

    fn remove_all(&self) -> Vec<MessageDispatch> {
        self.queue.lock().drain(..).collect()
    }

    fn start(&self) {
        let mut flags = self.flags.lock();
        if flags.closed {
            return;
        }
        flags.running = true;
        drop(flags);
        self.notify();
    }

    fn stop(&self) {
        self.flags.lock().running = false;
        self.notify();
    }

    fn close(&self) {
        let mut flags = self.flags.lock();
        flags.running = false;
        flags.closed = true;
        drop(flags);
        self.notify();
    }

    fn is_running(&self) -> bool {
        self.flags.lock().running
    }

    fn is_closed(&self) -> bool {
        self.flags.lock().closed
    }

    fn size(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Eight-band priority channel; within a band, FIFO.
pub struct PriorityDispatchChannel {
    monitor: ReentrantMonitor,
    bands: Mutex<[VecDeque<MessageDispatch>; PRIORITY_BANDS]>,
    flags: Mutex<Flags>,
}

impl Default for PriorityDispatchChannel {
    fn default() -> Self {
        Self {
            monitor: ReentrantMonitor::new(),
            bands: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
            flags: Mutex::new(Flags::default()),
        }
    }
}

impl PriorityDispatchChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self) {
        self.monitor.with(|| self.monitor.notify_all());
    }

    fn band_of(dispatch: &MessageDispatch) -> usize {
        let priority = dispatch.message.as_ref().map(|m| m.priority).unwrap_or(4);
        priority_band(priority)
    }

    fn pop_highest(&self) -> Option<MessageDispatch> {
        let mut bands = self.bands.lock();
        for band in (0..PRIORITY_BANDS).rev() {
            if let Some(dispatch) = bands[band].pop_front() {
                return Some(dispatch);
            }
        }
        None
    }
}

impl DispatchChannel for PriorityDispatchChannel {
    fn enqueue(&self, dispatch: MessageDispatch) {
        if self.flags.lock().closed {
            return;
        }
        let band = Self::band_of(&dispatch);
        self.bands.lock()[band].push_back(dispatch);
        self.notify();
    }

    fn enqueue_first(&self, dispatch: MessageDispatch) {
        if self.flags.lock().closed {
            return;
        }
        // Recovered traffic outranks every regular band. Like the FIFO
        // channel, each call lands at the very front; bulk restores
        // iterate in reverse to keep their original order.
        self.bands.lock()[RECOVERED_BAND].push_front(dispatch);
        self.notify();
    }

    fn dequeue_no_wait(&self) -> Option<MessageDispatch> {
        let flags = self.flags.lock();
        if flags.closed || !flags.running {
            return None;
        }
        drop(flags);
        self.pop_highest()
    }

    fn dequeue(&self, timeout: Option<Duration>) -> Option<MessageDispatch> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let _guard = self.monitor.enter();
        loop {
            {
                let flags = self.flags.lock();
                if flags.closed {
                    return None;
                }
                if flags.running {
                    drop(flags);
                    if let Some(dispatch) = self.pop_highest() {
                        return Some(dispatch);
                    }
                }
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.monitor.wait(Some(deadline - now));
                }
                None => self.monitor.wait(None),
            }
        }
    }

    fn peek(&self) -> Option<MessageDispatch> {
        let flags = self.flags.lock();
        if flags.closed || !flags.running {
            return None;
        }
        drop(flags);
        let bands = self.bands.lock();
        for band in (0..PRIORITY_BANDS).rev() {
            if let Some(dispatch) = bands[band].front() {
                return Some(dispatch.clone());
            }
        }
        None
    }

    fn remove_all(&self) -> Vec<MessageDispatch> {
        let mut bands = self.bands.lock();
        let mut drained = Vec::new();
        for band in (0..PRIORITY_BANDS).rev() {
            drained.extend(bands[band].drain(..));
        }
        drained
    }

    fn start(&self) {
        let mut flags = self.flags.lock();
        if flags.closed {
            return;
        }
        flags.running = true;
        drop(flags);
        self.notify();
    }

    fn stop(&self) {
        self.flags.lock().running = false;
        self.notify();
    }

    fn close(&self) {
        let mut flags = self.flags.lock();
        flags.running = false;
        flags.closed = true;
        drop(flags);
        self.notify();
    }

    fn is_running(&self) -> bool {
        self.flags.lock().running
    }

    fn is_closed(&self) -> bool {
        self.flags.lock().closed
    }

    fn size(&self) -> usize {
        self.bands.lock().iter().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

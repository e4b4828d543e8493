// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-process transport for unit tests.
//!
//! Records every command sent through it, can auto-answer
//! `responseRequired` commands, and lets tests inject inbound commands
//! and transport failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openwire::command::CommandKind;
use openwire::Command;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::transport::{ListenerSlot, Transport, TransportListener};

#[derive(Default)]
pub struct MockTransport {
    listeners: ListenerSlot,
    sent: Mutex<Vec<Command>>,
    sent_notify: Notify,
    connected: AtomicBool,
    auto_respond: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let mock = Arc::new(Self::default());
        mock.connected.store(true, Ordering::Release);
        mock
    }

    /// Answer every `responseRequired` command with a plain Response.
    pub fn with_auto_respond(self: Arc<Self>) -> Arc<Self> {
        self.auto_respond.store(true, Ordering::Release);
        self
    }

    /// Make subsequent sends fail with an i/o error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Deliver a command up the chain, as though read from the wire.
    pub fn inject(&self, command: Command) {
        self.listeners.on_command(command);
    }

    /// Raise a transport failure up the chain.
    pub fn inject_error(&self, error: Error) {
        self.connected.store(false, Ordering::Release);
        self.listeners.on_exception(error);
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Wait until at least `count` commands have been recorded.
    pub async fn wait_for_sent(&self, count: usize, budget: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if self.sent.lock().len() >= count {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(budget));
            }
            let _ =
                tokio::time::timeout(Duration::from_millis(10), self.sent_notify.notified()).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn oneway(&self, command: Command) -> Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(Error::io("mock transport send failure"));
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::io("mock transport is disconnected"));
        }
        let respond = self.auto_respond.load(Ordering::Acquire) && command.response_required;
        let command_id = command.command_id;
        self.sent.lock().push(command);
        self.sent_notify.notify_waiters();
        if respond {
            self.listeners.on_command(Command::new(CommandKind::Response {
                correlation_id: command_id,
            }));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        self.listeners.set(listener);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response correlation.
//!
//! Turns the one-way command stream into synchronous requests and async
//! futures. Outbound commands are stamped with a per-connection
//! monotonically increasing command id (starting at 1); responses are
//! matched by correlation id against a mutex-guarded map of pending
//! futures. Futures are always completed outside that lock.
//!
//! Once a transport error is recorded the correlator is terminal: every
//! pending future completes with an `ExceptionResponse` carrying its own
//! correlation id, and later sends fail synchronously.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openwire::command::{BrokerFault, CommandKind};
use openwire::Command;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::transport::{ListenerSlot, Transport, TransportListener};

/// Invoked instead of a waiter when a response (or failure) arrives.
pub type ResponseCallback = Box<dyn FnOnce(CommandKind) + Send>;

/// One-shot rendezvous with the response to a request.
pub struct FutureResponse {
    rx: oneshot::Receiver<CommandKind>,
}

impl FutureResponse {
    /// Wait for the response. Broker exceptions come back as `Ok` here;
    /// [`unwrap_response`] maps them to errors.
    pub async fn response(self) -> Result<CommandKind> {
        self.rx.await.map_err(|_| Error::io("request abandoned before completion"))
    }

    /// Wait with a budget. On timeout the caller's map entry has already
    /// been removed by the scope guard in `request`.
    pub async fn response_timeout(self, timeout: Duration) -> Result<CommandKind> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(kind)) => Ok(kind),
            Ok(Err(_)) => Err(Error::io("request abandoned before completion")),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }
}

/// Convert a completed response into the caller-facing result.
pub fn unwrap_response(kind: CommandKind) -> Result<CommandKind> {
    match kind {
        CommandKind::ExceptionResponse { exception, .. } => {
            Err(Error::Broker { class: exception.exception_class, message: exception.message })
        }
        other => Ok(other),
    }
}

struct PendingEntry {
    tx: oneshot::Sender<CommandKind>,
    callback: Option<ResponseCallback>,
}

impl PendingEntry {
    fn complete(self, kind: CommandKind) {
        if let Some(callback) = self.callback {
            callback(kind.clone());
        }
        // The waiter may have gone away (timeout); that is not an error.
        let _ = self.tx.send(kind);
    }
}

struct CorrelatorState {
    next_command_id: u32,
    requests: HashMap<u32, PendingEntry>,
    prior_error: Option<Error>,
}

pub struct ResponseCorrelator {
    next: Arc<dyn Transport>,
    listeners: ListenerSlot,
    state: Mutex<CorrelatorState>,
}

impl ResponseCorrelator {
    /// Build and install as the next transport's listener.
    pub fn new(next: Arc<dyn Transport>) -> Arc<Self> {
        let this = Arc::new(Self {
            next,
            listeners: ListenerSlot::new(),
            state: Mutex::new(CorrelatorState {
                next_command_id: 0,
                requests: HashMap::new(),
                prior_error: None,
            }),
        });
        this.next.set_listener(Arc::clone(&this) as Arc<dyn TransportListener>);
        this
    }

    fn stamp(&self, command: &mut Command, response_required: bool) -> Result<u32> {
        let mut state = self.state.lock();
        if let Some(error) = &state.prior_error {
            return Err(error.clone().context("correlator is closed"));
        }
        state.next_command_id += 1;
        command.command_id = state.next_command_id;
        command.response_required = response_required;
        Ok(command.command_id)
    }

    /// Send with `responseRequired` and return the pending future.
    pub async fn async_request(
        &self,
        mut command: Command,
        callback: Option<ResponseCallback>,
    ) -> Result<FutureResponse> {
        let command_id = self.stamp(&mut command, true)?;
        let (tx, rx) = oneshot::channel();
        self.state.lock().requests.insert(command_id, PendingEntry { tx, callback });

        if let Err(error) = self.next.oneway(command).await {
            // Remove eagerly so the map cannot grow on failed sends.
            self.state.lock().requests.remove(&command_id);
            return Err(error);
        }
        Ok(FutureResponse { rx })
    }

    /// Synchronous request; waits forever.
    pub async fn request(&self, command: Command) -> Result<CommandKind> {
        self.request_with(command, None).await
    }

    /// Synchronous request with a timeout budget.
    pub async fn request_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<CommandKind> {
        self.request_with(command, Some(timeout)).await
    }

    async fn request_with(
        &self,
        mut command: Command,
        timeout: Option<Duration>,
    ) -> Result<CommandKind> {
        let command_id = self.stamp(&mut command, true)?;
        let (tx, rx) = oneshot::channel();
        self.state.lock().requests.insert(command_id, PendingEntry { tx, callback: None });

        // Removes the map entry on every exit path: success, error,
        // timeout.
        let _cleanup = RemoveOnDrop { correlator: self, command_id };

        self.next.oneway(command).await?;

        let future = FutureResponse { rx };
        let kind = match timeout {
            Some(budget) => future.response_timeout(budget).await?,
            None => future.response().await?,
        };
        unwrap_response(kind)
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    fn dispose(&self, error: Error) {
        let drained: Vec<(u32, PendingEntry)> = {
            let mut state = self.state.lock();
            if state.prior_error.is_some() {
                return;
            }
            state.prior_error = Some(error.clone());
            state.requests.drain().collect()
        };
        if drained.is_empty() {
            return;
        }
        tracing::debug!(pending = drained.len(), error = %error, "failing pending requests");
        let fault = BrokerFault::new("Transport", error.to_string());
        // Completions happen outside the map lock so a waiter holding an
        // unrelated lock cannot deadlock against us.
        for (correlation_id, entry) in drained {
            entry.complete(CommandKind::ExceptionResponse {
                correlation_id,
                exception: fault.clone(),
            });
        }
    }
}

struct RemoveOnDrop<'a> {
    correlator: &'a ResponseCorrelator,
    command_id: u32,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        self.correlator.state.lock().requests.remove(&self.command_id);
    }
}

#[async_trait]
impl Transport for ResponseCorrelator {
    async fn start(&self) -> Result<()> {
        self.next.start().await
    }

    async fn oneway(&self, mut command: Command) -> Result<()> {
        self.stamp(&mut command, false)?;
        self.next.oneway(command).await
    }

    async fn close(&self) -> Result<()> {
        self.dispose(Error::io("transport stopped"));
        self.next.close().await
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        self.listeners.set(listener);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().prior_error.is_none() && self.next.is_connected()
    }
}

impl TransportListener for ResponseCorrelator {
    fn on_command(&self, command: Command) {
        match command.correlation_id() {
            Some(correlation_id) => {
                let entry = self.state.lock().requests.remove(&correlation_id);
                match entry {
                    Some(entry) => entry.complete(command.kind),
                    // A response with no waiter is the expected race with
                    // a timed-out request.
                    None => {
                        tracing::trace!(correlation_id, "response with no pending request")
                    }
                }
            }
            None => self.listeners.on_command(command),
        }
    }

    fn on_exception(&self, error: Error) {
        self.dispose(error.clone());
        self.listeners.on_exception(error);
    }

    fn transport_interrupted(&self) {
        self.listeners.transport_interrupted();
    }

    fn transport_resumed(&self) {
        self.listeners.transport_resumed();
    }
}

#[cfg(test)]
#[path = "correlator_tests.rs"]
mod tests;

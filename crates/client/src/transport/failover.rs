// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failover supervisor.
//!
//! Masks transient socket failures from the layers above. While
//! disconnected, outbound commands buffer in an ordered backlog (bounded
//! by `maxCacheSize`); reconnection runs as a composite task that walks
//! the URI pool with exponential backoff. On a fresh broker the
//! supervisor first replays the tracked connection state (connection →
//! sessions → consumers → producers → open transactions), then pending
//! requests that never saw a response, then the backlog in enqueue
//! order. Everything replays with its original command id, so the
//! correlator above keeps one map across reconnects.
//!
//! Exceeding the reconnect budget disposes the supervisor and surfaces
//! the last error upward, failing every pending request.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use openwire::Command;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::state::ConnectionStateTracker;
use crate::tasks::{CompositeTask, CompositeTaskRunner};
use crate::transport::{ListenerSlot, Transport, TransportListener};
use crate::uri::{BrokerUri, FailoverOptions};

/// Builds, starts, and negotiates one inner transport chain for a broker
/// URI, with the given listener already installed.
pub type ChainFactory = Arc<
    dyn Fn(
            BrokerUri,
            Arc<dyn TransportListener>,
        ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Transport>>> + Send>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverStatus {
    Disconnected,
    Connecting,
    Connected,
    Interrupted,
    Disposed,
}

struct FailoverState {
    uris: Vec<BrokerUri>,
    next_uri: usize,
    active: Option<Arc<dyn Transport>>,
    /// Incremented on every attempt and failure; stale inner listeners
    /// compare against it and go quiet.
    epoch: u64,
    backlog: VecDeque<Command>,
    /// responseRequired commands with no response yet, in send order.
    pending_requests: IndexMap<u32, Command>,
    attempts: i32,
    reconnect_delay: Duration,
    next_attempt_at: Instant,
    ever_connected: bool,
    disposed: bool,
    last_error: Option<Error>,
}

struct FailoverCore {
    options: FailoverOptions,
    factory: ChainFactory,
    runner: CompositeTaskRunner,
    listeners: ListenerSlot,
    tracker: ConnectionStateTracker,
    state: Mutex<FailoverState>,
    status_tx: watch::Sender<FailoverStatus>,
}

pub struct FailoverTransport {
    core: Arc<FailoverCore>,
    task: Arc<dyn CompositeTask>,
}

impl FailoverTransport {
    pub fn new(
        uris: Vec<BrokerUri>,
        options: FailoverOptions,
        factory: ChainFactory,
        runner: CompositeTaskRunner,
    ) -> Arc<Self> {
        let initial_delay = options.initial_reconnect_delay;
        let (status_tx, _) = watch::channel(FailoverStatus::Disconnected);
        let core = Arc::new(FailoverCore {
            options,
            factory,
            runner,
            listeners: ListenerSlot::new(),
            tracker: ConnectionStateTracker::new(),
            state: Mutex::new(FailoverState {
                uris,
                next_uri: 0,
                active: None,
                epoch: 0,
                backlog: VecDeque::new(),
                pending_requests: IndexMap::new(),
                attempts: 0,
                reconnect_delay: initial_delay,
                next_attempt_at: Instant::now(),
                ever_connected: false,
                disposed: false,
                last_error: None,
            }),
            status_tx,
        });
        let task: Arc<dyn CompositeTask> = Arc::new(ReconnectTask { core: Arc::clone(&core) });
        Arc::new(Self { core, task })
    }

    pub fn status(&self) -> FailoverStatus {
        *self.core.status_tx.borrow()
    }

    /// Wait until the supervisor reaches `Connected` (or is disposed).
    pub async fn await_connected(&self, budget: Duration) -> Result<()> {
        let mut status = self.core.status_tx.subscribe();
        let wait = async {
            loop {
                match *status.borrow() {
                    FailoverStatus::Connected => return Ok(()),
                    FailoverStatus::Disposed => {
                        let error = self.core.state.lock().last_error.clone();
                        return Err(error
                            .unwrap_or_else(|| Error::io("failover transport disposed")));
                    }
                    _ => {}
                }
                if status.changed().await.is_err() {
                    return Err(Error::io("failover transport dropped"));
                }
            }
        };
        match tokio::time::timeout(budget, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(budget).context("waiting for broker connection")),
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.core.state.lock().backlog.len()
    }
}

#[async_trait]
impl Transport for FailoverTransport {
    async fn start(&self) -> Result<()> {
        {
            let mut state = self.core.state.lock();
            if state.disposed {
                return Err(Error::illegal_state("failover transport already disposed"));
            }
            if self.core.options.randomize {
                state.uris.shuffle(&mut rand::rng());
            }
            state.next_attempt_at = Instant::now();
        }
        let _ = self.core.status_tx.send(FailoverStatus::Connecting);
        self.core.runner.add(Arc::clone(&self.task));
        self.core.runner.wakeup();
        Ok(())
    }

    async fn oneway(&self, command: Command) -> Result<()> {
        let active = {
            let mut state = self.core.state.lock();
            if state.disposed {
                let error = state.last_error.clone();
                return Err(error.unwrap_or_else(|| Error::io("failover transport disposed")));
            }
            self.core.tracker.track(&command);
            if command.response_required {
                state.pending_requests.insert(command.command_id, command.clone());
            }
            match state.active.clone() {
                Some(active) => active,
                None => {
                    // Message traffic is only buffered across outages
                    // when trackMessages is on; control commands always
                    // are.
                    if matches!(command.kind, openwire::command::CommandKind::Message(_))
                        && !self.core.options.track_messages
                    {
                        return Err(Error::io(
                            "broker unavailable and trackMessages is disabled",
                        ));
                    }
                    if state.backlog.len() >= self.core.options.max_cache_size {
                        return Err(Error::io(format!(
                            "failover backlog full ({} commands)",
                            state.backlog.len()
                        )));
                    }
                    state.backlog.push_back(command);
                    return Ok(());
                }
            }
        };

        let epoch = self.core.state.lock().epoch;
        if let Err(error) = active.oneway(command.clone()).await {
            tracing::debug!(error = %error, "send failed, buffering for reconnect");
            {
                let mut state = self.core.state.lock();
                state.backlog.push_back(command);
            }
            self.core.handle_inner_failure(epoch, error);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let active = {
            let mut state = self.core.state.lock();
            state.disposed = true;
            state.active.take()
        };
        let _ = self.core.status_tx.send(FailoverStatus::Disposed);
        self.core.runner.remove(&self.task);
        if let Some(active) = active {
            active.close().await?;
        }
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        self.core.listeners.set(listener);
    }

    fn is_connected(&self) -> bool {
        *self.core.status_tx.borrow() == FailoverStatus::Connected
    }
}

impl FailoverCore {
    /// Inner-chain failure with the epoch the listener was created for.
    fn handle_inner_failure(&self, epoch: u64, error: Error) {
        {
            let mut state = self.state.lock();
            if state.disposed || state.epoch != epoch {
                return;
            }
            state.epoch += 1;
            state.active = None;
            state.last_error = Some(error.clone());
            state.reconnect_delay = self.options.initial_reconnect_delay;
            state.next_attempt_at = Instant::now();
        }
        tracing::info!(error = %error, "transport interrupted, scheduling reconnect");
        let _ = self.status_tx.send(FailoverStatus::Interrupted);
        self.listeners.transport_interrupted();
        let _ = self.status_tx.send(FailoverStatus::Connecting);
        self.runner.wakeup();
    }

    fn dispose_with(&self, error: Error) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.last_error = Some(error.clone());
        }
        tracing::warn!(error = %error, "reconnect budget exhausted, disposing failover transport");
        let _ = self.status_tx.send(FailoverStatus::Disposed);
        self.listeners.on_exception(error);
    }

    /// One connection attempt. Runs on the composite runner.
    async fn try_connect(self: &Arc<Self>) {
        let (uri, epoch) = {
            let mut state = self.state.lock();
            if state.disposed || state.active.is_some() || state.uris.is_empty() {
                return;
            }
            if Instant::now() < state.next_attempt_at {
                return;
            }
            let uri = state.uris[state.next_uri % state.uris.len()].clone();
            state.next_uri += 1;
            state.epoch += 1;
            (uri, state.epoch)
        };

        tracing::debug!(uri = %uri, attempt_epoch = epoch, "connecting");
        let listener: Arc<dyn TransportListener> =
            Arc::new(InnerListener { core: Arc::clone(self), epoch });

        match (self.factory)(uri.clone(), listener).await {
            Ok(transport) => {
                if let Err(error) = self.restore_and_adopt(transport, epoch).await {
                    tracing::debug!(uri = %uri, error = %error, "state replay failed");
                    self.record_attempt_failure(error);
                }
            }
            Err(error) => {
                tracing::debug!(uri = %uri, error = %error, "connect failed");
                self.record_attempt_failure(error);
            }
        }
    }

    /// Replay resubscription state, orphaned requests, and the backlog,
    /// then make the transport active.
    async fn restore_and_adopt(&self, transport: Arc<dyn Transport>, epoch: u64) -> Result<()> {
        let (resubscribe, replay, backlog) = {
            let mut state = self.state.lock();
            if state.disposed || state.epoch != epoch {
                return Ok(());
            }
            let resubscribe = self.tracker.restore_commands();
            let resubscribed: std::collections::HashSet<u32> =
                resubscribe.iter().map(|c| c.command_id).collect();
            let backlog: Vec<Command> = state.backlog.drain(..).collect();
            let backlogged: std::collections::HashSet<u32> =
                backlog.iter().map(|c| c.command_id).collect();
            // Requests already on the wire whose responses were lost; the
            // correlator still holds their futures under these ids.
            let replay: Vec<Command> = state
                .pending_requests
                .values()
                .filter(|c| {
                    !resubscribed.contains(&c.command_id) && !backlogged.contains(&c.command_id)
                })
                .cloned()
                .collect();
            (resubscribe, replay, backlog)
        };

        for command in resubscribe.into_iter().chain(replay).chain(backlog) {
            transport.oneway(command).await?;
        }

        {
            let mut state = self.state.lock();
            if state.disposed || state.epoch != epoch {
                return Ok(());
            }
            state.active = Some(transport);
            state.attempts = 0;
            state.ever_connected = true;
            state.reconnect_delay = self.options.initial_reconnect_delay;
        }
        tracing::info!("transport resumed");
        let _ = self.status_tx.send(FailoverStatus::Connected);
        self.listeners.transport_resumed();
        Ok(())
    }

    fn record_attempt_failure(&self, error: Error) {
        let disposed = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.attempts += 1;
            state.last_error = Some(error.clone());

            let budget = if state.ever_connected {
                self.options.max_reconnect_attempts
            } else if self.options.startup_max_reconnect_attempts >= 0 {
                self.options.startup_max_reconnect_attempts
            } else {
                self.options.max_reconnect_attempts
            };
            if budget >= 0 && state.attempts > budget {
                true
            } else {
                state.next_attempt_at = Instant::now() + state.reconnect_delay;
                if self.options.use_exponential_back_off {
                    state.reconnect_delay = state
                        .reconnect_delay
                        .mul_f64(self.options.back_off_multiplier)
                        .min(self.options.max_reconnect_delay);
                }
                false
            }
        };
        if disposed {
            self.dispose_with(error);
        } else {
            self.runner.wakeup();
        }
    }
}

/// Reconnect driver registered on the composite runner.
struct ReconnectTask {
    core: Arc<FailoverCore>,
}

impl CompositeTask for ReconnectTask {
    fn is_pending(&self) -> bool {
        let state = self.core.state.lock();
        !state.disposed
            && state.active.is_none()
            && !state.uris.is_empty()
            && Instant::now() >= state.next_attempt_at
    }

    fn iterate(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.core.try_connect().await;
        })
    }
}

/// Routes inbound traffic from one attempt's chain; goes quiet once its
/// epoch is stale.
struct InnerListener {
    core: Arc<FailoverCore>,
    epoch: u64,
}

impl TransportListener for InnerListener {
    fn on_command(&self, command: Command) {
        {
            let mut state = self.core.state.lock();
            if state.disposed {
                return;
            }
            if let Some(correlation_id) = command.correlation_id() {
                state.pending_requests.shift_remove(&correlation_id);
            }
        }
        self.core.listeners.on_command(command);
    }

    fn on_exception(&self, error: Error) {
        self.core.handle_inner_failure(self.epoch, error);
    }
}

#[cfg(test)]
#[path = "failover_tests.rs"]
mod tests;

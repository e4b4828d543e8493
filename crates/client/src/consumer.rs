// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer dispatch pipeline: per-consumer channel, prefetch-aware
//! acknowledgement strategies, duplicate suppression, redelivery and
//! poison handling.
//!
//! Ack strategy by session mode:
//! - AUTO: standard ack after the handler returns; with
//!   `optimizeAcknowledge` acks batch until 65% of the prefetch window
//!   or the optimize timeout, whichever first. Expired messages are
//!   acked promptly even inside the batch window.
//! - DUPS_OK: acks coalesce up to 65% of the prefetch window.
//! - CLIENT: `message.acknowledge()` acks everything up to and
//!   including that message.
//! - INDIVIDUAL: `message.acknowledge()` acks exactly that message.
//! - TRANSACTED: deliveries register with the session transaction and
//!   ack at commit.
//!
//! A message whose property blob fails to parse is rolled back and
//! redelivered through the channel front; once the redelivery counter
//! passes the policy maximum a POISON ack routes it to the DLQ and the
//! connection stays open.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use openwire::command::{
    AckType, CommandKind, ConsumerInfo, MessageAck, MessageDispatch, MessagePull, RemoveInfo,
};
use openwire::destination::Destination;
use openwire::ids::{ConsumerId, DataStructure, MessageId};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::audit::MessageAudit;
use crate::channel::{DispatchChannel, FifoDispatchChannel, PriorityDispatchChannel};
use crate::error::{Error, Result};
use crate::message::ReceivedMessage;
use crate::policy::RedeliveryPolicy;
use crate::session::{AckMode, SessionInner};

/// Receives asynchronously dispatched messages on the session's
/// dispatch thread. Implementations must not block indefinitely.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: ReceivedMessage);
}

/// Portion of delivered messages that triggers a coalesced ack.
const ACK_BATCH_PERCENT: usize = 65;

pub(crate) struct ConsumerInner {
    pub(crate) info: ConsumerInfo,
    pub(crate) session: Arc<SessionInner>,
    pub(crate) channel: Arc<dyn DispatchChannel>,
    listener: RwLock<Option<Arc<dyn MessageListener>>>,
    /// Delivered but not yet acknowledged, in delivery order.
    delivered: Mutex<VecDeque<MessageDispatch>>,
    audit: Option<MessageAudit>,
    redelivery_policy: RedeliveryPolicy,
    optimize_acknowledge: bool,
    optimize_deadline: Mutex<Option<Instant>>,
    pub(crate) cancel: CancellationToken,
    closed: AtomicBool,
}

impl ConsumerInner {
    pub(crate) fn new(
        info: ConsumerInfo,
        session: Arc<SessionInner>,
        redelivery_policy: RedeliveryPolicy,
        with_audit: bool,
        priority_channel: bool,
        optimize_acknowledge: bool,
    ) -> Arc<Self> {
        let channel: Arc<dyn DispatchChannel> = if priority_channel {
            Arc::new(PriorityDispatchChannel::new())
        } else {
            Arc::new(FifoDispatchChannel::new())
        };
        Arc::new(Self {
            info,
            session,
            channel,
            listener: RwLock::new(None),
            delivered: Mutex::new(VecDeque::new()),
            audit: with_audit.then(MessageAudit::default),
            redelivery_policy,
            optimize_acknowledge,
            optimize_deadline: Mutex::new(None),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn consumer_id(&self) -> &ConsumerId {
        &self.info.consumer_id
    }

    pub(crate) fn has_listener(&self) -> bool {
        self.listener.read().is_some()
    }

    pub(crate) fn set_listener(&self, listener: Option<Arc<dyn MessageListener>>) {
        *self.listener.write() = listener;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Entry from the connection's dispatch path.
    pub(crate) fn dispatch(&self, dispatch: MessageDispatch) {
        if self.is_closed() {
            return;
        }
        self.channel.enqueue(dispatch);
    }

    fn ack_batch_threshold(&self) -> usize {
        ((self.info.prefetch_size.max(1) as usize) * ACK_BATCH_PERCENT / 100).max(1)
    }

    fn ack_command(
        &self,
        ack_type: AckType,
        first: Option<MessageId>,
        last: Option<MessageId>,
        count: i32,
        poison_cause: Option<String>,
    ) -> CommandKind {
        CommandKind::MessageAck(MessageAck {
            ack_type,
            consumer_id: self.info.consumer_id.clone(),
            destination: self.info.destination.clone(),
            transaction_id: None,
            first_message_id: first,
            last_message_id: last,
            message_count: count,
            poison_cause,
            subscription_name: self.info.subscription_name.clone(),
        })
    }

    fn single_ack(&self, ack_type: AckType, dispatch: &MessageDispatch, cause: Option<String>) {
        let Some(message) = &dispatch.message else { return };
        let id = message.message_id.clone();
        self.session
            .connection
            .send_bg(self.ack_command(ack_type, Some(id.clone()), Some(id), 1, cause));
    }

    /// Coalesced STANDARD ack covering everything in `delivered`.
    fn flush_delivered(&self) {
        let drained: Vec<MessageDispatch> = {
            let mut delivered = self.delivered.lock();
            if delivered.is_empty() {
                return;
            }
            delivered.drain(..).collect()
        };
        *self.optimize_deadline.lock() = None;
        let first = drained.first().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
        let last = drained.last().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
        self.session.connection.send_bg(self.ack_command(
            AckType::Standard,
            first,
            last,
            drained.len() as i32,
            None,
        ));
    }

    /// Pre-delivery filtering shared by the listener and receive paths.
    /// Side effects (duplicate acks, expired acks, transaction
    /// registration) happen here; `None` means the dispatch was consumed
    /// without user delivery.
    fn prepare(self: &Arc<Self>, dispatch: &MessageDispatch) -> Option<ReceivedMessage> {
        let message = dispatch.message.as_ref()?;

        if let Some(audit) = &self.audit {
            if audit.is_duplicate(&message.message_id) {
                tracing::debug!(message_id = %message.message_id, "suppressing duplicate delivery");
                self.single_ack(AckType::Standard, dispatch, None);
                return None;
            }
        }

        if ReceivedMessage::has_expired(message) {
            // Promptly, independent of any optimized batch in flight.
            self.single_ack(AckType::Expired, dispatch, None);
            return None;
        }

        if self.session.mode == AckMode::Transacted {
            self.session.register_transacted_delivery(self, dispatch);
        }

        Some(ReceivedMessage::new(
            message.clone(),
            dispatch.redelivery_counter,
            Arc::clone(self),
        ))
    }

    /// Deliver on the session dispatch thread.
    pub(crate) fn process_listener_dispatch(self: &Arc<Self>, dispatch: MessageDispatch) {
        let Some(received) = self.prepare(&dispatch) else { return };

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_message(received.clone());
        }

        if received.property_access_failed() {
            self.rollback_dispatch(dispatch);
            return;
        }
        self.post_delivery_ack(dispatch);
    }

    /// Ack bookkeeping after a successful delivery.
    fn post_delivery_ack(&self, dispatch: MessageDispatch) {
        match self.session.mode {
            AckMode::Auto => {
                if self.optimize_acknowledge {
                    self.delivered.lock().push_back(dispatch);
                    self.maybe_flush_optimized();
                } else {
                    self.single_ack(AckType::Standard, &dispatch, None);
                }
            }
            AckMode::DupsOk => {
                let size = {
                    let mut delivered = self.delivered.lock();
                    delivered.push_back(dispatch);
                    delivered.len()
                };
                if size >= self.ack_batch_threshold() {
                    self.flush_delivered();
                }
            }
            AckMode::Client | AckMode::Individual => {
                self.delivered.lock().push_back(dispatch);
            }
            // Registered with the transaction in `prepare`.
            AckMode::Transacted => {}
        }
    }

    fn maybe_flush_optimized(&self) {
        let (size, due) = {
            let delivered = self.delivered.lock();
            let mut deadline = self.optimize_deadline.lock();
            if deadline.is_none() && !delivered.is_empty() {
                *deadline =
                    Some(Instant::now() + self.session.connection.config.connection.optimize_acknowledge_timeout);
            }
            (delivered.len(), deadline.is_some_and(|d| Instant::now() >= d))
        };
        if size >= self.ack_batch_threshold() || due {
            self.flush_delivered();
        }
    }

    /// Timer tick from the optimized-ack scheduler.
    pub(crate) fn optimized_ack_tick(&self) {
        if self.optimize_acknowledge && !self.is_closed() {
            self.maybe_flush_optimized();
        }
    }

    /// Roll back a delivery that failed in user hands (property
    /// corruption). Redelivers locally through the channel front, or
    /// poisons once the policy is exhausted.
    fn rollback_dispatch(self: &Arc<Self>, mut dispatch: MessageDispatch) {
        let next_count = dispatch.redelivery_counter + 1;
        if self.redelivery_policy.is_exhausted(next_count) {
            let cause = format!(
                "delivery failed {next_count} times, exceeding maximumRedeliveries {}",
                self.redelivery_policy.maximum_redeliveries
            );
            if let Some(message) = &dispatch.message {
                tracing::warn!(message_id = %message.message_id, cause, "poisoning message");
            }
            self.single_ack(AckType::Poison, &dispatch, Some(cause));
            return;
        }

        self.prepare_redelivery(&mut dispatch);
        let delay = self.redelivery_policy.delay_for(next_count);
        tracing::debug!(attempt = next_count, delay_ms = delay.as_millis() as u64, "redelivering");
        if delay.is_zero() {
            self.requeue_front(dispatch);
        } else {
            let consumer = Arc::clone(self);
            let cancel = self.cancel.clone();
            self.session.connection.handle.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => consumer.requeue_front(dispatch),
                }
            });
        }
    }

    /// CLIENT/INDIVIDUAL acknowledgement entry from
    /// [`ReceivedMessage::acknowledge`].
    pub(crate) fn acknowledge_message(&self, message_id: &MessageId) -> Result<()> {
        if self.is_closed() {
            return Err(Error::illegal_state("consumer is closed"));
        }
        match self.session.mode {
            AckMode::Client => {
                let (first, last, count) = {
                    let mut delivered = self.delivered.lock();
                    let position = delivered.iter().position(|d| {
                        d.message.as_ref().is_some_and(|m| &m.message_id == message_id)
                    });
                    let Some(position) = position else { return Ok(()) };
                    let acked: Vec<MessageDispatch> = delivered.drain(..=position).collect();
                    let first =
                        acked.first().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
                    let last =
                        acked.last().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
                    (first, last, acked.len() as i32)
                };
                self.session
                    .connection
                    .send_bg(self.ack_command(AckType::Standard, first, last, count, None));
                Ok(())
            }
            AckMode::Individual => {
                {
                    let mut delivered = self.delivered.lock();
                    delivered.retain(|d| {
                        d.message.as_ref().is_none_or(|m| &m.message_id != message_id)
                    });
                }
                self.session.connection.send_bg(self.ack_command(
                    AckType::Individual,
                    Some(message_id.clone()),
                    Some(message_id.clone()),
                    1,
                    None,
                ));
                Ok(())
            }
            // No-op in AUTO/DUPS_OK; the session handles transacted acks.
            _ => Ok(()),
        }
    }

    /// Put a dispatch back at the front of whichever channel feeds this
    /// consumer: the session dispatch thread for listener consumers, the
    /// consumer's own channel for receive-style ones.
    pub(crate) fn requeue_front(&self, dispatch: MessageDispatch) {
        if self.has_listener() {
            self.session.requeue_front(dispatch);
        } else {
            self.channel.enqueue_first(dispatch);
        }
    }

    /// Bump the redelivery counter and un-see the id in the audit so the
    /// deliberate redelivery is not suppressed as a duplicate.
    pub(crate) fn prepare_redelivery(&self, dispatch: &mut MessageDispatch) {
        dispatch.redelivery_counter += 1;
        if let Some(message) = &mut dispatch.message {
            message.redelivery_counter = dispatch.redelivery_counter;
            if let Some(audit) = &self.audit {
                audit.forget(&message.message_id);
            }
        }
    }

    /// Newest delivered-but-unacked message id, if any.
    pub(crate) fn last_unacked_message_id(&self) -> Option<MessageId> {
        self.delivered.lock().back().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone())
    }

    /// Re-queue every unacked delivery marked redelivered; used by
    /// `Session::recover` in CLIENT mode.
    pub(crate) fn redeliver_unacked(&self) {
        let drained: Vec<MessageDispatch> = self.delivered.lock().drain(..).collect();
        // Reverse so the front-insertion restores the original order.
        for mut dispatch in drained.into_iter().rev() {
            self.prepare_redelivery(&mut dispatch);
            self.requeue_front(dispatch);
        }
    }

    /// Drop buffered dispatches after a transport interruption; the
    /// broker redelivers them once the consumer is resubscribed.
    pub(crate) fn clear_in_progress(&self) {
        let dropped = self.channel.remove_all().len();
        if dropped > 0 {
            tracing::debug!(dropped, consumer_id = %self.info.consumer_id, "cleared in-flight dispatches");
        }
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        // Outstanding coalesced acks must not be lost.
        if matches!(self.session.mode, AckMode::Auto | AckMode::DupsOk) {
            self.flush_delivered();
        }
        self.channel.close();
        self.session
            .connection
            .oneway(CommandKind::RemoveInfo(RemoveInfo {
                object_id: DataStructure::ConsumerId(self.info.consumer_id.clone()),
                last_delivered_sequence_id: 0,
            }))
            .await?;
        self.session.remove_consumer(self.info.consumer_id.value);
        Ok(())
    }
}

/// A message consumer bound to one destination.
#[derive(Clone)]
pub struct Consumer {
    pub(crate) inner: Arc<ConsumerInner>,
}

impl Consumer {
    pub fn consumer_id(&self) -> &ConsumerId {
        self.inner.consumer_id()
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.info.destination
    }

    /// Install (or replace) the async listener. Messages flow on the
    /// session's dispatch thread once the connection is started;
    /// anything already buffered for synchronous receive migrates over.
    pub fn set_listener(&self, listener: Arc<dyn MessageListener>) {
        self.inner.session.install_listener(&self.inner, Some(listener));
    }

    pub fn clear_listener(&self) {
        self.inner.session.install_listener(&self.inner, None);
    }

    /// Blocking receive; resolves when a message arrives or the
    /// consumer closes.
    pub async fn receive(&self) -> Result<Option<ReceivedMessage>> {
        self.receive_internal(None).await
    }

    /// Blocking receive with a budget. `Ok(None)` on timeout, with no
    /// side effects.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Option<ReceivedMessage>> {
        self.receive_internal(Some(timeout)).await
    }

    /// Non-blocking receive.
    pub fn receive_no_wait(&self) -> Result<Option<ReceivedMessage>> {
        if self.inner.is_closed() {
            return Err(Error::illegal_state("consumer is closed"));
        }
        while let Some(dispatch) = self.inner.channel.dequeue_no_wait() {
            if let Some(received) = self.finish_receive(dispatch) {
                return Ok(Some(received));
            }
        }
        Ok(None)
    }

    async fn receive_internal(&self, timeout: Option<Duration>) -> Result<Option<ReceivedMessage>> {
        if self.inner.is_closed() {
            return Err(Error::illegal_state("consumer is closed"));
        }
        // A zero prefetch window means the broker only dispatches on
        // request.
        if self.inner.info.prefetch_size == 0 {
            self.inner.session.connection.send_bg(CommandKind::MessagePull(MessagePull {
                consumer_id: self.inner.info.consumer_id.clone(),
                destination: self.inner.info.destination.clone(),
                timeout: timeout.map(|t| t.as_millis() as i64).unwrap_or(0),
            }));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            let channel = Arc::clone(&self.inner.channel);
            let dispatch =
                tokio::task::spawn_blocking(move || channel.dequeue(remaining))
                    .await
                    .map_err(|e| Error::io(format!("receive worker failed: {e}")))?;
            let Some(dispatch) = dispatch else {
                // Channel closed or timed out; closed consumers report
                // None like an elapsed wait.
                return Ok(None);
            };
            if let Some(received) = self.finish_receive(dispatch) {
                return Ok(Some(received));
            }
        }
    }

    /// Post-dequeue half of the synchronous receive path.
    fn finish_receive(&self, dispatch: MessageDispatch) -> Option<ReceivedMessage> {
        let received = self.inner.prepare(&dispatch)?;
        self.inner.post_delivery_ack(dispatch);
        Some(received)
    }

    /// Close the consumer. A durable subscription's broker state
    /// persists; only `Session::unsubscribe` removes it.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

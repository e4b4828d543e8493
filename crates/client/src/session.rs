// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sessions: consumer/producer factories, the per-session dispatch
//! thread, and local transaction state.
//!
//! Each session owns one dispatch thread draining a FIFO channel, so
//! listener delivery across that session's consumers is strictly
//! ordered. Transacted sessions lazily BEGIN on first use, buffer
//! delivered messages, and turn them into bulk acks at commit; rollback
//! restores the dispatch channels front-first so redeliveries precede
//! newly arrived messages.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use openwire::command::{
    AckType, CommandKind, ConsumerInfo, MessageAck, MessageDispatch, ProducerInfo, RemoveInfo,
    RemoveSubscriptionInfo, SessionInfo, TransactionInfo, TransactionPhase,
};
use openwire::destination::Destination;
use openwire::ids::{ConsumerId, DataStructure, MessageId, ProducerId, SessionId, TransactionId};
use parking_lot::{Mutex, RwLock};

use crate::channel::{DispatchChannel, FifoDispatchChannel};
use crate::connection::ConnectionInner;
use crate::consumer::{Consumer, ConsumerInner};
use crate::error::{Error, Result};
use crate::monitor::ReentrantMonitor;
use crate::producer::{Producer, ProducerInner};
use crate::uri::DestinationOptions;

/// JMS-style acknowledgement modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    DupsOk,
    Transacted,
    Individual,
}

impl AckMode {
    pub fn is_transacted(&self) -> bool {
        matches!(self, Self::Transacted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO_ACKNOWLEDGE",
            Self::Client => "CLIENT_ACKNOWLEDGE",
            Self::DupsOk => "DUPS_OK_ACKNOWLEDGE",
            Self::Transacted => "SESSION_TRANSACTED",
            Self::Individual => "INDIVIDUAL_ACKNOWLEDGE",
        }
    }
}

/// Options for consumer creation beyond the destination itself.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub selector: Option<String>,
    pub no_local: bool,
    pub subscription_name: Option<String>,
    pub exclusive: bool,
    pub retroactive: bool,
    pub priority: u8,
    pub browser: bool,
}

#[derive(Default)]
struct TransactionState {
    current: Option<TransactionId>,
    /// Transacted deliveries in order, for the commit-time bulk ack and
    /// rollback restore.
    deliveries: Vec<(Arc<ConsumerInner>, MessageDispatch)>,
}

pub(crate) struct SessionInner {
    pub(crate) id: SessionId,
    pub(crate) mode: AckMode,
    pub(crate) connection: Arc<ConnectionInner>,
    pub(crate) consumers: RwLock<IndexMap<i64, Arc<ConsumerInner>>>,
    producers: RwLock<IndexMap<i64, Arc<ProducerInner>>>,
    consumer_seq: AtomicI64,
    producer_seq: AtomicI64,
    executor_channel: Arc<FifoDispatchChannel>,
    transaction: Mutex<TransactionState>,
    monitor: ReentrantMonitor,
    closed: AtomicBool,
}

impl SessionInner {
    pub(crate) async fn create(
        connection: Arc<ConnectionInner>,
        session_value: i64,
        mode: AckMode,
    ) -> Result<Arc<Self>> {
        let id = SessionId::new(connection.connection_id.value.clone(), session_value);
        connection
            .request(CommandKind::SessionInfo(SessionInfo { session_id: id.clone() }))
            .await?;

        let inner = Arc::new(Self {
            id,
            mode,
            connection: Arc::clone(&connection),
            consumers: RwLock::new(IndexMap::new()),
            producers: RwLock::new(IndexMap::new()),
            consumer_seq: AtomicI64::new(0),
            producer_seq: AtomicI64::new(0),
            executor_channel: Arc::new(FifoDispatchChannel::new()),
            transaction: Mutex::new(TransactionState::default()),
            monitor: ReentrantMonitor::new(),
            closed: AtomicBool::new(false),
        });

        // The session dispatch thread: serializes listener delivery for
        // every consumer on this session.
        let executor = Arc::clone(&inner);
        connection.handle.spawn_blocking(move || executor.run_dispatch_loop());

        if connection.is_started() {
            inner.start();
        }
        Ok(inner)
    }

    fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            match self.executor_channel.dequeue(None) {
                Some(dispatch) => {
                    let consumer = self.consumers.read().get(&dispatch.consumer_id.value).cloned();
                    match consumer {
                        Some(consumer) => consumer.process_listener_dispatch(dispatch),
                        None => {
                            tracing::debug!(consumer_id = %dispatch.consumer_id, "dispatch for unknown consumer");
                        }
                    }
                }
                None => {
                    if self.executor_channel.is_closed() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(session_id = %self.id, "session dispatch thread exiting");
    }

    /// Inbound dispatch from the connection. Listener consumers go
    /// through the session thread; receive-style consumers queue on
    /// their own channel. Guarded by the session monitor so listener
    /// installation cannot race a dispatch into the wrong queue.
    pub(crate) fn dispatch(&self, dispatch: MessageDispatch) {
        let consumer = self.consumers.read().get(&dispatch.consumer_id.value).cloned();
        let Some(consumer) = consumer else {
            tracing::debug!(consumer_id = %dispatch.consumer_id, "dispatch for unknown consumer");
            return;
        };
        self.monitor.with(|| {
            if consumer.has_listener() {
                self.executor_channel.enqueue(dispatch);
            } else {
                consumer.dispatch(dispatch);
            }
        });
    }

    /// Swap a consumer's listener. Anything already buffered on the
    /// consumer's own channel migrates to the dispatch thread, in
    /// order, before new arrivals can follow it.
    pub(crate) fn install_listener(
        &self,
        consumer: &Arc<ConsumerInner>,
        listener: Option<Arc<dyn crate::consumer::MessageListener>>,
    ) {
        self.monitor.with(|| {
            let installing = listener.is_some();
            consumer.set_listener(listener);
            if installing {
                for dispatch in consumer.channel.remove_all() {
                    self.executor_channel.enqueue(dispatch);
                }
            }
        });
    }

    pub(crate) fn start(&self) {
        self.monitor.with(|| {
            self.executor_channel.start();
            for consumer in self.consumers.read().values() {
                consumer.channel.start();
            }
        });
    }

    pub(crate) fn stop(&self) {
        self.monitor.with(|| {
            self.executor_channel.stop();
            for consumer in self.consumers.read().values() {
                consumer.channel.stop();
            }
        });
    }

    pub(crate) fn clear_in_progress(&self) {
        self.executor_channel.remove_all();
        for consumer in self.consumers.read().values() {
            consumer.clear_in_progress();
        }
    }

    pub(crate) fn remove_consumer(&self, consumer_value: i64) {
        self.consumers.write().shift_remove(&consumer_value);
    }

    /// Front-insert on the session dispatch thread's queue; redelivered
    /// listener traffic re-enters delivery ahead of new arrivals.
    pub(crate) fn requeue_front(&self, dispatch: MessageDispatch) {
        self.executor_channel.enqueue_first(dispatch);
    }

    pub(crate) fn remove_producer(&self, producer_value: i64) {
        self.producers.write().shift_remove(&producer_value);
    }

    pub(crate) fn producer_by_id(&self, producer_id: &ProducerId) -> Option<Arc<ProducerInner>> {
        self.producers.read().get(&producer_id.value).cloned()
    }

    /// Lazily open the session transaction. Returns the id plus the
    /// BEGIN command when this call opened it; the caller sends the
    /// BEGIN on its own path so it cannot reorder behind the work it
    /// covers.
    pub(crate) fn transaction_begin(&self) -> (TransactionId, Option<CommandKind>) {
        let mut transaction = self.transaction.lock();
        if let Some(current) = &transaction.current {
            return (current.clone(), None);
        }
        let id = TransactionId::local(
            self.connection.connection_id.value.clone(),
            self.connection.next_transaction_value(),
        );
        transaction.current = Some(id.clone());
        tracing::debug!(session_id = %self.id, "transaction begun");
        let begin = CommandKind::TransactionInfo(TransactionInfo {
            connection_id: self.connection.connection_id.clone(),
            transaction_id: id.clone(),
            phase: TransactionPhase::Begin,
        });
        (id, Some(begin))
    }

    /// Synchronous-context variant: the BEGIN rides the background
    /// sender, ordered ahead of any acks that follow it there.
    pub(crate) fn ensure_transaction(&self) -> TransactionId {
        let (id, begin) = self.transaction_begin();
        if let Some(begin) = begin {
            self.connection.send_bg(begin);
        }
        id
    }

    pub(crate) fn register_transacted_delivery(
        &self,
        consumer: &Arc<ConsumerInner>,
        dispatch: &MessageDispatch,
    ) {
        self.ensure_transaction();
        self.transaction.lock().deliveries.push((Arc::clone(consumer), dispatch.clone()));
    }

    async fn commit(&self) -> Result<()> {
        if !self.mode.is_transacted() {
            return Err(Error::illegal_state("commit on a non-transacted session"));
        }
        let (transaction_id, deliveries) = {
            let mut transaction = self.transaction.lock();
            (transaction.current.take(), std::mem::take(&mut transaction.deliveries))
        };
        let Some(transaction_id) = transaction_id else {
            // Nothing was sent or received inside a transaction window.
            return Ok(());
        };
        // The BEGIN (and any acks) queued on the background sender must
        // reach the transport before the outcome.
        self.connection.flush_bg().await;

        for (consumer, group) in group_by_consumer(deliveries) {
            let first = group.first().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
            let last = group.last().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
            self.connection
                .oneway(CommandKind::MessageAck(MessageAck {
                    ack_type: AckType::Standard,
                    consumer_id: consumer.info.consumer_id.clone(),
                    destination: consumer.info.destination.clone(),
                    transaction_id: Some(transaction_id.clone()),
                    first_message_id: first,
                    last_message_id: last,
                    message_count: group.len() as i32,
                    poison_cause: None,
                    subscription_name: consumer.info.subscription_name.clone(),
                }))
                .await?;
        }

        self.connection
            .request(CommandKind::TransactionInfo(TransactionInfo {
                connection_id: self.connection.connection_id.clone(),
                transaction_id,
                phase: TransactionPhase::CommitOnePhase,
            }))
            .await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.mode.is_transacted() {
            return Err(Error::illegal_state("rollback on a non-transacted session"));
        }
        let (transaction_id, deliveries) = {
            let mut transaction = self.transaction.lock();
            (transaction.current.take(), std::mem::take(&mut transaction.deliveries))
        };
        let Some(transaction_id) = transaction_id else { return Ok(()) };
        self.connection.flush_bg().await;

        // Tell the broker the deliveries are back in play.
        for (consumer, group) in group_by_consumer(deliveries.clone()) {
            let first = group.first().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
            let last = group.last().and_then(|d| d.message.as_ref()).map(|m| m.message_id.clone());
            self.connection
                .oneway(CommandKind::MessageAck(MessageAck {
                    ack_type: AckType::Redelivered,
                    consumer_id: consumer.info.consumer_id.clone(),
                    destination: consumer.info.destination.clone(),
                    transaction_id: None,
                    first_message_id: first,
                    last_message_id: last,
                    message_count: group.len() as i32,
                    poison_cause: None,
                    subscription_name: consumer.info.subscription_name.clone(),
                }))
                .await?;
        }

        // Restore front-first so redeliveries precede anything that
        // arrived since; reverse order keeps the original sequence.
        for (consumer, mut dispatch) in deliveries.into_iter().rev() {
            consumer.prepare_redelivery(&mut dispatch);
            consumer.requeue_front(dispatch);
        }

        self.connection
            .request(CommandKind::TransactionInfo(TransactionInfo {
                connection_id: self.connection.connection_id.clone(),
                transaction_id,
                phase: TransactionPhase::Rollback,
            }))
            .await?;
        Ok(())
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.monitor.with(|| self.stop());

        let consumers: Vec<Arc<ConsumerInner>> =
            self.consumers.read().values().cloned().collect();
        for consumer in consumers {
            consumer.close().await?;
        }
        let producers: Vec<Arc<ProducerInner>> =
            self.producers.read().values().cloned().collect();
        for producer in producers {
            producer.close().await?;
        }

        self.executor_channel.close();
        self.connection
            .oneway(CommandKind::RemoveInfo(RemoveInfo {
                object_id: DataStructure::SessionId(self.id.clone()),
                last_delivered_sequence_id: 0,
            }))
            .await?;
        self.connection.remove_session(self.id.value);
        Ok(())
    }
}

/// Group deliveries by consumer, preserving delivery order inside each
/// group.
fn group_by_consumer(
    deliveries: Vec<(Arc<ConsumerInner>, MessageDispatch)>,
) -> Vec<(Arc<ConsumerInner>, Vec<MessageDispatch>)> {
    let mut groups: IndexMap<ConsumerId, (Arc<ConsumerInner>, Vec<MessageDispatch>)> =
        IndexMap::new();
    for (consumer, dispatch) in deliveries {
        groups
            .entry(consumer.info.consumer_id.clone())
            .or_insert_with(|| (consumer, Vec::new()))
            .1
            .push(dispatch);
    }
    groups.into_values().collect()
}

/// A session: consumer/producer factory, dispatch serialization, and
/// transaction boundary.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    pub fn mode(&self) -> AckMode {
        self.inner.mode
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Parse a queue destination string (composite syntax allowed).
    pub fn queue(name: &str) -> Result<Destination> {
        Ok(Destination::parse(name, false)?)
    }

    /// Parse a topic destination string (composite syntax allowed).
    pub fn topic(name: &str) -> Result<Destination> {
        Ok(Destination::parse(name, true)?)
    }

    /// Create a consumer from a destination string. Query options
    /// (`?consumer.exclusive=true` and friends) are honored; the bare
    /// name may use composite syntax and `queue://` / `topic://`
    /// prefixes.
    pub async fn create_consumer(&self, destination: &str) -> Result<Consumer> {
        let (name, destination_options) = DestinationOptions::split(destination)?;
        let destination = Destination::parse(&name, false)?;
        let options = ConsumerOptions {
            selector: destination_options.selector.clone(),
            no_local: destination_options.no_local,
            exclusive: destination_options.exclusive,
            retroactive: destination_options.retroactive,
            priority: destination_options.priority,
            ..ConsumerOptions::default()
        };
        self.create_consumer_with(destination, options).await
    }

    /// Create a consumer on an already-built destination.
    pub async fn create_consumer_on(&self, destination: Destination) -> Result<Consumer> {
        self.create_consumer_with(destination, ConsumerOptions::default()).await
    }

    /// Create a durable topic subscriber. The broker resolves
    /// durability by client id plus subscription name.
    pub async fn create_durable_consumer(
        &self,
        topic: &str,
        subscription_name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Consumer> {
        let destination = Destination::parse(topic, true)?;
        if !destination.is_topic() {
            return Err(Error::illegal_state("durable subscriptions require a topic"));
        }
        let options = ConsumerOptions {
            selector: selector.map(str::to_owned),
            no_local,
            subscription_name: Some(subscription_name.to_owned()),
            ..ConsumerOptions::default()
        };
        self.create_consumer_with(destination, options).await
    }

    pub async fn create_consumer_with(
        &self,
        destination: Destination,
        options: ConsumerOptions,
    ) -> Result<Consumer> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::illegal_state("session is closed"));
        }
        let connection = &inner.connection;
        let config = &connection.config;

        let durable = options.subscription_name.is_some();
        let prefetch = if options.browser {
            config.prefetch.queue_browser
        } else if durable {
            if config.connection.optimize_acknowledge {
                config.prefetch.optimize_durable_topic
            } else {
                config.prefetch.durable_topic
            }
        } else if destination.is_topic() {
            config.prefetch.topic
        } else {
            config.prefetch.queue
        };

        let value = inner.consumer_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let consumer_id =
            ConsumerId::new(connection.connection_id.value.clone(), inner.id.value, value);
        let info = ConsumerInfo {
            consumer_id,
            destination,
            prefetch_size: prefetch,
            dispatch_async: config.connection.dispatch_async,
            selector: options.selector,
            subscription_name: options.subscription_name,
            no_local: options.no_local,
            exclusive: options.exclusive,
            retroactive: options.retroactive,
            browser: options.browser,
            priority: options.priority,
        };

        connection.request(CommandKind::ConsumerInfo(info.clone())).await?;

        let optimize = config.connection.optimize_acknowledge && self.inner.mode == AckMode::Auto;
        let consumer = ConsumerInner::new(
            info,
            Arc::clone(inner),
            config.redelivery.clone(),
            config.connection.check_for_duplicates,
            config.connection.message_priority_supported,
            optimize,
        );
        inner.consumers.write().insert(value, Arc::clone(&consumer));

        if optimize {
            spawn_optimized_ack_timer(connection, &consumer);
        }
        if connection.is_started() {
            consumer.channel.start();
        }
        Ok(Consumer { inner: consumer })
    }

    /// Create a producer, optionally bound to a default destination
    /// (string form; composite syntax allowed).
    pub async fn create_producer(&self, destination: Option<&str>) -> Result<Producer> {
        let destination = match destination {
            Some(name) => Some(Destination::parse(name, false)?),
            None => None,
        };
        self.create_producer_on(destination).await
    }

    pub async fn create_producer_on(&self, destination: Option<Destination>) -> Result<Producer> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::illegal_state("session is closed"));
        }
        let connection = &inner.connection;

        let value = inner.producer_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let producer_id =
            ProducerId::new(connection.connection_id.value.clone(), inner.id.value, value);
        let info = ProducerInfo {
            producer_id,
            destination,
            dispatch_async: connection.config.connection.dispatch_async,
            window_size: connection.config.connection.producer_window_size,
        };
        connection.request(CommandKind::ProducerInfo(info.clone())).await?;

        let producer = ProducerInner::new(info, Arc::clone(inner));
        inner.producers.write().insert(value, Arc::clone(&producer));
        Ok(Producer { inner: producer })
    }

    /// Commit the session transaction: one bulk ack per consumer, then
    /// TransactionInfo COMMIT.
    pub async fn commit(&self) -> Result<()> {
        self.inner.commit().await
    }

    /// Roll the transaction back; buffered deliveries return to their
    /// dispatch channels front-first with bumped redelivery counters.
    pub async fn rollback(&self) -> Result<()> {
        self.inner.rollback().await
    }

    /// Redeliver every unacked message on this session with the
    /// redelivered flag set. CLIENT (and other non-transacted) modes
    /// only.
    pub async fn recover(&self) -> Result<()> {
        if self.inner.mode.is_transacted() {
            return Err(Error::illegal_state("recover on a transacted session; use rollback"));
        }
        for consumer in self.inner.consumers.read().values() {
            consumer.redeliver_unacked();
        }
        Ok(())
    }

    /// Remove a durable subscription's broker-side state. Fails on the
    /// broker if the subscription still has an active consumer.
    pub async fn unsubscribe(&self, subscription_name: &str) -> Result<()> {
        let connection = &self.inner.connection;
        connection
            .request(CommandKind::RemoveSubscriptionInfo(RemoveSubscriptionInfo {
                connection_id: connection.connection_id.clone(),
                client_id: connection.client_id.clone(),
                subscription_name: subscription_name.to_owned(),
            }))
            .await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Acknowledge every delivered message on every CLIENT-mode
    /// consumer (JMS acknowledge-on-session semantics).
    pub fn acknowledge_all(&self) -> Result<()> {
        if self.inner.mode != AckMode::Client {
            return Ok(());
        }
        let consumers: Vec<Arc<ConsumerInner>> =
            self.inner.consumers.read().values().cloned().collect();
        for consumer in consumers {
            if let Some(last) = last_delivered_id(&consumer) {
                consumer.acknowledge_message(&last)?;
            }
        }
        Ok(())
    }
}

fn last_delivered_id(consumer: &Arc<ConsumerInner>) -> Option<MessageId> {
    consumer.last_unacked_message_id()
}

fn spawn_optimized_ack_timer(connection: &Arc<ConnectionInner>, consumer: &Arc<ConsumerInner>) {
    let interval = {
        let config = &connection.config.connection;
        if config.optimized_ack_scheduled_interval > std::time::Duration::ZERO {
            config.optimized_ack_scheduled_interval
        } else {
            config.optimize_acknowledge_timeout
        }
    };
    let consumer = Arc::clone(consumer);
    let cancel = consumer.cancel.clone();
    connection.handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => consumer.optimized_ack_tick(),
            }
        }
    });
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Producers: message assembly, persistent/async send modes, and the
//! ProducerAck-credited send window.
//!
//! Persistent sends are synchronous by default (send, await the broker
//! response); `useAsyncSend` or non-persistent delivery goes one-way
//! with backpressure from `producerWindowSize`: async sends debit the
//! window by body size and ProducerAck commands credit it back.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use openwire::command::{CommandKind, Message as WireMessage, ProducerInfo, RemoveInfo};
use openwire::destination::Destination;
use openwire::ids::{DataStructure, MessageId, ProducerId};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::message::{now_millis, OutboundMessage};
use crate::session::SessionInner;

/// Async-send backpressure window, credited by broker ProducerAcks.
pub(crate) struct ProducerWindow {
    limit: i64,
    used: Mutex<i64>,
    credited: Notify,
}

impl ProducerWindow {
    fn new(limit: i64) -> Self {
        Self { limit, used: Mutex::new(0), credited: Notify::new() }
    }

    /// Debit `size`, waiting for credit when the window is exhausted. A
    /// message larger than the whole window is admitted alone.
    async fn acquire(&self, size: i64) {
        loop {
            let notified = self.credited.notified();
            {
                let mut used = self.used.lock();
                if *used == 0 || *used + size <= self.limit {
                    *used += size;
                    return;
                }
            }
            notified.await;
        }
    }

    pub(crate) fn credit(&self, size: i64) {
        let mut used = self.used.lock();
        *used = (*used - size).max(0);
        drop(used);
        self.credited.notify_waiters();
    }

    #[cfg(test)]
    pub(crate) fn used(&self) -> i64 {
        *self.used.lock()
    }
}

struct SendDefaults {
    priority: u8,
    persistent: bool,
    time_to_live: Duration,
}

pub(crate) struct ProducerInner {
    pub(crate) info: ProducerInfo,
    session: Arc<SessionInner>,
    sequence: AtomicI64,
    pub(crate) window: Option<ProducerWindow>,
    defaults: Mutex<SendDefaults>,
    closed: AtomicBool,
}

impl ProducerInner {
    pub(crate) fn new(info: ProducerInfo, session: Arc<SessionInner>) -> Arc<Self> {
        let window = (info.window_size > 0).then(|| ProducerWindow::new(i64::from(info.window_size)));
        Arc::new(Self {
            info,
            session,
            sequence: AtomicI64::new(0),
            window,
            defaults: Mutex::new(SendDefaults {
                priority: 4,
                persistent: true,
                time_to_live: Duration::ZERO,
            }),
            closed: AtomicBool::new(false),
        })
    }

    async fn send_internal(
        &self,
        destination: Option<&Destination>,
        message: OutboundMessage,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::illegal_state("producer is closed"));
        }
        let destination = match destination.or(self.info.destination.as_ref()) {
            Some(destination) => destination.clone(),
            None => {
                return Err(Error::illegal_state(
                    "anonymous producer requires an explicit destination",
                ))
            }
        };

        let connection = &self.session.connection;
        let config = &connection.config.connection;
        let defaults = {
            let defaults = self.defaults.lock();
            (defaults.priority, defaults.persistent, defaults.time_to_live)
        };

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let now = now_millis();
        let persistent = message.persistent.unwrap_or(defaults.1);
        let priority = message.priority.unwrap_or(defaults.0);
        let time_to_live = message.time_to_live.unwrap_or(defaults.2);
        let expiration =
            if time_to_live.is_zero() { 0 } else { now + time_to_live.as_millis() as i64 };

        let (content, compressed) =
            compress_body(message.content, config.use_compression, config.compression_level)?;

        let transaction_id = if self.session.mode.is_transacted() {
            let (id, begin) = self.session.transaction_begin();
            if let Some(begin) = begin {
                // BEGIN must reach the broker before the first send it
                // covers.
                connection.oneway(begin).await?;
            }
            Some(id)
        } else {
            None
        };
        let in_transaction = transaction_id.is_some();

        let body_size = content.len() as i64;
        let wire = WireMessage {
            message_id: MessageId::new(self.info.producer_id.clone(), sequence),
            producer_id: self.info.producer_id.clone(),
            destination,
            transaction_id,
            correlation_id: message.correlation_id,
            reply_to: message.reply_to,
            message_type: message.message_type,
            group_id: message.group_id,
            group_sequence: 0,
            persistent,
            compressed,
            priority,
            timestamp: now,
            expiration,
            redelivery_counter: 0,
            content,
            marshalled_properties: if message.properties.is_empty() {
                Bytes::new()
            } else {
                message.properties.marshal()
            },
            body_type: message.body_type,
        };

        let synchronous =
            config.always_sync_send || (persistent && !config.use_async_send && !in_transaction);
        if synchronous {
            connection.request(CommandKind::Message(wire)).await?;
        } else {
            if let Some(window) = &self.window {
                window.acquire(body_size).await;
            }
            connection.oneway(CommandKind::Message(wire)).await?;
        }
        Ok(())
    }

    pub(crate) fn on_producer_ack(&self, size: i32) {
        if let Some(window) = &self.window {
            window.credit(i64::from(size));
        }
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.session
            .connection
            .oneway(CommandKind::RemoveInfo(RemoveInfo {
                object_id: DataStructure::ProducerId(self.info.producer_id.clone()),
                last_delivered_sequence_id: 0,
            }))
            .await?;
        self.session.remove_producer(self.info.producer_id.value);
        Ok(())
    }
}

fn compress_body(content: Bytes, enabled: bool, level: u32) -> Result<(Bytes, bool)> {
    if !enabled || content.is_empty() {
        return Ok((content, false));
    }
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder
        .write_all(&content)
        .and_then(|_| encoder.finish())
        .map(|deflated| (Bytes::from(deflated), true))
        .map_err(|e| Error::io(format!("compressing message body: {e}")))
}

/// A message producer, optionally bound to a default destination.
#[derive(Clone)]
pub struct Producer {
    pub(crate) inner: Arc<ProducerInner>,
}

impl Producer {
    pub fn producer_id(&self) -> &ProducerId {
        &self.inner.info.producer_id
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.inner.info.destination.as_ref()
    }

    /// Send to the producer's default destination.
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.inner.send_internal(None, message).await
    }

    /// Send to an explicit destination (anonymous producer style).
    pub async fn send_to(
        &self,
        destination: &Destination,
        message: OutboundMessage,
    ) -> Result<()> {
        self.inner.send_internal(Some(destination), message).await
    }

    pub fn set_default_priority(&self, priority: u8) {
        self.inner.defaults.lock().priority = priority.min(9);
    }

    pub fn set_default_persistent(&self, persistent: bool) {
        self.inner.defaults.lock().persistent = persistent;
    }

    pub fn set_default_time_to_live(&self, time_to_live: Duration) {
        self.inner.defaults.lock().time_to_live = time_to_live;
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

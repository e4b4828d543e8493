// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing message values.
//!
//! [`ReceivedMessage`] wraps a wire message handed to a consumer. Its
//! property blob is parsed on first access and the outcome is cached:
//! a corrupt blob fails every access with the same i/o error and never
//! disturbs the receive path. [`OutboundMessage`] is the builder handed
//! to producers.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use openwire::command::{Message as WireMessage, MessageBodyType};
use openwire::destination::Destination;
use openwire::ids::MessageId;
use openwire::primitives::{PrimitiveMap, PrimitiveValue};

use crate::consumer::ConsumerInner;
use crate::error::{Error, Result};

pub(crate) fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

struct ReceivedInner {
    message: WireMessage,
    redelivery_counter: i32,
    consumer: Arc<ConsumerInner>,
    properties: OnceLock<std::result::Result<PrimitiveMap, String>>,
    property_failed: AtomicBool,
}

/// A message delivered to user code. Cheap to clone; acknowledgement
/// routes back to the owning consumer per the session's ack mode.
#[derive(Clone)]
pub struct ReceivedMessage {
    inner: Arc<ReceivedInner>,
}

impl ReceivedMessage {
    pub(crate) fn new(
        message: WireMessage,
        redelivery_counter: i32,
        consumer: Arc<ConsumerInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ReceivedInner {
                message,
                redelivery_counter,
                consumer,
                properties: OnceLock::new(),
                property_failed: AtomicBool::new(false),
            }),
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.inner.message.message_id
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.message.destination
    }

    pub fn reply_to(&self) -> Option<&Destination> {
        self.inner.message.reply_to.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.inner.message.correlation_id.as_deref()
    }

    pub fn message_type(&self) -> Option<&str> {
        self.inner.message.message_type.as_deref()
    }

    pub fn priority(&self) -> u8 {
        self.inner.message.priority
    }

    pub fn timestamp(&self) -> i64 {
        self.inner.message.timestamp
    }

    pub fn expiration(&self) -> i64 {
        self.inner.message.expiration
    }

    pub fn is_redelivered(&self) -> bool {
        self.inner.redelivery_counter > 0 || self.inner.message.redelivery_counter > 0
    }

    pub fn redelivery_counter(&self) -> i32 {
        self.inner.redelivery_counter.max(self.inner.message.redelivery_counter)
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.message.persistent
    }

    /// Raw body bytes, transparently inflated when the producer
    /// compressed them.
    pub fn body(&self) -> Result<Bytes> {
        let content = &self.inner.message.content;
        if !self.inner.message.compressed {
            return Ok(content.clone());
        }
        let mut decoder = flate2::read::ZlibDecoder::new(content.as_ref());
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| Error::io(format!("inflating message body: {e}")))?;
        Ok(Bytes::from(inflated))
    }

    /// Body as UTF-8 text; the natural accessor for text messages.
    pub fn text(&self) -> Result<String> {
        let body = self.body()?;
        String::from_utf8(body.to_vec()).map_err(|_| Error::io("message body is not valid UTF-8"))
    }

    /// Body as a primitive map; the natural accessor for map messages.
    pub fn map_body(&self) -> Result<PrimitiveMap> {
        let body = self.body()?;
        PrimitiveMap::unmarshal(&body).map_err(|e| Error::io(format!("map message body: {e}")))
    }

    pub fn body_type(&self) -> MessageBodyType {
        self.inner.message.body_type
    }

    /// Parsed user properties. The blob is parsed on the first call; a
    /// malformed blob fails here rather than in the receive path, and
    /// every later call fails with the same kind.
    pub fn properties(&self) -> Result<&PrimitiveMap> {
        let parsed = self.inner.properties.get_or_init(|| {
            if self.inner.message.marshalled_properties.is_empty() {
                return Ok(PrimitiveMap::new());
            }
            PrimitiveMap::unmarshal(&self.inner.message.marshalled_properties)
                .map_err(|e| e.to_string())
        });
        match parsed {
            Ok(map) => Ok(map),
            Err(detail) => {
                self.inner.property_failed.store(true, Ordering::Release);
                Err(Error::io(format!("message property blob is corrupt: {detail}")))
            }
        }
    }

    pub fn property(&self, name: &str) -> Result<Option<&PrimitiveValue>> {
        Ok(self.properties()?.get(name))
    }

    pub fn string_property(&self, name: &str) -> Result<Option<String>> {
        match self.properties()?.get(name) {
            Some(value) => Ok(Some(value.as_string()?)),
            None => Ok(None),
        }
    }

    pub fn i64_property(&self, name: &str) -> Result<Option<i64>> {
        match self.properties()?.get(name) {
            Some(value) => Ok(Some(value.as_i64()?)),
            None => Ok(None),
        }
    }

    pub fn bool_property(&self, name: &str) -> Result<Option<bool>> {
        match self.properties()?.get(name) {
            Some(value) => Ok(Some(value.as_bool()?)),
            None => Ok(None),
        }
    }

    /// Whether a property access has failed on this message; drives the
    /// consumer's rollback-and-redeliver path.
    pub(crate) fn property_access_failed(&self) -> bool {
        self.inner.property_failed.load(Ordering::Acquire)
    }

    /// Acknowledge per the owning session's mode: everything up to and
    /// including this message in CLIENT mode, exactly this message in
    /// INDIVIDUAL mode, a no-op otherwise.
    pub fn acknowledge(&self) -> Result<()> {
        self.inner.consumer.acknowledge_message(&self.inner.message.message_id)
    }

    pub(crate) fn has_expired(message: &WireMessage) -> bool {
        message.expiration > 0 && now_millis() > message.expiration
    }
}

/// Builder for an outgoing message.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub(crate) body_type: MessageBodyType,
    pub(crate) content: Bytes,
    pub(crate) properties: PrimitiveMap,
    pub(crate) priority: Option<u8>,
    pub(crate) time_to_live: Option<Duration>,
    pub(crate) persistent: Option<bool>,
    pub(crate) correlation_id: Option<String>,
    pub(crate) reply_to: Option<Destination>,
    pub(crate) message_type: Option<String>,
    pub(crate) group_id: Option<String>,
}

impl OutboundMessage {
    fn with_body(body_type: MessageBodyType, content: Bytes) -> Self {
        Self {
            body_type,
            content,
            properties: PrimitiveMap::new(),
            priority: None,
            time_to_live: None,
            persistent: None,
            correlation_id: None,
            reply_to: None,
            message_type: None,
            group_id: None,
        }
    }

    pub fn text(text: impl AsRef<str>) -> Self {
        Self::with_body(MessageBodyType::Text, Bytes::copy_from_slice(text.as_ref().as_bytes()))
    }

    pub fn bytes(content: impl Into<Bytes>) -> Self {
        Self::with_body(MessageBodyType::Bytes, content.into())
    }

    pub fn map(map: &PrimitiveMap) -> Self {
        Self::with_body(MessageBodyType::Map, map.marshal())
    }

    pub fn empty() -> Self {
        Self::with_body(MessageBodyType::Plain, Bytes::new())
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PrimitiveValue) -> Self {
        self.properties.put(name, value);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority.min(9));
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, destination: Destination) -> Self {
        self.reply_to = Some(destination);
        self
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity data structures: connection, session, consumer, producer,
//! message, broker and transaction ids.
//!
//! Ids are self-delimiting byte structures. Each one writes its own
//! data-structure type byte so a reader can validate what it is about to
//! parse; polymorphic slots (transaction ids, [`DataStructure`]) dispatch
//! on that byte.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::codec::{
    read_string, read_u8, read_zigzag, write_string, write_zigzag, Result,
};
use crate::destination::Destination;
use crate::error::WireError;

pub const TYPE_MESSAGE_ID: u8 = 110;
pub const TYPE_LOCAL_TRANSACTION_ID: u8 = 111;
pub const TYPE_XA_TRANSACTION_ID: u8 = 112;
pub const TYPE_CONNECTION_ID: u8 = 120;
pub const TYPE_SESSION_ID: u8 = 121;
pub const TYPE_CONSUMER_ID: u8 = 122;
pub const TYPE_PRODUCER_ID: u8 = 123;
pub const TYPE_BROKER_ID: u8 = 124;

/// Self-delimiting wire structure with a fixed data-structure type id.
pub trait WireStruct: Sized {
    const TYPE_ID: u8;

    fn write_body(&self, out: &mut BytesMut);
    fn read_body(buf: &mut Bytes) -> Result<Self>;

    fn write(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[Self::TYPE_ID]);
        self.write_body(out);
    }

    fn read(buf: &mut Bytes) -> Result<Self> {
        let tag = read_u8(buf, "data structure type")?;
        if tag != Self::TYPE_ID {
            return Err(WireError::corrupt(format!(
                "expected data structure type {}, found {tag}",
                Self::TYPE_ID
            )));
        }
        Self::read_body(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub value: String,
}

impl ConnectionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

impl WireStruct for ConnectionId {
    const TYPE_ID: u8 = TYPE_CONNECTION_ID;

    fn write_body(&self, out: &mut BytesMut) {
        write_string(out, &self.value);
    }

    fn read_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self { value: read_string(buf, "connection id")? })
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub connection_id: String,
    pub value: i64,
}

impl SessionId {
    pub fn new(connection_id: impl Into<String>, value: i64) -> Self {
        Self { connection_id: connection_id.into(), value }
    }
}

impl WireStruct for SessionId {
    const TYPE_ID: u8 = TYPE_SESSION_ID;

    fn write_body(&self, out: &mut BytesMut) {
        write_string(out, &self.connection_id);
        write_zigzag(out, self.value);
    }

    fn read_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            connection_id: read_string(buf, "session id")?,
            value: read_zigzag(buf, "session id")?,
        })
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection_id, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId {
    pub connection_id: String,
    pub session_id: i64,
    pub value: i64,
}

impl ConsumerId {
    pub fn new(connection_id: impl Into<String>, session_id: i64, value: i64) -> Self {
        Self { connection_id: connection_id.into(), session_id, value }
    }

    pub fn parent(&self) -> SessionId {
        SessionId::new(self.connection_id.clone(), self.session_id)
    }
}

impl WireStruct for ConsumerId {
    const TYPE_ID: u8 = TYPE_CONSUMER_ID;

    fn write_body(&self, out: &mut BytesMut) {
        write_string(out, &self.connection_id);
        write_zigzag(out, self.session_id);
        write_zigzag(out, self.value);
    }

    fn read_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            connection_id: read_string(buf, "consumer id")?,
            session_id: read_zigzag(buf, "consumer id")?,
            value: read_zigzag(buf, "consumer id")?,
        })
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.connection_id, self.session_id, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerId {
    pub connection_id: String,
    pub session_id: i64,
    pub value: i64,
}

impl ProducerId {
    pub fn new(connection_id: impl Into<String>, session_id: i64, value: i64) -> Self {
        Self { connection_id: connection_id.into(), session_id, value }
    }
}

impl WireStruct for ProducerId {
    const TYPE_ID: u8 = TYPE_PRODUCER_ID;

    fn write_body(&self, out: &mut BytesMut) {
        write_string(out, &self.connection_id);
        write_zigzag(out, self.session_id);
        write_zigzag(out, self.value);
    }

    fn read_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            connection_id: read_string(buf, "producer id")?,
            session_id: read_zigzag(buf, "producer id")?,
            value: read_zigzag(buf, "producer id")?,
        })
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.connection_id, self.session_id, self.value)
    }
}

/// Unique within a connection session: producer identity plus a
/// per-producer sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub producer_id: ProducerId,
    pub producer_sequence_id: i64,
}

impl MessageId {
    pub fn new(producer_id: ProducerId, producer_sequence_id: i64) -> Self {
        Self { producer_id, producer_sequence_id }
    }
}

impl WireStruct for MessageId {
    const TYPE_ID: u8 = TYPE_MESSAGE_ID;

    fn write_body(&self, out: &mut BytesMut) {
        self.producer_id.write(out);
        write_zigzag(out, self.producer_sequence_id);
    }

    fn read_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            producer_id: ProducerId::read(buf)?,
            producer_sequence_id: read_zigzag(buf, "message id")?,
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.producer_id, self.producer_sequence_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerId {
    pub value: String,
}

impl WireStruct for BrokerId {
    const TYPE_ID: u8 = TYPE_BROKER_ID;

    fn write_body(&self, out: &mut BytesMut) {
        write_string(out, &self.value);
    }

    fn read_body(buf: &mut Bytes) -> Result<Self> {
        Ok(Self { value: read_string(buf, "broker id")? })
    }
}

/// Local or XA transaction identity. XA ids are carried on the wire only;
/// the engine drives local transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionId {
    Local { connection_id: String, value: i64 },
    Xa { format_id: i32, global_transaction_id: Vec<u8>, branch_qualifier: Vec<u8> },
}

impl TransactionId {
    pub fn local(connection_id: impl Into<String>, value: i64) -> Self {
        Self::Local { connection_id: connection_id.into(), value }
    }

    pub fn write(&self, out: &mut BytesMut) {
        match self {
            Self::Local { connection_id, value } => {
                out.extend_from_slice(&[TYPE_LOCAL_TRANSACTION_ID]);
                write_string(out, connection_id);
                write_zigzag(out, *value);
            }
            Self::Xa { format_id, global_transaction_id, branch_qualifier } => {
                out.extend_from_slice(&[TYPE_XA_TRANSACTION_ID]);
                write_zigzag(out, i64::from(*format_id));
                crate::codec::write_blob(out, global_transaction_id);
                crate::codec::write_blob(out, branch_qualifier);
            }
        }
    }

    pub fn read(buf: &mut Bytes) -> Result<Self> {
        match read_u8(buf, "transaction id type")? {
            TYPE_LOCAL_TRANSACTION_ID => Ok(Self::Local {
                connection_id: read_string(buf, "local transaction id")?,
                value: read_zigzag(buf, "local transaction id")?,
            }),
            TYPE_XA_TRANSACTION_ID => Ok(Self::Xa {
                format_id: read_zigzag(buf, "xa transaction id")? as i32,
                global_transaction_id: crate::codec::read_blob(buf, "xa transaction id")?.to_vec(),
                branch_qualifier: crate::codec::read_blob(buf, "xa transaction id")?.to_vec(),
            }),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// Polymorphic nested structure slot, used by RemoveInfo and the data
/// response commands.
#[derive(Debug, Clone, PartialEq)]
pub enum DataStructure {
    ConnectionId(ConnectionId),
    SessionId(SessionId),
    ConsumerId(ConsumerId),
    ProducerId(ProducerId),
    MessageId(MessageId),
    BrokerId(BrokerId),
    TransactionId(TransactionId),
    Destination(Destination),
}

impl DataStructure {
    pub fn write(&self, out: &mut BytesMut) {
        match self {
            Self::ConnectionId(v) => v.write(out),
            Self::SessionId(v) => v.write(out),
            Self::ConsumerId(v) => v.write(out),
            Self::ProducerId(v) => v.write(out),
            Self::MessageId(v) => v.write(out),
            Self::BrokerId(v) => v.write(out),
            Self::TransactionId(v) => v.write(out),
            Self::Destination(v) => v.write(out),
        }
    }

    pub fn read(buf: &mut Bytes) -> Result<Self> {
        // Peek the type byte, then let the typed reader re-validate it.
        let Some(&tag) = buf.first() else {
            return Err(WireError::Truncated { context: "data structure", needed: 1 });
        };
        match tag {
            TYPE_CONNECTION_ID => Ok(Self::ConnectionId(ConnectionId::read(buf)?)),
            TYPE_SESSION_ID => Ok(Self::SessionId(SessionId::read(buf)?)),
            TYPE_CONSUMER_ID => Ok(Self::ConsumerId(ConsumerId::read(buf)?)),
            TYPE_PRODUCER_ID => Ok(Self::ProducerId(ProducerId::read(buf)?)),
            TYPE_MESSAGE_ID => Ok(Self::MessageId(MessageId::read(buf)?)),
            TYPE_BROKER_ID => Ok(Self::BrokerId(BrokerId::read(buf)?)),
            TYPE_LOCAL_TRANSACTION_ID | TYPE_XA_TRANSACTION_ID => {
                Ok(Self::TransactionId(TransactionId::read(buf)?))
            }
            tag if Destination::is_destination_type(tag) => {
                Ok(Self::Destination(Destination::read(buf)?))
            }
            other => Err(WireError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The OpenWire command model: a shared header plus a tagged union over
//! the closed set of data-structure type ids.
//!
//! Every payload is written once against the [`Encoder`] field API and
//! read back through the mirroring [`Decoder`]; the wire format decides
//! whether those calls produce the loose or the tight framing.

use bytes::Bytes;

use crate::codec::Result;
use crate::destination::Destination;
use crate::error::WireError;
use crate::ids::{
    BrokerId, ConnectionId, ConsumerId, DataStructure, MessageId, ProducerId, SessionId,
    TransactionId,
};
use crate::wireformat::{Decoder, Encoder};

pub const TYPE_WIREFORMAT_INFO: u8 = 1;
pub const TYPE_BROKER_INFO: u8 = 2;
pub const TYPE_CONNECTION_INFO: u8 = 3;
pub const TYPE_SESSION_INFO: u8 = 4;
pub const TYPE_CONSUMER_INFO: u8 = 5;
pub const TYPE_PRODUCER_INFO: u8 = 6;
pub const TYPE_TRANSACTION_INFO: u8 = 7;
pub const TYPE_DESTINATION_INFO: u8 = 8;
pub const TYPE_REMOVE_SUBSCRIPTION_INFO: u8 = 9;
pub const TYPE_KEEP_ALIVE_INFO: u8 = 10;
pub const TYPE_SHUTDOWN_INFO: u8 = 11;
pub const TYPE_REMOVE_INFO: u8 = 12;
pub const TYPE_CONTROL_COMMAND: u8 = 14;
pub const TYPE_FLUSH_COMMAND: u8 = 15;
pub const TYPE_CONNECTION_ERROR: u8 = 16;
pub const TYPE_CONSUMER_CONTROL: u8 = 17;
pub const TYPE_CONNECTION_CONTROL: u8 = 18;
pub const TYPE_PRODUCER_ACK: u8 = 19;
pub const TYPE_MESSAGE_PULL: u8 = 20;
pub const TYPE_MESSAGE_DISPATCH: u8 = 21;
pub const TYPE_MESSAGE_ACK: u8 = 22;
pub const TYPE_MESSAGE: u8 = 23;
pub const TYPE_BYTES_MESSAGE: u8 = 24;
pub const TYPE_MAP_MESSAGE: u8 = 25;
pub const TYPE_OBJECT_MESSAGE: u8 = 26;
pub const TYPE_STREAM_MESSAGE: u8 = 27;
pub const TYPE_TEXT_MESSAGE: u8 = 28;
pub const TYPE_BLOB_MESSAGE: u8 = 29;
pub const TYPE_RESPONSE: u8 = 30;
pub const TYPE_EXCEPTION_RESPONSE: u8 = 31;
pub const TYPE_DATA_RESPONSE: u8 = 32;
pub const TYPE_DATA_ARRAY_RESPONSE: u8 = 33;
pub const TYPE_INTEGER_RESPONSE: u8 = 34;
pub const TYPE_DISCOVERY_EVENT: u8 = 40;
pub const TYPE_JOURNAL_TOPIC_ACK: u8 = 50;
pub const TYPE_JOURNAL_QUEUE_ACK: u8 = 52;
pub const TYPE_JOURNAL_TRACE: u8 = 53;
pub const TYPE_JOURNAL_TRANSACTION: u8 = 54;
pub const TYPE_SUBSCRIPTION_INFO: u8 = 55;
pub const TYPE_PARTIAL_COMMAND: u8 = 60;
pub const TYPE_LAST_PARTIAL_COMMAND: u8 = 61;
pub const TYPE_REPLAY_COMMAND: u8 = 65;
pub const TYPE_MESSAGE_DISPATCH_NOTIFICATION: u8 = 90;
pub const TYPE_NETWORK_BRIDGE_FILTER: u8 = 91;

const WIREFORMAT_MAGIC: &[u8; 8] = b"ActiveMQ";

/// A framed protocol command: shared header plus kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub command_id: u32,
    pub response_required: bool,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self { command_id: 0, response_required: false, kind }
    }

    pub fn is_response(&self) -> bool {
        self.kind.is_response()
    }

    /// The command id this response correlates to, if it is a response.
    pub fn correlation_id(&self) -> Option<u32> {
        self.kind.correlation_id()
    }
}

/// MessageAck disposition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckType {
    Delivered = 0,
    Poison = 1,
    Standard = 2,
    Redelivered = 3,
    Individual = 4,
    Unmatched = 5,
    Expired = 6,
}

impl AckType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Delivered),
            1 => Ok(Self::Poison),
            2 => Ok(Self::Standard),
            3 => Ok(Self::Redelivered),
            4 => Ok(Self::Individual),
            5 => Ok(Self::Unmatched),
            6 => Ok(Self::Expired),
            other => Err(WireError::corrupt(format!("unknown ack type {other}"))),
        }
    }
}

/// Lifecycle phase carried by TransactionInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionPhase {
    Begin = 0,
    Prepare = 1,
    CommitOnePhase = 2,
    CommitTwoPhase = 3,
    Rollback = 4,
    Recover = 5,
    Forget = 6,
    End = 7,
}

impl TransactionPhase {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Begin),
            1 => Ok(Self::Prepare),
            2 => Ok(Self::CommitOnePhase),
            3 => Ok(Self::CommitTwoPhase),
            4 => Ok(Self::Rollback),
            5 => Ok(Self::Recover),
            6 => Ok(Self::Forget),
            7 => Ok(Self::End),
            other => Err(WireError::corrupt(format!("unknown transaction phase {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DestinationOperation {
    Add = 0,
    Remove = 1,
}

/// Body kind of a message; doubles as its wire type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageBodyType {
    Plain = TYPE_MESSAGE,
    Bytes = TYPE_BYTES_MESSAGE,
    Map = TYPE_MAP_MESSAGE,
    Object = TYPE_OBJECT_MESSAGE,
    Stream = TYPE_STREAM_MESSAGE,
    Text = TYPE_TEXT_MESSAGE,
    Blob = TYPE_BLOB_MESSAGE,
}

impl MessageBodyType {
    pub fn from_type_id(value: u8) -> Result<Self> {
        match value {
            TYPE_MESSAGE => Ok(Self::Plain),
            TYPE_BYTES_MESSAGE => Ok(Self::Bytes),
            TYPE_MAP_MESSAGE => Ok(Self::Map),
            TYPE_OBJECT_MESSAGE => Ok(Self::Object),
            TYPE_STREAM_MESSAGE => Ok(Self::Stream),
            TYPE_TEXT_MESSAGE => Ok(Self::Text),
            TYPE_BLOB_MESSAGE => Ok(Self::Blob),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// The local half of the wire-format negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFormatInfo {
    pub version: u32,
    pub cache_enabled: bool,
    pub cache_size: u32,
    pub tight_encoding_enabled: bool,
    pub size_prefix_disabled: bool,
    pub tcp_no_delay_enabled: bool,
    pub max_inactivity_duration: i64,
    pub max_inactivity_duration_initial_delay: i64,
}

impl WireFormatInfo {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.raw(WIREFORMAT_MAGIC);
        enc.u32(self.version);
        enc.flag(self.cache_enabled);
        enc.u32(self.cache_size);
        enc.flag(self.tight_encoding_enabled);
        enc.flag(self.size_prefix_disabled);
        enc.flag(self.tcp_no_delay_enabled);
        enc.zigzag(self.max_inactivity_duration);
        enc.zigzag(self.max_inactivity_duration_initial_delay);
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let magic = dec.raw(WIREFORMAT_MAGIC.len(), "wireformat magic")?;
        if magic.as_ref() != WIREFORMAT_MAGIC {
            return Err(WireError::corrupt("bad wireformat magic"));
        }
        Ok(Self {
            version: dec.u32("wireformat version")?,
            cache_enabled: dec.flag()?,
            cache_size: dec.u32("cache size")?,
            tight_encoding_enabled: dec.flag()?,
            size_prefix_disabled: dec.flag()?,
            tcp_no_delay_enabled: dec.flag()?,
            max_inactivity_duration: dec.zigzag("max inactivity")?,
            max_inactivity_duration_initial_delay: dec.zigzag("inactivity initial delay")?,
        })
    }
}

/// Broker-side fault detail carried by ExceptionResponse and
/// ConnectionError.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerFault {
    pub exception_class: String,
    pub message: String,
}

impl BrokerFault {
    pub fn new(exception_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self { exception_class: exception_class.into(), message: message.into() }
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.string(&self.exception_class);
        enc.string(&self.message);
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            exception_class: dec.string("exception class")?,
            message: dec.string("exception message")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub broker_id: BrokerId,
    pub broker_url: String,
    pub broker_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub client_id: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub fault_tolerant: bool,
    pub manageable: bool,
    pub client_master: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerInfo {
    pub consumer_id: ConsumerId,
    pub destination: Destination,
    pub prefetch_size: i32,
    pub dispatch_async: bool,
    pub selector: Option<String>,
    pub subscription_name: Option<String>,
    pub no_local: bool,
    pub exclusive: bool,
    pub retroactive: bool,
    pub browser: bool,
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub destination: Option<Destination>,
    pub dispatch_async: bool,
    pub window_size: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionInfo {
    pub connection_id: ConnectionId,
    pub transaction_id: TransactionId,
    pub phase: TransactionPhase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationInfo {
    pub connection_id: ConnectionId,
    pub destination: Destination,
    pub operation: DestinationOperation,
    pub timeout: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSubscriptionInfo {
    pub connection_id: ConnectionId,
    pub client_id: String,
    pub subscription_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveInfo {
    pub object_id: DataStructure,
    pub last_delivered_sequence_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionError {
    pub connection_id: Option<ConnectionId>,
    pub exception: Option<BrokerFault>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerControl {
    pub destination: Option<Destination>,
    pub consumer_id: ConsumerId,
    pub close: bool,
    pub flush: bool,
    pub start: bool,
    pub stop: bool,
    pub prefetch: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionControl {
    pub close: bool,
    pub exit: bool,
    pub fault_tolerant: bool,
    pub resume: bool,
    pub suspend: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerAck {
    pub producer_id: ProducerId,
    pub size: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePull {
    pub consumer_id: ConsumerId,
    pub destination: Destination,
    pub timeout: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDispatch {
    pub consumer_id: ConsumerId,
    pub destination: Destination,
    pub message: Option<Message>,
    pub redelivery_counter: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageAck {
    pub ack_type: AckType,
    pub consumer_id: ConsumerId,
    pub destination: Destination,
    pub transaction_id: Option<TransactionId>,
    pub first_message_id: Option<MessageId>,
    pub last_message_id: Option<MessageId>,
    pub message_count: i32,
    pub poison_cause: Option<String>,
    /// Qualifies the consumer id for durable topic subscriptions.
    pub subscription_name: Option<String>,
}

/// A message as carried on the wire. The body and the property map are
/// opaque blobs at this layer; the client parses properties lazily and
/// interprets the body per [`MessageBodyType`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: MessageId,
    pub producer_id: ProducerId,
    pub destination: Destination,
    pub transaction_id: Option<TransactionId>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<Destination>,
    pub message_type: Option<String>,
    pub group_id: Option<String>,
    pub group_sequence: i32,
    pub persistent: bool,
    pub compressed: bool,
    pub priority: u8,
    pub timestamp: i64,
    /// Absolute expiry in epoch milliseconds; 0 never expires.
    pub expiration: i64,
    pub redelivery_counter: i32,
    pub content: Bytes,
    pub marshalled_properties: Bytes,
    pub body_type: MessageBodyType,
}

impl Message {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.structure(&self.message_id);
        enc.cached_producer_id(&self.producer_id);
        enc.cached_destination(&self.destination);
        enc.opt_structure(self.transaction_id.as_ref());
        enc.opt_string(self.correlation_id.as_deref());
        enc.opt_structure(self.reply_to.as_ref());
        enc.opt_string(self.message_type.as_deref());
        enc.opt_string(self.group_id.as_deref());
        enc.zigzag(i64::from(self.group_sequence));
        enc.flag(self.persistent);
        enc.flag(self.compressed);
        enc.u8(self.priority);
        enc.zigzag(self.timestamp);
        enc.zigzag(self.expiration);
        enc.zigzag(i64::from(self.redelivery_counter));
        enc.blob(&self.content);
        enc.blob(&self.marshalled_properties);
    }

    fn decode(dec: &mut Decoder<'_>, body_type: MessageBodyType) -> Result<Self> {
        Ok(Self {
            message_id: dec.structure()?,
            producer_id: dec.cached_producer_id()?,
            destination: dec.cached_destination()?,
            transaction_id: dec.opt_structure()?,
            correlation_id: dec.opt_string("correlation id")?,
            reply_to: dec.opt_structure()?,
            message_type: dec.opt_string("message type")?,
            group_id: dec.opt_string("group id")?,
            group_sequence: dec.zigzag("group sequence")? as i32,
            persistent: dec.flag()?,
            compressed: dec.flag()?,
            priority: dec.u8("priority")?,
            timestamp: dec.zigzag("timestamp")?,
            expiration: dec.zigzag("expiration")?,
            redelivery_counter: dec.zigzag("redelivery counter")? as i32,
            content: dec.bytes("message content")?,
            marshalled_properties: dec.bytes("message properties")?,
            body_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataResponse {
    pub correlation_id: u32,
    pub data: Option<DataStructure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataArrayResponse {
    pub correlation_id: u32,
    pub data: Vec<DataStructure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub service_name: String,
    pub broker_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalTopicAck {
    pub destination: Destination,
    pub message_id: MessageId,
    pub message_sequence_id: i64,
    pub subscription_name: String,
    pub client_id: String,
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalQueueAck {
    pub destination: Destination,
    pub message_ack: Option<Box<MessageAck>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalTransaction {
    pub transaction_id: TransactionId,
    pub phase: TransactionPhase,
    pub was_prepared: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub client_id: String,
    pub destination: Destination,
    pub selector: Option<String>,
    pub subscription_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCommand {
    pub command_id: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDispatchNotification {
    pub consumer_id: ConsumerId,
    pub destination: Destination,
    pub delivery_sequence_id: i64,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkBridgeFilter {
    pub network_ttl: i32,
    pub network_broker_id: BrokerId,
}

/// Tagged union over every command the protocol can frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    WireFormatInfo(WireFormatInfo),
    BrokerInfo(BrokerInfo),
    ConnectionInfo(ConnectionInfo),
    SessionInfo(SessionInfo),
    ConsumerInfo(ConsumerInfo),
    ProducerInfo(ProducerInfo),
    TransactionInfo(TransactionInfo),
    DestinationInfo(DestinationInfo),
    RemoveSubscriptionInfo(RemoveSubscriptionInfo),
    KeepAliveInfo,
    ShutdownInfo,
    RemoveInfo(RemoveInfo),
    ControlCommand(ControlCommand),
    FlushCommand,
    ConnectionError(ConnectionError),
    ConsumerControl(ConsumerControl),
    ConnectionControl(ConnectionControl),
    ProducerAck(ProducerAck),
    MessagePull(MessagePull),
    MessageDispatch(MessageDispatch),
    MessageAck(MessageAck),
    Message(Message),
    Response { correlation_id: u32 },
    ExceptionResponse { correlation_id: u32, exception: BrokerFault },
    DataResponse(DataResponse),
    DataArrayResponse(DataArrayResponse),
    IntegerResponse { correlation_id: u32, result: i32 },
    DiscoveryEvent(DiscoveryEvent),
    JournalTopicAck(JournalTopicAck),
    JournalQueueAck(JournalQueueAck),
    JournalTrace { message: String },
    JournalTransaction(JournalTransaction),
    SubscriptionInfo(SubscriptionInfo),
    PartialCommand(PartialCommand),
    LastPartialCommand { command_id: u32 },
    ReplayCommand { first_nak_number: i32, last_nak_number: i32 },
    MessageDispatchNotification(MessageDispatchNotification),
    NetworkBridgeFilter(NetworkBridgeFilter),
}

impl CommandKind {
    pub fn type_id(&self) -> u8 {
        match self {
            Self::WireFormatInfo(_) => TYPE_WIREFORMAT_INFO,
            Self::BrokerInfo(_) => TYPE_BROKER_INFO,
            Self::ConnectionInfo(_) => TYPE_CONNECTION_INFO,
            Self::SessionInfo(_) => TYPE_SESSION_INFO,
            Self::ConsumerInfo(_) => TYPE_CONSUMER_INFO,
            Self::ProducerInfo(_) => TYPE_PRODUCER_INFO,
            Self::TransactionInfo(_) => TYPE_TRANSACTION_INFO,
            Self::DestinationInfo(_) => TYPE_DESTINATION_INFO,
            Self::RemoveSubscriptionInfo(_) => TYPE_REMOVE_SUBSCRIPTION_INFO,
            Self::KeepAliveInfo => TYPE_KEEP_ALIVE_INFO,
            Self::ShutdownInfo => TYPE_SHUTDOWN_INFO,
            Self::RemoveInfo(_) => TYPE_REMOVE_INFO,
            Self::ControlCommand(_) => TYPE_CONTROL_COMMAND,
            Self::FlushCommand => TYPE_FLUSH_COMMAND,
            Self::ConnectionError(_) => TYPE_CONNECTION_ERROR,
            Self::ConsumerControl(_) => TYPE_CONSUMER_CONTROL,
            Self::ConnectionControl(_) => TYPE_CONNECTION_CONTROL,
            Self::ProducerAck(_) => TYPE_PRODUCER_ACK,
            Self::MessagePull(_) => TYPE_MESSAGE_PULL,
            Self::MessageDispatch(_) => TYPE_MESSAGE_DISPATCH,
            Self::MessageAck(_) => TYPE_MESSAGE_ACK,
            Self::Message(m) => m.body_type as u8,
            Self::Response { .. } => TYPE_RESPONSE,
            Self::ExceptionResponse { .. } => TYPE_EXCEPTION_RESPONSE,
            Self::DataResponse(_) => TYPE_DATA_RESPONSE,
            Self::DataArrayResponse(_) => TYPE_DATA_ARRAY_RESPONSE,
            Self::IntegerResponse { .. } => TYPE_INTEGER_RESPONSE,
            Self::DiscoveryEvent(_) => TYPE_DISCOVERY_EVENT,
            Self::JournalTopicAck(_) => TYPE_JOURNAL_TOPIC_ACK,
            Self::JournalQueueAck(_) => TYPE_JOURNAL_QUEUE_ACK,
            Self::JournalTrace { .. } => TYPE_JOURNAL_TRACE,
            Self::JournalTransaction(_) => TYPE_JOURNAL_TRANSACTION,
            Self::SubscriptionInfo(_) => TYPE_SUBSCRIPTION_INFO,
            Self::PartialCommand(_) => TYPE_PARTIAL_COMMAND,
            Self::LastPartialCommand { .. } => TYPE_LAST_PARTIAL_COMMAND,
            Self::ReplayCommand { .. } => TYPE_REPLAY_COMMAND,
            Self::MessageDispatchNotification(_) => TYPE_MESSAGE_DISPATCH_NOTIFICATION,
            Self::NetworkBridgeFilter(_) => TYPE_NETWORK_BRIDGE_FILTER,
        }
    }

    /// Wire-level name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WireFormatInfo(_) => "WireFormatInfo",
            Self::BrokerInfo(_) => "BrokerInfo",
            Self::ConnectionInfo(_) => "ConnectionInfo",
            Self::SessionInfo(_) => "SessionInfo",
            Self::ConsumerInfo(_) => "ConsumerInfo",
            Self::ProducerInfo(_) => "ProducerInfo",
            Self::TransactionInfo(_) => "TransactionInfo",
            Self::DestinationInfo(_) => "DestinationInfo",
            Self::RemoveSubscriptionInfo(_) => "RemoveSubscriptionInfo",
            Self::KeepAliveInfo => "KeepAliveInfo",
            Self::ShutdownInfo => "ShutdownInfo",
            Self::RemoveInfo(_) => "RemoveInfo",
            Self::ControlCommand(_) => "ControlCommand",
            Self::FlushCommand => "FlushCommand",
            Self::ConnectionError(_) => "ConnectionError",
            Self::ConsumerControl(_) => "ConsumerControl",
            Self::ConnectionControl(_) => "ConnectionControl",
            Self::ProducerAck(_) => "ProducerAck",
            Self::MessagePull(_) => "MessagePull",
            Self::MessageDispatch(_) => "MessageDispatch",
            Self::MessageAck(_) => "MessageAck",
            Self::Message(_) => "Message",
            Self::Response { .. } => "Response",
            Self::ExceptionResponse { .. } => "ExceptionResponse",
            Self::DataResponse(_) => "DataResponse",
            Self::DataArrayResponse(_) => "DataArrayResponse",
            Self::IntegerResponse { .. } => "IntegerResponse",
            Self::DiscoveryEvent(_) => "DiscoveryEvent",
            Self::JournalTopicAck(_) => "JournalTopicAck",
            Self::JournalQueueAck(_) => "JournalQueueAck",
            Self::JournalTrace { .. } => "JournalTrace",
            Self::JournalTransaction(_) => "JournalTransaction",
            Self::SubscriptionInfo(_) => "SubscriptionInfo",
            Self::PartialCommand(_) => "PartialCommand",
            Self::LastPartialCommand { .. } => "LastPartialCommand",
            Self::ReplayCommand { .. } => "ReplayCommand",
            Self::MessageDispatchNotification(_) => "MessageDispatchNotification",
            Self::NetworkBridgeFilter(_) => "NetworkBridgeFilter",
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::Response { .. }
                | Self::ExceptionResponse { .. }
                | Self::DataResponse(_)
                | Self::DataArrayResponse(_)
                | Self::IntegerResponse { .. }
        )
    }

    pub fn correlation_id(&self) -> Option<u32> {
        match self {
            Self::Response { correlation_id }
            | Self::ExceptionResponse { correlation_id, .. }
            | Self::IntegerResponse { correlation_id, .. } => Some(*correlation_id),
            Self::DataResponse(r) => Some(r.correlation_id),
            Self::DataArrayResponse(r) => Some(r.correlation_id),
            _ => None,
        }
    }

    /// WireFormatInfo must be readable before negotiation, so it never
    /// uses the tight framing or the cache.
    pub fn force_loose(&self) -> bool {
        matches!(self, Self::WireFormatInfo(_))
    }

    pub fn encode(&self, enc: &mut Encoder<'_>) {
        match self {
            Self::WireFormatInfo(v) => v.encode(enc),
            Self::BrokerInfo(v) => {
                enc.structure(&v.broker_id);
                enc.string(&v.broker_url);
                enc.string(&v.broker_name);
            }
            Self::ConnectionInfo(v) => {
                enc.structure(&v.connection_id);
                enc.string(&v.client_id);
                enc.opt_string(v.user_name.as_deref());
                enc.opt_string(v.password.as_deref());
                enc.flag(v.fault_tolerant);
                enc.flag(v.manageable);
                enc.flag(v.client_master);
            }
            Self::SessionInfo(v) => enc.structure(&v.session_id),
            Self::ConsumerInfo(v) => {
                enc.structure(&v.consumer_id);
                enc.cached_destination(&v.destination);
                enc.zigzag(i64::from(v.prefetch_size));
                enc.flag(v.dispatch_async);
                enc.opt_string(v.selector.as_deref());
                enc.opt_string(v.subscription_name.as_deref());
                enc.flag(v.no_local);
                enc.flag(v.exclusive);
                enc.flag(v.retroactive);
                enc.flag(v.browser);
                enc.u8(v.priority);
            }
            Self::ProducerInfo(v) => {
                enc.structure(&v.producer_id);
                enc.opt_cached_destination(v.destination.as_ref());
                enc.flag(v.dispatch_async);
                enc.zigzag(i64::from(v.window_size));
            }
            Self::TransactionInfo(v) => {
                enc.structure(&v.connection_id);
                enc.structure(&v.transaction_id);
                enc.u8(v.phase as u8);
            }
            Self::DestinationInfo(v) => {
                enc.structure(&v.connection_id);
                enc.structure(&v.destination);
                enc.u8(v.operation as u8);
                enc.zigzag(v.timeout);
            }
            Self::RemoveSubscriptionInfo(v) => {
                enc.structure(&v.connection_id);
                enc.string(&v.client_id);
                enc.string(&v.subscription_name);
            }
            Self::KeepAliveInfo | Self::ShutdownInfo | Self::FlushCommand => {}
            Self::RemoveInfo(v) => {
                enc.structure(&v.object_id);
                enc.zigzag(v.last_delivered_sequence_id);
            }
            Self::ControlCommand(v) => enc.string(&v.command),
            Self::ConnectionError(v) => {
                enc.opt_structure(v.connection_id.as_ref());
                enc.flag(v.exception.is_some());
                if let Some(fault) = &v.exception {
                    fault.encode(enc);
                }
            }
            Self::ConsumerControl(v) => {
                enc.opt_structure(v.destination.as_ref());
                enc.structure(&v.consumer_id);
                enc.flag(v.close);
                enc.flag(v.flush);
                enc.flag(v.start);
                enc.flag(v.stop);
                enc.zigzag(i64::from(v.prefetch));
            }
            Self::ConnectionControl(v) => {
                enc.flag(v.close);
                enc.flag(v.exit);
                enc.flag(v.fault_tolerant);
                enc.flag(v.resume);
                enc.flag(v.suspend);
            }
            Self::ProducerAck(v) => {
                enc.structure(&v.producer_id);
                enc.zigzag(i64::from(v.size));
            }
            Self::MessagePull(v) => {
                enc.structure(&v.consumer_id);
                enc.cached_destination(&v.destination);
                enc.zigzag(v.timeout);
            }
            Self::MessageDispatch(v) => {
                enc.structure(&v.consumer_id);
                enc.cached_destination(&v.destination);
                enc.flag(v.message.is_some());
                if let Some(message) = &v.message {
                    enc.u8(message.body_type as u8);
                    message.encode(enc);
                }
                enc.zigzag(i64::from(v.redelivery_counter));
            }
            Self::MessageAck(v) => encode_message_ack(v, enc),
            Self::Message(v) => v.encode(enc),
            Self::Response { correlation_id } => enc.u32(*correlation_id),
            Self::ExceptionResponse { correlation_id, exception } => {
                enc.u32(*correlation_id);
                exception.encode(enc);
            }
            Self::DataResponse(v) => {
                enc.u32(v.correlation_id);
                enc.opt_structure(v.data.as_ref());
            }
            Self::DataArrayResponse(v) => {
                enc.u32(v.correlation_id);
                enc.structures(&v.data);
            }
            Self::IntegerResponse { correlation_id, result } => {
                enc.u32(*correlation_id);
                enc.zigzag(i64::from(*result));
            }
            Self::DiscoveryEvent(v) => {
                enc.string(&v.service_name);
                enc.string(&v.broker_name);
            }
            Self::JournalTopicAck(v) => {
                enc.structure(&v.destination);
                enc.structure(&v.message_id);
                enc.zigzag(v.message_sequence_id);
                enc.string(&v.subscription_name);
                enc.string(&v.client_id);
                enc.opt_structure(v.transaction_id.as_ref());
            }
            Self::JournalQueueAck(v) => {
                enc.structure(&v.destination);
                enc.flag(v.message_ack.is_some());
                if let Some(ack) = &v.message_ack {
                    encode_message_ack(ack, enc);
                }
            }
            Self::JournalTrace { message } => enc.string(message),
            Self::JournalTransaction(v) => {
                enc.structure(&v.transaction_id);
                enc.u8(v.phase as u8);
                enc.flag(v.was_prepared);
            }
            Self::SubscriptionInfo(v) => {
                enc.string(&v.client_id);
                enc.structure(&v.destination);
                enc.opt_string(v.selector.as_deref());
                enc.string(&v.subscription_name);
            }
            Self::PartialCommand(v) => {
                enc.u32(v.command_id);
                enc.blob(&v.data);
            }
            Self::LastPartialCommand { command_id } => enc.u32(*command_id),
            Self::ReplayCommand { first_nak_number, last_nak_number } => {
                enc.zigzag(i64::from(*first_nak_number));
                enc.zigzag(i64::from(*last_nak_number));
            }
            Self::MessageDispatchNotification(v) => {
                enc.structure(&v.consumer_id);
                enc.cached_destination(&v.destination);
                enc.zigzag(v.delivery_sequence_id);
                enc.structure(&v.message_id);
            }
            Self::NetworkBridgeFilter(v) => {
                enc.zigzag(i64::from(v.network_ttl));
                enc.structure(&v.network_broker_id);
            }
        }
    }

    pub fn decode(type_id: u8, dec: &mut Decoder<'_>) -> Result<Self> {
        match type_id {
            TYPE_WIREFORMAT_INFO => Ok(Self::WireFormatInfo(WireFormatInfo::decode(dec)?)),
            TYPE_BROKER_INFO => Ok(Self::BrokerInfo(BrokerInfo {
                broker_id: dec.structure()?,
                broker_url: dec.string("broker url")?,
                broker_name: dec.string("broker name")?,
            })),
            TYPE_CONNECTION_INFO => Ok(Self::ConnectionInfo(ConnectionInfo {
                connection_id: dec.structure()?,
                client_id: dec.string("client id")?,
                user_name: dec.opt_string("user name")?,
                password: dec.opt_string("password")?,
                fault_tolerant: dec.flag()?,
                manageable: dec.flag()?,
                client_master: dec.flag()?,
            })),
            TYPE_SESSION_INFO => Ok(Self::SessionInfo(SessionInfo { session_id: dec.structure()? })),
            TYPE_CONSUMER_INFO => Ok(Self::ConsumerInfo(ConsumerInfo {
                consumer_id: dec.structure()?,
                destination: dec.cached_destination()?,
                prefetch_size: dec.zigzag("prefetch size")? as i32,
                dispatch_async: dec.flag()?,
                selector: dec.opt_string("selector")?,
                subscription_name: dec.opt_string("subscription name")?,
                no_local: dec.flag()?,
                exclusive: dec.flag()?,
                retroactive: dec.flag()?,
                browser: dec.flag()?,
                priority: dec.u8("consumer priority")?,
            })),
            TYPE_PRODUCER_INFO => Ok(Self::ProducerInfo(ProducerInfo {
                producer_id: dec.structure()?,
                destination: dec.opt_cached_destination()?,
                dispatch_async: dec.flag()?,
                window_size: dec.zigzag("window size")? as i32,
            })),
            TYPE_TRANSACTION_INFO => Ok(Self::TransactionInfo(TransactionInfo {
                connection_id: dec.structure()?,
                transaction_id: dec.structure()?,
                phase: TransactionPhase::from_u8(dec.u8("transaction phase")?)?,
            })),
            TYPE_DESTINATION_INFO => Ok(Self::DestinationInfo(DestinationInfo {
                connection_id: dec.structure()?,
                destination: dec.structure()?,
                operation: match dec.u8("destination operation")? {
                    0 => DestinationOperation::Add,
                    1 => DestinationOperation::Remove,
                    other => {
                        return Err(WireError::corrupt(format!(
                            "unknown destination operation {other}"
                        )))
                    }
                },
                timeout: dec.zigzag("destination timeout")?,
            })),
            TYPE_REMOVE_SUBSCRIPTION_INFO => {
                Ok(Self::RemoveSubscriptionInfo(RemoveSubscriptionInfo {
                    connection_id: dec.structure()?,
                    client_id: dec.string("client id")?,
                    subscription_name: dec.string("subscription name")?,
                }))
            }
            TYPE_KEEP_ALIVE_INFO => Ok(Self::KeepAliveInfo),
            TYPE_SHUTDOWN_INFO => Ok(Self::ShutdownInfo),
            TYPE_REMOVE_INFO => Ok(Self::RemoveInfo(RemoveInfo {
                object_id: dec.structure()?,
                last_delivered_sequence_id: dec.zigzag("last delivered sequence")?,
            })),
            TYPE_CONTROL_COMMAND => {
                Ok(Self::ControlCommand(ControlCommand { command: dec.string("control command")? }))
            }
            TYPE_FLUSH_COMMAND => Ok(Self::FlushCommand),
            TYPE_CONNECTION_ERROR => Ok(Self::ConnectionError(ConnectionError {
                connection_id: dec.opt_structure()?,
                exception: if dec.flag()? { Some(BrokerFault::decode(dec)?) } else { None },
            })),
            TYPE_CONSUMER_CONTROL => Ok(Self::ConsumerControl(ConsumerControl {
                destination: dec.opt_structure()?,
                consumer_id: dec.structure()?,
                close: dec.flag()?,
                flush: dec.flag()?,
                start: dec.flag()?,
                stop: dec.flag()?,
                prefetch: dec.zigzag("consumer prefetch")? as i32,
            })),
            TYPE_CONNECTION_CONTROL => Ok(Self::ConnectionControl(ConnectionControl {
                close: dec.flag()?,
                exit: dec.flag()?,
                fault_tolerant: dec.flag()?,
                resume: dec.flag()?,
                suspend: dec.flag()?,
            })),
            TYPE_PRODUCER_ACK => Ok(Self::ProducerAck(ProducerAck {
                producer_id: dec.structure()?,
                size: dec.zigzag("producer ack size")? as i32,
            })),
            TYPE_MESSAGE_PULL => Ok(Self::MessagePull(MessagePull {
                consumer_id: dec.structure()?,
                destination: dec.cached_destination()?,
                timeout: dec.zigzag("pull timeout")?,
            })),
            TYPE_MESSAGE_DISPATCH => Ok(Self::MessageDispatch(MessageDispatch {
                consumer_id: dec.structure()?,
                destination: dec.cached_destination()?,
                message: {
                    if dec.flag()? {
                        let body_type = MessageBodyType::from_type_id(dec.u8("message body type")?)?;
                        Some(Message::decode(dec, body_type)?)
                    } else {
                        None
                    }
                },
                redelivery_counter: dec.zigzag("redelivery counter")? as i32,
            })),
            TYPE_MESSAGE_ACK => Ok(Self::MessageAck(decode_message_ack(dec)?)),
            TYPE_MESSAGE | TYPE_BYTES_MESSAGE | TYPE_MAP_MESSAGE | TYPE_OBJECT_MESSAGE
            | TYPE_STREAM_MESSAGE | TYPE_TEXT_MESSAGE | TYPE_BLOB_MESSAGE => Ok(Self::Message(
                Message::decode(dec, MessageBodyType::from_type_id(type_id)?)?,
            )),
            TYPE_RESPONSE => Ok(Self::Response { correlation_id: dec.u32("correlation id")? }),
            TYPE_EXCEPTION_RESPONSE => Ok(Self::ExceptionResponse {
                correlation_id: dec.u32("correlation id")?,
                exception: BrokerFault::decode(dec)?,
            }),
            TYPE_DATA_RESPONSE => Ok(Self::DataResponse(DataResponse {
                correlation_id: dec.u32("correlation id")?,
                data: dec.opt_structure()?,
            })),
            TYPE_DATA_ARRAY_RESPONSE => Ok(Self::DataArrayResponse(DataArrayResponse {
                correlation_id: dec.u32("correlation id")?,
                data: dec.structures("data array")?,
            })),
            TYPE_INTEGER_RESPONSE => Ok(Self::IntegerResponse {
                correlation_id: dec.u32("correlation id")?,
                result: dec.zigzag("integer result")? as i32,
            }),
            TYPE_DISCOVERY_EVENT => Ok(Self::DiscoveryEvent(DiscoveryEvent {
                service_name: dec.string("service name")?,
                broker_name: dec.string("broker name")?,
            })),
            TYPE_JOURNAL_TOPIC_ACK => Ok(Self::JournalTopicAck(JournalTopicAck {
                destination: dec.structure()?,
                message_id: dec.structure()?,
                message_sequence_id: dec.zigzag("journal sequence")?,
                subscription_name: dec.string("subscription name")?,
                client_id: dec.string("client id")?,
                transaction_id: dec.opt_structure()?,
            })),
            TYPE_JOURNAL_QUEUE_ACK => Ok(Self::JournalQueueAck(JournalQueueAck {
                destination: dec.structure()?,
                message_ack: if dec.flag()? {
                    Some(Box::new(decode_message_ack(dec)?))
                } else {
                    None
                },
            })),
            TYPE_JOURNAL_TRACE => {
                Ok(Self::JournalTrace { message: dec.string("journal trace")? })
            }
            TYPE_JOURNAL_TRANSACTION => Ok(Self::JournalTransaction(JournalTransaction {
                transaction_id: dec.structure()?,
                phase: TransactionPhase::from_u8(dec.u8("transaction phase")?)?,
                was_prepared: dec.flag()?,
            })),
            TYPE_SUBSCRIPTION_INFO => Ok(Self::SubscriptionInfo(SubscriptionInfo {
                client_id: dec.string("client id")?,
                destination: dec.structure()?,
                selector: dec.opt_string("selector")?,
                subscription_name: dec.string("subscription name")?,
            })),
            TYPE_PARTIAL_COMMAND => Ok(Self::PartialCommand(PartialCommand {
                command_id: dec.u32("partial command id")?,
                data: dec.bytes("partial data")?,
            })),
            TYPE_LAST_PARTIAL_COMMAND => {
                Ok(Self::LastPartialCommand { command_id: dec.u32("partial command id")? })
            }
            TYPE_REPLAY_COMMAND => Ok(Self::ReplayCommand {
                first_nak_number: dec.zigzag("first nak")? as i32,
                last_nak_number: dec.zigzag("last nak")? as i32,
            }),
            TYPE_MESSAGE_DISPATCH_NOTIFICATION => {
                Ok(Self::MessageDispatchNotification(MessageDispatchNotification {
                    consumer_id: dec.structure()?,
                    destination: dec.cached_destination()?,
                    delivery_sequence_id: dec.zigzag("delivery sequence")?,
                    message_id: dec.structure()?,
                }))
            }
            TYPE_NETWORK_BRIDGE_FILTER => Ok(Self::NetworkBridgeFilter(NetworkBridgeFilter {
                network_ttl: dec.zigzag("network ttl")? as i32,
                network_broker_id: dec.structure()?,
            })),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

fn encode_message_ack(v: &MessageAck, enc: &mut Encoder<'_>) {
    enc.u8(v.ack_type as u8);
    enc.structure(&v.consumer_id);
    enc.cached_destination(&v.destination);
    enc.opt_structure(v.transaction_id.as_ref());
    enc.opt_structure(v.first_message_id.as_ref());
    enc.opt_structure(v.last_message_id.as_ref());
    enc.zigzag(i64::from(v.message_count));
    enc.opt_string(v.poison_cause.as_deref());
    enc.opt_string(v.subscription_name.as_deref());
}

fn decode_message_ack(dec: &mut Decoder<'_>) -> Result<MessageAck> {
    Ok(MessageAck {
        ack_type: AckType::from_u8(dec.u8("ack type")?)?,
        consumer_id: dec.structure()?,
        destination: dec.cached_destination()?,
        transaction_id: dec.opt_structure()?,
        first_message_id: dec.opt_structure()?,
        last_message_id: dec.opt_structure()?,
        message_count: dec.zigzag("ack message count")? as i32,
        poison_cause: dec.opt_string("poison cause")?,
        subscription_name: dec.opt_string("ack subscription name")?,
    })
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::{Bytes, BytesMut};

use super::*;
use crate::primitives::{PrimitiveMap, PrimitiveValue};
use crate::wireformat::OpenWireFormat;

fn round_trip_both_framings(command: Command) {
    let mut loose = OpenWireFormat::default();
    let mut buf = BytesMut::new();
    loose.marshal(&command, &mut buf).unwrap();
    let mut loose_reader = OpenWireFormat::default();
    assert_eq!(loose_reader.unmarshal(&mut buf).unwrap().unwrap(), command, "loose framing");

    let mut a = OpenWireFormat::default();
    let mut b = OpenWireFormat::default();
    let info_a = a.preferred_wireformat_info();
    let info_b = b.preferred_wireformat_info();
    a.renegotiate(&info_b);
    b.renegotiate(&info_a);
    let mut buf = BytesMut::new();
    a.marshal(&command, &mut buf).unwrap();
    assert_eq!(b.unmarshal(&mut buf).unwrap().unwrap(), command, "tight framing");
}

fn sample_message(body_type: MessageBodyType) -> Message {
    let mut props = PrimitiveMap::new();
    props.put("region", PrimitiveValue::String("emea".into()));
    props.put("attempt", PrimitiveValue::Int(2));
    Message {
        message_id: MessageId::new(ProducerId::new("ID:client-1", 1, 2), 17),
        producer_id: ProducerId::new("ID:client-1", 1, 2),
        destination: Destination::queue("orders"),
        transaction_id: Some(TransactionId::local("ID:client-1", 4)),
        correlation_id: Some("corr-9".into()),
        reply_to: Some(Destination::TempQueue("ID:client-1:1".into())),
        message_type: None,
        group_id: Some("batch-1".into()),
        group_sequence: 3,
        persistent: true,
        compressed: false,
        priority: 6,
        timestamp: 1_700_000_000_000,
        expiration: 0,
        redelivery_counter: 1,
        content: Bytes::from_static(b"Hello"),
        marshalled_properties: props.marshal(),
        body_type,
    }
}

#[test]
fn connection_lifecycle_commands_round_trip() {
    round_trip_both_framings(Command {
        command_id: 1,
        response_required: true,
        kind: CommandKind::ConnectionInfo(ConnectionInfo {
            connection_id: ConnectionId::new("ID:host-1234-1"),
            client_id: "client-7".into(),
            user_name: Some("user".into()),
            password: None,
            fault_tolerant: true,
            manageable: false,
            client_master: true,
        }),
    });
    round_trip_both_framings(Command {
        command_id: 2,
        response_required: true,
        kind: CommandKind::SessionInfo(SessionInfo {
            session_id: SessionId::new("ID:host-1234-1", 1),
        }),
    });
    round_trip_both_framings(Command {
        command_id: 3,
        response_required: false,
        kind: CommandKind::RemoveInfo(RemoveInfo {
            object_id: DataStructure::SessionId(SessionId::new("ID:host-1234-1", 1)),
            last_delivered_sequence_id: -1,
        }),
    });
    round_trip_both_framings(Command::new(CommandKind::ShutdownInfo));
}

#[test]
fn text_message_dispatch_round_trips() {
    round_trip_both_framings(Command {
        command_id: 40,
        response_required: false,
        kind: CommandKind::MessageDispatch(MessageDispatch {
            consumer_id: ConsumerId::new("ID:host-1234-1", 1, 1),
            destination: Destination::queue("orders"),
            message: Some(sample_message(MessageBodyType::Text)),
            redelivery_counter: 2,
        }),
    });
}

#[test]
fn empty_dispatch_signals_pull_exhausted() {
    // MessagePull with an empty window answers with a message-less
    // dispatch.
    round_trip_both_framings(Command {
        command_id: 41,
        response_required: false,
        kind: CommandKind::MessageDispatch(MessageDispatch {
            consumer_id: ConsumerId::new("c", 1, 1),
            destination: Destination::queue("q"),
            message: None,
            redelivery_counter: 0,
        }),
    });
}

#[test]
fn all_message_body_types_carry_their_type_id() {
    for (body_type, expected) in [
        (MessageBodyType::Plain, TYPE_MESSAGE),
        (MessageBodyType::Bytes, TYPE_BYTES_MESSAGE),
        (MessageBodyType::Map, TYPE_MAP_MESSAGE),
        (MessageBodyType::Object, TYPE_OBJECT_MESSAGE),
        (MessageBodyType::Stream, TYPE_STREAM_MESSAGE),
        (MessageBodyType::Text, TYPE_TEXT_MESSAGE),
        (MessageBodyType::Blob, TYPE_BLOB_MESSAGE),
    ] {
        let kind = CommandKind::Message(sample_message(body_type));
        assert_eq!(kind.type_id(), expected);
        round_trip_both_framings(Command { command_id: 1, response_required: false, kind });
    }
}

#[test]
fn large_message_body_round_trips() {
    let mut message = sample_message(MessageBodyType::Bytes);
    message.content = Bytes::from(vec![0xA5u8; 4 * 1024 * 1024]);
    round_trip_both_framings(Command {
        command_id: 50,
        response_required: false,
        kind: CommandKind::Message(message),
    });
}

#[test]
fn responses_expose_correlation_ids() {
    let response = Command {
        command_id: 90,
        response_required: false,
        kind: CommandKind::Response { correlation_id: 41 },
    };
    assert!(response.is_response());
    assert_eq!(response.correlation_id(), Some(41));
    round_trip_both_framings(response);

    let exception = Command {
        command_id: 91,
        response_required: false,
        kind: CommandKind::ExceptionResponse {
            correlation_id: 42,
            exception: BrokerFault::new("java.io.IOException", "boom"),
        },
    };
    assert_eq!(exception.correlation_id(), Some(42));
    round_trip_both_framings(exception);

    round_trip_both_framings(Command {
        command_id: 92,
        response_required: false,
        kind: CommandKind::IntegerResponse { correlation_id: 43, result: -5 },
    });
    round_trip_both_framings(Command {
        command_id: 93,
        response_required: false,
        kind: CommandKind::DataResponse(DataResponse {
            correlation_id: 44,
            data: Some(DataStructure::Destination(Destination::TempQueue("ID:c:1".into()))),
        }),
    });
    round_trip_both_framings(Command {
        command_id: 94,
        response_required: false,
        kind: CommandKind::DataArrayResponse(DataArrayResponse {
            correlation_id: 45,
            data: vec![
                DataStructure::BrokerId(BrokerId { value: "broker-a".into() }),
                DataStructure::BrokerId(BrokerId { value: "broker-b".into() }),
            ],
        }),
    });
}

#[test]
fn non_responses_have_no_correlation_id() {
    let command = Command::new(CommandKind::KeepAliveInfo);
    assert!(!command.is_response());
    assert_eq!(command.correlation_id(), None);
}

#[test]
fn transaction_and_ack_commands_round_trip() {
    round_trip_both_framings(Command {
        command_id: 60,
        response_required: true,
        kind: CommandKind::TransactionInfo(TransactionInfo {
            connection_id: ConnectionId::new("ID:c"),
            transaction_id: TransactionId::local("ID:c", 1),
            phase: TransactionPhase::CommitOnePhase,
        }),
    });
    round_trip_both_framings(Command {
        command_id: 61,
        response_required: false,
        kind: CommandKind::MessageAck(MessageAck {
            ack_type: AckType::Standard,
            consumer_id: ConsumerId::new("ID:c", 1, 1),
            destination: Destination::queue("q"),
            transaction_id: Some(TransactionId::local("ID:c", 1)),
            first_message_id: Some(MessageId::new(ProducerId::new("ID:p", 1, 1), 1)),
            last_message_id: Some(MessageId::new(ProducerId::new("ID:p", 1, 1), 5)),
            message_count: 5,
            poison_cause: None,
            subscription_name: None,
        }),
    });
    round_trip_both_framings(Command {
        command_id: 62,
        response_required: false,
        kind: CommandKind::ProducerAck(ProducerAck {
            producer_id: ProducerId::new("ID:c", 1, 1),
            size: 4096,
        }),
    });
}

#[test]
fn broker_and_control_commands_round_trip() {
    round_trip_both_framings(Command {
        command_id: 70,
        response_required: false,
        kind: CommandKind::BrokerInfo(BrokerInfo {
            broker_id: BrokerId { value: "broker-1".into() },
            broker_url: "tcp://broker-1:61616".into(),
            broker_name: "broker-1".into(),
        }),
    });
    round_trip_both_framings(Command {
        command_id: 71,
        response_required: false,
        kind: CommandKind::ConnectionControl(ConnectionControl {
            fault_tolerant: true,
            ..ConnectionControl::default()
        }),
    });
    round_trip_both_framings(Command {
        command_id: 72,
        response_required: false,
        kind: CommandKind::ConsumerControl(ConsumerControl {
            destination: Some(Destination::queue("q")),
            consumer_id: ConsumerId::new("ID:c", 1, 1),
            close: false,
            flush: false,
            start: true,
            stop: false,
            prefetch: 500,
        }),
    });
    round_trip_both_framings(Command {
        command_id: 73,
        response_required: false,
        kind: CommandKind::ControlCommand(ControlCommand { command: "shutdown".into() }),
    });
    round_trip_both_framings(Command {
        command_id: 74,
        response_required: false,
        kind: CommandKind::ConnectionError(ConnectionError {
            connection_id: Some(ConnectionId::new("ID:c")),
            exception: Some(BrokerFault::new("org.example.SecurityException", "denied")),
        }),
    });
}

#[test]
fn durable_subscription_commands_round_trip() {
    round_trip_both_framings(Command {
        command_id: 80,
        response_required: true,
        kind: CommandKind::RemoveSubscriptionInfo(RemoveSubscriptionInfo {
            connection_id: ConnectionId::new("ID:c"),
            client_id: "client-7".into(),
            subscription_name: "audit-feed".into(),
        }),
    });
    round_trip_both_framings(Command {
        command_id: 81,
        response_required: false,
        kind: CommandKind::SubscriptionInfo(SubscriptionInfo {
            client_id: "client-7".into(),
            destination: Destination::topic("events"),
            selector: Some("kind = 'audit'".into()),
            subscription_name: "audit-feed".into(),
        }),
    });
}

#[test]
fn journal_and_network_commands_round_trip() {
    round_trip_both_framings(Command {
        command_id: 85,
        response_required: false,
        kind: CommandKind::JournalTopicAck(JournalTopicAck {
            destination: Destination::topic("t"),
            message_id: MessageId::new(ProducerId::new("ID:p", 1, 1), 1),
            message_sequence_id: 10,
            subscription_name: "s".into(),
            client_id: "c".into(),
            transaction_id: None,
        }),
    });
    round_trip_both_framings(Command {
        command_id: 86,
        response_required: false,
        kind: CommandKind::JournalQueueAck(JournalQueueAck {
            destination: Destination::queue("q"),
            message_ack: Some(Box::new(MessageAck {
                ack_type: AckType::Standard,
                consumer_id: ConsumerId::new("ID:c", 1, 1),
                destination: Destination::queue("q"),
                transaction_id: None,
                first_message_id: None,
                last_message_id: None,
                message_count: 1,
                poison_cause: None,
                subscription_name: None,
            })),
        }),
    });
    round_trip_both_framings(Command {
        command_id: 87,
        response_required: false,
        kind: CommandKind::JournalTransaction(JournalTransaction {
            transaction_id: TransactionId::local("ID:c", 2),
            phase: TransactionPhase::Rollback,
            was_prepared: false,
        }),
    });
    round_trip_both_framings(Command {
        command_id: 88,
        response_required: false,
        kind: CommandKind::JournalTrace { message: "checkpoint".into() },
    });
    round_trip_both_framings(Command {
        command_id: 89,
        response_required: false,
        kind: CommandKind::NetworkBridgeFilter(NetworkBridgeFilter {
            network_ttl: 1,
            network_broker_id: BrokerId { value: "peer".into() },
        }),
    });
    round_trip_both_framings(Command {
        command_id: 95,
        response_required: false,
        kind: CommandKind::DiscoveryEvent(DiscoveryEvent {
            service_name: "tcp://broker-2:61616".into(),
            broker_name: "broker-2".into(),
        }),
    });
}

#[test]
fn partial_and_replay_commands_round_trip() {
    round_trip_both_framings(Command {
        command_id: 96,
        response_required: false,
        kind: CommandKind::PartialCommand(PartialCommand {
            command_id: 7,
            data: Bytes::from_static(&[1, 2, 3, 4]),
        }),
    });
    round_trip_both_framings(Command {
        command_id: 97,
        response_required: false,
        kind: CommandKind::LastPartialCommand { command_id: 7 },
    });
    round_trip_both_framings(Command {
        command_id: 98,
        response_required: false,
        kind: CommandKind::ReplayCommand { first_nak_number: 3, last_nak_number: 9 },
    });
    round_trip_both_framings(Command {
        command_id: 99,
        response_required: false,
        kind: CommandKind::MessageDispatchNotification(MessageDispatchNotification {
            consumer_id: ConsumerId::new("ID:c", 1, 1),
            destination: Destination::queue("q"),
            delivery_sequence_id: 12,
            message_id: MessageId::new(ProducerId::new("ID:p", 1, 1), 12),
        }),
    });
    round_trip_both_framings(Command {
        command_id: 100,
        response_required: false,
        kind: CommandKind::MessagePull(MessagePull {
            consumer_id: ConsumerId::new("ID:c", 1, 1),
            destination: Destination::queue("q"),
            timeout: 2_000,
        }),
    });
    round_trip_both_framings(Command {
        command_id: 101,
        response_required: false,
        kind: CommandKind::DestinationInfo(DestinationInfo {
            connection_id: ConnectionId::new("ID:c"),
            destination: Destination::TempQueue("ID:c:1".into()),
            operation: DestinationOperation::Add,
            timeout: 0,
        }),
    });
    round_trip_both_framings(Command::new(CommandKind::FlushCommand));
}

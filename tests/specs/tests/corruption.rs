// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property-blob corruption: the message header and MessageId are
//! intact, the property blob is garbage. Delivery succeeds; the first
//! property access raises an i/o error; the consumer rolls the message
//! back until the redelivery policy is exhausted, then poison-acks it.
//! The connection stays open throughout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use openwire::command::{AckType, Message as WireMessage, MessageBodyType};
use openwire::destination::Destination;
use openwire::ids::{MessageId, ProducerId};
use openwire_client::{AckMode, Connection, MessageListener, OutboundMessage, ReceivedMessage};
use openwire_specs::{init_tracing, MockBroker};

fn corrupt_message(destination: Destination) -> WireMessage {
    let producer_id = ProducerId::new("ID:injector", 1, 1);
    WireMessage {
        message_id: MessageId::new(producer_id.clone(), 99),
        producer_id,
        destination,
        transaction_id: None,
        correlation_id: None,
        reply_to: None,
        message_type: None,
        group_id: None,
        group_sequence: 0,
        persistent: false,
        compressed: false,
        priority: 4,
        timestamp: 0,
        expiration: 0,
        redelivery_counter: 0,
        content: Bytes::from_static(b"body survives"),
        marshalled_properties: Bytes::from_static(&[0xFF, 0xFF]),
        body_type: MessageBodyType::Text,
    }
}

struct PropertyToucher {
    attempts: AtomicUsize,
    io_failures: AtomicUsize,
}

impl MessageListener for PropertyToucher {
    fn on_message(&self, message: ReceivedMessage) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if message.string_property("region").is_err() {
            self.io_failures.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn corrupted_properties_poison_after_seven_attempts() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    // maximumRedeliveries=6 → seven delivery attempts total; zero delay
    // keeps the scenario fast.
    let uri = format!(
        "{}?cms.redeliveryPolicy.maximumRedeliveries=6\
         &cms.redeliveryPolicy.initialRedeliveryDelay=0",
        broker.uri()
    );
    let connection = Connection::connect(&uri).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;
    let consumer = session.create_consumer("POISONED").await?;
    let listener = Arc::new(PropertyToucher {
        attempts: AtomicUsize::new(0),
        io_failures: AtomicUsize::new(0),
    });
    consumer.set_listener(listener.clone());

    broker.inject(corrupt_message(Destination::queue("POISONED")));

    broker
        .wait_until(Duration::from_secs(5), |commands| {
            commands.iter().any(|c| {
                matches!(
                    &c.kind,
                    openwire::command::CommandKind::MessageAck(ack)
                        if ack.ack_type == AckType::Poison
                )
            })
        })
        .await?;

    assert_eq!(listener.attempts.load(Ordering::SeqCst), 7);
    assert_eq!(listener.io_failures.load(Ordering::SeqCst), 7, "every access raised i/o");

    let poison_acks: Vec<_> = broker
        .message_acks()
        .into_iter()
        .filter(|ack| ack.ack_type == AckType::Poison)
        .collect();
    assert_eq!(poison_acks.len(), 1);
    let poison = &poison_acks[0];
    assert_eq!(
        poison.first_message_id.as_ref().map(|id| id.producer_sequence_id),
        Some(99),
        "the poison ack names the corrupt message"
    );
    assert_eq!(poison.consumer_id, *consumer.consumer_id());

    // The connection remains usable: a clean message flows end to end.
    let producer = session.create_producer(Some("POISONED")).await?;
    producer.send(OutboundMessage::text("still alive")).await?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while listener.attempts.load(Ordering::SeqCst) < 8
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(listener.attempts.load(Ordering::SeqCst), 8, "connection is still open");
    assert_eq!(listener.io_failures.load(Ordering::SeqCst), 7);

    connection.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn structural_body_access_is_unaffected_by_property_corruption() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Client).await?;
    let consumer = session.create_consumer("LAZY").await?;

    broker.inject(corrupt_message(Destination::queue("LAZY")));

    let message = consumer
        .receive_timeout(Duration::from_secs(3))
        .await?
        .ok_or_else(|| anyhow::anyhow!("delivery must succeed despite the bad blob"))?;

    // Access throws, repeatedly, with the same kind; the body is fine.
    assert!(message.properties().is_err());
    assert!(message.properties().is_err());
    assert_eq!(message.text()?, "body survives");

    connection.close().await?;
    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optimized acknowledgement with an expired batch: expired messages
//! are EXPIRED-acked promptly and individually, while live deliveries
//! coalesce into the optimized STANDARD ack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openwire::command::AckType;
use openwire_client::{AckMode, Connection, MessageListener, OutboundMessage, ReceivedMessage};
use openwire_specs::{init_tracing, MockBroker};

struct Counter(AtomicUsize);

impl MessageListener for Counter {
    fn on_message(&self, _message: ReceivedMessage) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_batch_is_acked_outside_the_optimized_window() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let uri = format!(
        "{}?connection.optimizeAcknowledge=true\
         &connection.optimizeAcknowledgeTimeOut=300\
         &cms.prefetchPolicy.queue=100",
        broker.uri()
    );
    let connection = Connection::connect(&uri).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;
    let producer = session.create_producer(Some("BATCH")).await?;

    // 45 messages that die in 10 ms, then 60 that live for 30 s; no
    // consumer exists yet, so the broker stores all of them.
    for index in 0..45 {
        producer
            .send(
                OutboundMessage::text(format!("short-{index}"))
                    .with_time_to_live(Duration::from_millis(10)),
            )
            .await?;
    }
    for index in 0..60 {
        producer
            .send(
                OutboundMessage::text(format!("long-{index}"))
                    .with_time_to_live(Duration::from_secs(30)),
            )
            .await?;
    }

    // Past every short TTL.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let consumer = session.create_consumer("BATCH").await?;
    let listener = Arc::new(Counter(AtomicUsize::new(0)));
    consumer.set_listener(listener.clone());

    // Expired acks must cover 45 and standard acks 60.
    broker
        .wait_until(Duration::from_secs(10), |commands| {
            let mut expired = 0;
            let mut standard = 0;
            for command in commands {
                if let openwire::command::CommandKind::MessageAck(ack) = &command.kind {
                    match ack.ack_type {
                        AckType::Expired => expired += ack.message_count,
                        AckType::Standard => standard += ack.message_count,
                        _ => {}
                    }
                }
            }
            expired == 45 && standard == 60
        })
        .await?;

    assert_eq!(listener.0.load(Ordering::SeqCst), 60, "only live messages reach the listener");

    let acks = broker.message_acks();
    let expired_total: i32 =
        acks.iter().filter(|a| a.ack_type == AckType::Expired).map(|a| a.message_count).sum();
    let standard_acks: Vec<_> =
        acks.iter().filter(|a| a.ack_type == AckType::Standard).collect();
    let standard_total: i32 = standard_acks.iter().map(|a| a.message_count).sum();

    assert_eq!(expired_total, 45);
    assert_eq!(standard_total, 60);
    // The optimization coalesced: far fewer standard acks than
    // messages.
    assert!(
        standard_acks.len() < 60 / 2,
        "expected coalesced standard acks, saw {}",
        standard_acks.len()
    );

    connection.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optimized_ack_timeout_flushes_a_partial_batch() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let uri = format!(
        "{}?connection.optimizeAcknowledge=true\
         &connection.optimizeAcknowledgeTimeOut=150\
         &cms.prefetchPolicy.queue=1000",
        broker.uri()
    );
    let connection = Connection::connect(&uri).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;
    let consumer = session.create_consumer("SLOW").await?;
    let listener = Arc::new(Counter(AtomicUsize::new(0)));
    consumer.set_listener(listener.clone());

    let producer = session.create_producer(Some("SLOW")).await?;
    producer.send(OutboundMessage::text("only one")).await?;

    // Far below the 65% threshold; the timeout must flush it anyway.
    broker
        .wait_until(Duration::from_secs(5), |commands| {
            commands.iter().any(|c| {
                matches!(
                    &c.kind,
                    openwire::command::CommandKind::MessageAck(ack)
                        if ack.ack_type == AckType::Standard && ack.message_count == 1
                )
            })
        })
        .await?;
    assert_eq!(listener.0.load(Ordering::SeqCst), 1);

    connection.close().await?;
    Ok(())
}

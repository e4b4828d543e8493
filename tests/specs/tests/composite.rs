// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composite destinations: one send fans out to every component, in
//! client-declared component order.

use std::time::Duration;

use openwire::command::CommandKind;
use openwire::destination::Destination;
use openwire_client::{AckMode, Connection, OutboundMessage};
use openwire_specs::{init_tracing, MockBroker};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn composite_send_reaches_both_queues() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;

    let consumer_a = session.create_consumer("A").await?;
    let consumer_b = session.create_consumer("B").await?;
    let producer = session.create_producer(Some("A,B")).await?;

    producer.send(OutboundMessage::text("X")).await?;

    let from_a = consumer_a
        .receive_timeout(Duration::from_secs(2))
        .await?
        .ok_or_else(|| anyhow::anyhow!("A received nothing within 2s"))?;
    let from_b = consumer_b
        .receive_timeout(Duration::from_secs(2))
        .await?
        .ok_or_else(|| anyhow::anyhow!("B received nothing within 2s"))?;

    assert_eq!(from_a.text()?, "X");
    assert_eq!(from_b.text()?, "X");
    assert_eq!(from_a.destination(), &Destination::Queue("A".into()));
    assert_eq!(from_b.destination(), &Destination::Queue("B".into()));

    // Exactly one each.
    assert!(consumer_a.receive_timeout(Duration::from_millis(200)).await?.is_none());
    assert!(consumer_b.receive_timeout(Duration::from_millis(200)).await?.is_none());

    connection.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn composite_travels_as_one_destination_on_the_wire() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;
    let producer = session.create_producer(Some("queue://name1,topic://name2")).await?;
    producer.send(OutboundMessage::text("X").persistent(false)).await?;

    broker
        .wait_until(Duration::from_secs(2), |commands| {
            commands.iter().any(|c| matches!(c.kind, CommandKind::Message(_)))
        })
        .await?;

    let messages = broker.received_named("Message");
    assert_eq!(messages.len(), 1, "a composite send is a single command");
    let CommandKind::Message(message) = &messages[0].kind else { unreachable!() };
    assert_eq!(
        message.destination,
        Destination::Composite(vec![
            Destination::Queue("name1".into()),
            Destination::Topic("name2".into()),
        ]),
        "component order is preserved"
    );

    connection.close().await?;
    Ok(())
}

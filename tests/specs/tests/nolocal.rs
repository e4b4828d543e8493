// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NoLocal: a consumer flagged noLocal never sees messages published by
//! its own connection; other connections' traffic flows normally.

use std::time::Duration;

use openwire_client::{AckMode, Connection, OutboundMessage};
use openwire_specs::{init_tracing, MockBroker};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_local_filters_own_connection_traffic() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let local = Connection::connect(&broker.uri()).await?;
    local.start();
    let remote = Connection::connect(&broker.uri()).await?;
    remote.start();

    let local_session = local.create_session(AckMode::Auto).await?;
    let remote_session = remote.create_session(AckMode::Auto).await?;

    let consumer = local_session.create_consumer("topic://EVENTS?consumer.noLocal=true").await?;
    let local_producer = local_session.create_producer(Some("topic://EVENTS")).await?;
    let remote_producer = remote_session.create_producer(Some("topic://EVENTS")).await?;

    local_producer.send(OutboundMessage::text("from-self").persistent(false)).await?;
    remote_producer.send(OutboundMessage::text("from-peer").persistent(false)).await?;

    let received = consumer
        .receive_timeout(Duration::from_secs(3))
        .await?
        .ok_or_else(|| anyhow::anyhow!("peer traffic must arrive"))?;
    assert_eq!(received.text()?, "from-peer", "own-connection message was filtered");

    assert!(
        consumer.receive_timeout(Duration::from_millis(300)).await?.is_none(),
        "nothing else should arrive"
    );

    local.close().await?;
    remote.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn plain_topic_consumer_sees_everything() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;
    let consumer = session.create_consumer("topic://EVENTS").await?;
    let producer = session.create_producer(Some("topic://EVENTS")).await?;

    producer.send(OutboundMessage::text("loopback").persistent(false)).await?;
    let received = consumer
        .receive_timeout(Duration::from_secs(3))
        .await?
        .ok_or_else(|| anyhow::anyhow!("loopback must arrive without noLocal"))?;
    assert_eq!(received.text()?, "loopback");

    connection.close().await?;
    Ok(())
}

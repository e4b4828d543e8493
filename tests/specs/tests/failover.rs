// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failover: when the active broker dies, the supervisor reconnects to
//! the next URI, replays the resubscription set first (connection →
//! session → consumers → producers), then the backlog in enqueue order,
//! all with their original command ids.

use std::time::Duration;

use openwire::command::CommandKind;
use openwire_client::{AckMode, Connection, OutboundMessage};
use openwire_specs::{init_tracing, MockBroker};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backlog_replays_after_resubscription_on_the_second_broker() -> anyhow::Result<()> {
    init_tracing();
    let first = MockBroker::start().await?;
    let second = MockBroker::start().await?;

    let uri = format!(
        "failover:({},{})?randomize=false&initialReconnectDelay=10\
         &connection.watchTopicAdvisories=false",
        first.uri(),
        second.uri()
    );
    let connection = Connection::connect(&uri).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;
    let _consumer = session.create_consumer("IN").await?;
    let producer = session.create_producer(Some("OUT")).await?;

    // The first broker saw the full registration.
    first
        .wait_until(Duration::from_secs(3), |commands| {
            commands.iter().any(|c| matches!(c.kind, CommandKind::ProducerInfo(_)))
        })
        .await?;

    // Kill the active connection; further connects to the first broker
    // die right after the handshake, pushing the client to the second.
    first.set_drop_after_handshake(true);
    first.drop_connections();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Three one-way sends in the interruption window.
    for index in 0..3 {
        producer.send(OutboundMessage::text(format!("m{index}")).persistent(false)).await?;
    }

    second
        .wait_until(Duration::from_secs(5), |commands| {
            commands.iter().filter(|c| matches!(c.kind, CommandKind::Message(_))).count() == 3
        })
        .await?;

    let names: Vec<&'static str> =
        second.received().iter().map(|c| c.kind.name()).collect();
    assert_eq!(
        &names[..7],
        &[
            "ConnectionInfo",
            "SessionInfo",
            "ConsumerInfo",
            "ProducerInfo",
            "Message",
            "Message",
            "Message"
        ],
        "resubscription precedes backlog replay"
    );

    // Original command ids survive the reconnect.
    let replayed = second.received();
    let first_log = first.received();
    let original_connection_id = first_log
        .iter()
        .find(|c| matches!(c.kind, CommandKind::ConnectionInfo(_)))
        .map(|c| c.command_id)
        .ok_or_else(|| anyhow::anyhow!("first broker never saw ConnectionInfo"))?;
    assert_eq!(replayed[0].command_id, original_connection_id);

    let message_texts: Vec<String> = replayed
        .iter()
        .filter_map(|c| match &c.kind {
            CommandKind::Message(m) => String::from_utf8(m.content.to_vec()).ok(),
            _ => None,
        })
        .collect();
    assert_eq!(message_texts, vec!["m0", "m1", "m2"], "backlog keeps enqueue order");

    let mut message_ids: Vec<u32> = replayed
        .iter()
        .filter(|c| matches!(c.kind, CommandKind::Message(_)))
        .map(|c| c.command_id)
        .collect();
    let sorted = {
        let mut s = message_ids.clone();
        s.sort_unstable();
        s
    };
    assert_eq!(message_ids, sorted, "ids are replayed in their original order");
    message_ids.dedup();
    assert_eq!(message_ids.len(), 3);

    connection.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_flow_after_transparent_reconnect() -> anyhow::Result<()> {
    init_tracing();
    let first = MockBroker::start().await?;
    let second = MockBroker::start().await?;

    let uri = format!(
        "failover:({},{})?randomize=false&initialReconnectDelay=10\
         &connection.watchTopicAdvisories=false",
        first.uri(),
        second.uri()
    );
    let connection = Connection::connect(&uri).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;
    let consumer = session.create_consumer("WORK").await?;
    let producer = session.create_producer(Some("WORK")).await?;

    producer.send(OutboundMessage::text("before")).await?;
    let before = consumer
        .receive_timeout(Duration::from_secs(3))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no pre-failover delivery"))?;
    assert_eq!(before.text()?, "before");

    first.set_drop_after_handshake(true);
    first.drop_connections();
    // Let the EOF reach the client so the send lands in the failover
    // backlog rather than a dying socket.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The consumer is resubscribed on the second broker; traffic
    // continues without user intervention.
    producer.send(OutboundMessage::text("after").persistent(false)).await?;
    let after = consumer
        .receive_timeout(Duration::from_secs(5))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no post-failover delivery"))?;
    assert_eq!(after.text()?, "after");

    connection.close().await?;
    Ok(())
}

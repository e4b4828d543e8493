// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exclusive consumers: the broker dispatches everything to the first
//! exclusive consumer; a waiting backup takes over when it goes away.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openwire_client::{
    AckMode, Connection, Consumer, MessageListener, OutboundMessage, ReceivedMessage,
};
use openwire_specs::{init_tracing, MockBroker};

struct Counter(AtomicUsize);

impl MessageListener for Counter {
    fn on_message(&self, _message: ReceivedMessage) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

async fn drain_count(consumer: &Consumer) -> anyhow::Result<usize> {
    let mut count = 0;
    while consumer.receive_timeout(Duration::from_millis(300)).await?.is_some() {
        count += 1;
    }
    Ok(count)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exclusive_consumer_fails_over_to_the_backup() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;

    let primary = session.create_consumer("Q?consumer.exclusive=true").await?;
    let backup = session.create_consumer("Q?consumer.exclusive=true").await?;
    let producer = session.create_producer(Some("Q")).await?;

    for index in 0..10 {
        producer.send(OutboundMessage::text(format!("m{index}"))).await?;
    }

    assert_eq!(drain_count(&primary).await?, 10, "the primary receives everything");
    assert_eq!(drain_count(&backup).await?, 0, "the backup receives nothing");

    // Primary disconnects; the broker promotes the backup.
    primary.close().await?;
    broker
        .wait_until(Duration::from_secs(2), |_| {
            broker.consumer_count(&openwire::destination::Destination::queue("Q")) == 1
        })
        .await?;
    for index in 10..15 {
        producer.send(OutboundMessage::text(format!("m{index}"))).await?;
    }
    assert_eq!(drain_count(&backup).await?, 5, "the backup takes over");

    connection.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exclusive_listener_handover() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;

    let primary = session.create_consumer("JOBS?consumer.exclusive=true").await?;
    let backup = session.create_consumer("JOBS?consumer.exclusive=true").await?;
    let primary_count = Arc::new(Counter(AtomicUsize::new(0)));
    let backup_count = Arc::new(Counter(AtomicUsize::new(0)));
    primary.set_listener(primary_count.clone());
    backup.set_listener(backup_count.clone());

    let producer = session.create_producer(Some("JOBS")).await?;
    for _ in 0..4 {
        producer.send(OutboundMessage::text("job")).await?;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while primary_count.0.load(Ordering::SeqCst) < 4 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(primary_count.0.load(Ordering::SeqCst), 4);
    assert_eq!(backup_count.0.load(Ordering::SeqCst), 0);

    primary.close().await?;
    producer.send(OutboundMessage::text("job")).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while backup_count.0.load(Ordering::SeqCst) < 1 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(backup_count.0.load(Ordering::SeqCst), 1);

    connection.close().await?;
    Ok(())
}

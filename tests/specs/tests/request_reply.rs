// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/reply over a temporary queue: a responder on the request
//! queue echoes to whatever `replyTo` each request carries.

use std::time::Duration;

use openwire_client::{AckMode, Connection, OutboundMessage};
use openwire_specs::{init_tracing, MockBroker};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_reply_with_temporary_queue() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;

    let reply_queue = connection.create_temporary_queue().await?;
    let requests = session.create_consumer("REQUESTS").await?;
    let responder_out = session.create_producer(None).await?;
    let replies = session.create_consumer_on(reply_queue.clone()).await?;
    let requester_out = session.create_producer(Some("REQUESTS")).await?;

    // Responder: one echo turn.
    let responder = tokio::spawn(async move {
        let request = requests
            .receive_timeout(Duration::from_secs(5))
            .await?
            .ok_or_else(|| anyhow::anyhow!("no request arrived"))?;
        let text = request.text()?;
        let reply_to = request
            .reply_to()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("request carries no replyTo"))?;
        responder_out
            .send_to(&reply_to, OutboundMessage::text(format!("Reply: {text}")))
            .await?;
        anyhow::Ok(())
    });

    requester_out
        .send(OutboundMessage::text("Hello").with_reply_to(reply_queue.clone()))
        .await?;

    let reply = replies
        .receive_timeout(Duration::from_secs(5))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no reply within 5s"))?;
    assert_eq!(reply.text()?, "Reply: Hello");
    assert!(reply.destination().is_temporary());

    responder.await??;
    connection.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn correlation_id_round_trips_through_reply() -> anyhow::Result<()> {
    init_tracing();
    let broker = MockBroker::start().await?;

    let connection = Connection::connect(&broker.uri()).await?;
    connection.start();
    let session = connection.create_session(AckMode::Auto).await?;

    let reply_queue = connection.create_temporary_queue().await?;
    let requests = session.create_consumer("RPC").await?;
    let replies = session.create_consumer_on(reply_queue.clone()).await?;
    let producer = session.create_producer(Some("RPC")).await?;
    let responder_out = session.create_producer(None).await?;

    producer
        .send(
            OutboundMessage::text("ping")
                .with_reply_to(reply_queue.clone())
                .with_correlation_id("rpc-17"),
        )
        .await?;

    let request = requests
        .receive_timeout(Duration::from_secs(5))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no request"))?;
    let correlation = request.correlation_id().map(str::to_owned);
    responder_out
        .send_to(
            request.reply_to().cloned().as_ref().ok_or_else(|| anyhow::anyhow!("no replyTo"))?,
            OutboundMessage::text("pong").with_correlation_id(correlation.clone().unwrap_or_default()),
        )
        .await?;

    let reply = replies
        .receive_timeout(Duration::from_secs(5))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no reply"))?;
    assert_eq!(reply.correlation_id(), Some("rpc-17"));
    assert_eq!(reply.text()?, "pong");

    connection.close().await?;
    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process mock broker for end-to-end scenario tests.
//!
//! Speaks just enough OpenWire to exercise the client: performs the
//! WireFormatInfo exchange, answers every `responseRequired` command
//! with a plain Response, records every received command in arrival
//! order, and routes Message commands to registered consumers:
//! composite fan-out, queue storage for consumerless destinations,
//! exclusive-consumer selection, and NoLocal filtering included.
//!
//! It is deliberately not a broker: no persistence, no prefetch
//! enforcement, no redelivery. Tests that need those drive them from
//! the client side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use openwire::command::{
    CommandKind, ConsumerInfo, Message as WireMessage, MessageAck, MessageDispatch,
    WireFormatInfo,
};
use openwire::destination::Destination;
use openwire::ids::DataStructure;
use openwire::{Command, OpenWireFormat};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Install a test subscriber once so `RUST_LOG` works in scenarios.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

enum BrokerWrite {
    Command(Command),
    /// Send the broker's WireFormatInfo loose, then renegotiate.
    Handshake(Box<WireFormatInfo>),
    Close,
}

struct RegisteredConsumer {
    info: ConsumerInfo,
    writer: mpsc::UnboundedSender<BrokerWrite>,
}

struct BrokerState {
    received: Mutex<Vec<Command>>,
    received_notify: Notify,
    consumers: Mutex<Vec<RegisteredConsumer>>,
    /// Messages for queue destinations nobody consumes yet, keyed by
    /// the qualified destination name.
    stored: Mutex<HashMap<String, Vec<WireMessage>>>,
    drop_after_handshake: AtomicBool,
    /// One cancel token per live connection, for forced drops.
    connection_cancels: Mutex<Vec<CancellationToken>>,
}

impl BrokerState {
    fn record(&self, command: Command) {
        self.received.lock().push(command);
        self.received_notify.notify_waiters();
    }

    fn route(&self, message: &WireMessage) {
        let components = match &message.destination {
            Destination::Composite(parts) => parts.clone(),
            other => vec![other.clone()],
        };
        for destination in components {
            self.route_to_physical(&destination, message);
        }
    }

    fn route_to_physical(&self, destination: &Destination, message: &WireMessage) {
        if destination.is_topic() {
            let consumers = self.consumers.lock();
            for consumer in consumers.iter() {
                if !same_destination(&consumer.info.destination, destination) {
                    continue;
                }
                if consumer.info.no_local
                    && consumer.info.consumer_id.connection_id
                        == message.producer_id.connection_id
                {
                    continue;
                }
                let _ = consumer.writer.send(BrokerWrite::Command(dispatch_command(
                    &consumer.info,
                    destination,
                    message,
                )));
            }
            return;
        }

        // Queue family: one consumer gets the message; exclusive
        // consumers win in registration order.
        let chosen = {
            let consumers = self.consumers.lock();
            let candidates: Vec<&RegisteredConsumer> = consumers
                .iter()
                .filter(|c| same_destination(&c.info.destination, destination))
                .filter(|c| !c.writer.is_closed())
                .collect();
            let exclusive = candidates.iter().find(|c| c.info.exclusive);
            exclusive.or(candidates.first()).map(|c| (c.info.clone(), c.writer.clone()))
        };

        match chosen {
            Some((info, writer)) => {
                if writer
                    .send(BrokerWrite::Command(dispatch_command(&info, destination, message)))
                    .is_err()
                {
                    self.store(destination, message);
                }
            }
            None => self.store(destination, message),
        }
    }

    fn store(&self, destination: &Destination, message: &WireMessage) {
        self.stored.lock().entry(destination.qualified()).or_default().push(message.clone());
    }

    /// A consumer appeared: hand it whatever was stored for its queue.
    fn drain_stored_for(&self, info: &ConsumerInfo) {
        if info.destination.is_topic() {
            return;
        }
        let stored = self.stored.lock().remove(&info.destination.qualified());
        let Some(stored) = stored else { return };
        for message in stored {
            self.route_to_physical(&info.destination.clone(), &message);
        }
    }

    fn remove_consumers(&self, predicate: impl Fn(&RegisteredConsumer) -> bool) {
        self.consumers.lock().retain(|c| !predicate(c));
    }
}

fn same_destination(a: &Destination, b: &Destination) -> bool {
    a.qualified() == b.qualified()
}

fn dispatch_command(
    info: &ConsumerInfo,
    destination: &Destination,
    message: &WireMessage,
) -> Command {
    let mut delivered = message.clone();
    delivered.destination = destination.clone();
    Command::new(CommandKind::MessageDispatch(MessageDispatch {
        consumer_id: info.consumer_id.clone(),
        destination: destination.clone(),
        message: Some(delivered),
        redelivery_counter: 0,
    }))
}

pub struct MockBroker {
    port: u16,
    state: Arc<BrokerState>,
    cancel: CancellationToken,
}

impl MockBroker {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(BrokerState {
            received: Mutex::new(Vec::new()),
            received_notify: Notify::new(),
            consumers: Mutex::new(Vec::new()),
            stored: Mutex::new(HashMap::new()),
            drop_after_handshake: AtomicBool::new(false),
            connection_cancels: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();

        let accept_state = Arc::clone(&state);
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let conn_cancel = accept_cancel.child_token();
                        accept_state.connection_cancels.lock().push(conn_cancel.clone());
                        tokio::spawn(serve_connection(
                            stream,
                            Arc::clone(&accept_state),
                            conn_cancel,
                        ));
                    }
                }
            }
        });

        Ok(Self { port, state, cancel })
    }

    pub fn uri(&self) -> String {
        format!("tcp://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Make every connection die right after the WireFormatInfo
    /// exchange; used to force failover.
    pub fn set_drop_after_handshake(&self, drop: bool) {
        self.state.drop_after_handshake.store(drop, Ordering::Release);
    }

    /// Terminate every live connection immediately.
    pub fn drop_connections(&self) {
        let cancels = std::mem::take(&mut *self.state.connection_cancels.lock());
        for cancel in cancels {
            cancel.cancel();
        }
    }

    pub fn received(&self) -> Vec<Command> {
        self.state.received.lock().clone()
    }

    /// Received commands of one kind, by wire name.
    pub fn received_named(&self, name: &str) -> Vec<Command> {
        self.received().into_iter().filter(|c| c.kind.name() == name).collect()
    }

    pub fn message_acks(&self) -> Vec<MessageAck> {
        self.received()
            .into_iter()
            .filter_map(|c| match c.kind {
                CommandKind::MessageAck(ack) => Some(ack),
                _ => None,
            })
            .collect()
    }

    /// Poll until the recorded command log satisfies `predicate`.
    pub async fn wait_until(
        &self,
        budget: Duration,
        predicate: impl Fn(&[Command]) -> bool,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if predicate(&self.state.received.lock()) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("mock broker condition not reached within {budget:?}");
            }
            let _ = tokio::time::timeout(
                Duration::from_millis(20),
                self.state.received_notify.notified(),
            )
            .await;
        }
    }

    /// Route a crafted message as though a producer had sent it; lets
    /// tests inject wire-level oddities (corrupt property blobs).
    pub fn inject(&self, message: WireMessage) {
        self.state.route(&message);
    }

    /// Registered, live consumers on a destination.
    pub fn consumer_count(&self, destination: &Destination) -> usize {
        self.state
            .consumers
            .lock()
            .iter()
            .filter(|c| same_destination(&c.info.destination, destination) && !c.writer.is_closed())
            .count()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<BrokerState>, cancel: CancellationToken) {
    let (mut read_half, mut write_half) = stream.into_split();
    let wireformat = Arc::new(Mutex::new(OpenWireFormat::default()));
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<BrokerWrite>();

    // Writer task: owns marshal ordering, so the handshake info is
    // always written loose before the format switches.
    let writer_wf = Arc::clone(&wireformat);
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                item = writer_rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            match item {
                BrokerWrite::Command(command) => {
                    let mut frame = BytesMut::new();
                    if writer_wf.lock().marshal(&command, &mut frame).is_err() {
                        break;
                    }
                    if write_half.write_all(&frame).await.is_err() {
                        break;
                    }
                }
                BrokerWrite::Handshake(peer) => {
                    let command = {
                        let wf = writer_wf.lock();
                        Command::new(CommandKind::WireFormatInfo(wf.preferred_wireformat_info()))
                    };
                    let mut frame = BytesMut::new();
                    if writer_wf.lock().marshal(&command, &mut frame).is_err() {
                        break;
                    }
                    if write_half.write_all(&frame).await.is_err() {
                        break;
                    }
                    writer_wf.lock().renegotiate(&peer);
                }
                BrokerWrite::Close => {
                    let _ = write_half.shutdown().await;
                    break;
                }
            }
        }
    });

    let mut buffer = BytesMut::with_capacity(64 * 1024);
    'reader: loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_half.read_buf(&mut buffer) => read,
        };
        let Ok(n) = read else { break };
        if n == 0 {
            break;
        }
        loop {
            let decoded = wireformat.lock().unmarshal(&mut buffer);
            match decoded {
                Ok(Some(command)) => {
                    if handle_command(&state, &writer_tx, command).is_break() {
                        break 'reader;
                    }
                }
                Ok(None) => break,
                Err(_) => break 'reader,
            }
        }
    }

    // Connection gone: its consumers are no longer reachable.
    let probe = writer_tx.clone();
    drop(writer_tx);
    state.remove_consumers(|c| c.writer.same_channel(&probe));
    let _ = writer.await;
}

fn handle_command(
    state: &Arc<BrokerState>,
    writer_tx: &mpsc::UnboundedSender<BrokerWrite>,
    command: Command,
) -> std::ops::ControlFlow<()> {
    if let CommandKind::WireFormatInfo(peer) = &command.kind {
        let _ = writer_tx.send(BrokerWrite::Handshake(Box::new(peer.clone())));
        if state.drop_after_handshake.load(Ordering::Acquire) {
            let _ = writer_tx.send(BrokerWrite::Close);
            return std::ops::ControlFlow::Break(());
        }
        return std::ops::ControlFlow::Continue(());
    }

    if command.response_required {
        let _ = writer_tx.send(BrokerWrite::Command(Command::new(CommandKind::Response {
            correlation_id: command.command_id,
        })));
    }

    match &command.kind {
        CommandKind::ConsumerInfo(info) => {
            state
                .consumers
                .lock()
                .push(RegisteredConsumer { info: info.clone(), writer: writer_tx.clone() });
            state.record(command.clone());
            state.drain_stored_for(info);
        }
        CommandKind::RemoveInfo(remove) => {
            if let DataStructure::ConsumerId(id) = &remove.object_id {
                state.remove_consumers(|c| &c.info.consumer_id == id);
            }
            state.record(command);
        }
        CommandKind::Message(message) => {
            state.record(command.clone());
            state.route(message);
        }
        CommandKind::KeepAliveInfo => {
            // Liveness noise; not part of any scenario's expectations.
        }
        _ => state.record(command),
    }
    std::ops::ControlFlow::Continue(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The connection kernel.
//!
//! Owns the transport chain, the composite task runner, the session
//! registry, and the background sender that lets synchronous code (ack
//! paths on dispatch threads) emit commands without blocking. Inbound
//! commands fan out here: dispatches to sessions, producer acks to
//! producers, broker faults to the exception listener.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use openwire::command::{
    BrokerInfo, CommandKind, ConnectionInfo, ConsumerInfo, DestinationInfo, DestinationOperation,
    RemoveInfo,
};
use openwire::destination::Destination;
use openwire::ids::{ConnectionId, ConsumerId, DataStructure};
use openwire::{Command, OpenWireFormat};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::monitor::ReentrantMonitor;
use crate::session::{AckMode, Session, SessionInner};
use crate::tasks::CompositeTaskRunner;
use crate::transport::correlator::ResponseCorrelator;
use crate::transport::failover::{ChainFactory, FailoverTransport};
use crate::transport::inactivity::InactivityMonitor;
use crate::transport::negotiator::{WireFormatNegotiator, DEFAULT_NEGOTIATE_TIMEOUT};
use crate::transport::tcp::TcpTransport;
use crate::transport::{Transport, TransportListener};
use crate::uri::{BrokerUri, ConnectionConfig, ConnectionUri};

/// Upper bound on the initial failover connection wait.
const STARTUP_CONNECT_WAIT: Duration = Duration::from_secs(30);

/// Broker-announced lifecycle events for temporary destinations land
/// here when `watchTopicAdvisories` is on.
const ADVISORY_DESTINATIONS: &str =
    "topic://ActiveMQ.Advisory.TempQueue,topic://ActiveMQ.Advisory.TempTopic";

/// Session slot reserved for the connection's advisory consumer.
const ADVISORY_SESSION: i64 = -1;

pub type ExceptionListener = Arc<dyn Fn(Error) + Send + Sync>;

enum BackgroundSend {
    Command(Command),
    Flush(tokio::sync::oneshot::Sender<()>),
}

pub(crate) struct ConnectionInner {
    pub(crate) config: ConnectionConfig,
    pub(crate) connection_id: ConnectionId,
    pub(crate) client_id: String,
    pub(crate) correlator: Arc<ResponseCorrelator>,
    pub(crate) runner: CompositeTaskRunner,
    pub(crate) handle: tokio::runtime::Handle,
    sessions: RwLock<IndexMap<i64, Arc<SessionInner>>>,
    session_seq: AtomicI64,
    temp_destination_seq: AtomicI64,
    transaction_seq: AtomicI64,
    started: AtomicBool,
    closed: AtomicBool,
    failed: AtomicBool,
    exception_listener: RwLock<Option<ExceptionListener>>,
    command_tx: mpsc::UnboundedSender<BackgroundSend>,
    broker_info: Mutex<Option<BrokerInfo>>,
    monitor: ReentrantMonitor,
}

impl ConnectionInner {
    /// Assemble the kernel around a started correlator and spawn the
    /// background sender.
    fn assemble(
        config: ConnectionConfig,
        correlator: Arc<ResponseCorrelator>,
        runner: CompositeTaskRunner,
    ) -> Arc<Self> {
        let connection_id = ConnectionId::new(format!("ID:{}", uuid::Uuid::new_v4()));
        let client_id =
            config.connection.client_id.clone().unwrap_or_else(|| connection_id.value.clone());

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<BackgroundSend>();
        let inner = Arc::new(Self {
            config,
            connection_id,
            client_id,
            correlator: Arc::clone(&correlator),
            runner,
            handle: tokio::runtime::Handle::current(),
            sessions: RwLock::new(IndexMap::new()),
            session_seq: AtomicI64::new(0),
            temp_destination_seq: AtomicI64::new(0),
            transaction_seq: AtomicI64::new(0),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            exception_listener: RwLock::new(None),
            command_tx,
            broker_info: Mutex::new(None),
            monitor: ReentrantMonitor::new(),
        });

        // Background sender: synchronous code (dispatch-thread acks,
        // keep-alive replies) enqueues here; one task forwards in order.
        tokio::spawn(async move {
            while let Some(send) = command_rx.recv().await {
                match send {
                    BackgroundSend::Command(command) => {
                        if let Err(error) = correlator.oneway(command).await {
                            tracing::debug!(error = %error, "background send failed");
                        }
                    }
                    BackgroundSend::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        inner
    }

    pub(crate) async fn request(&self, kind: CommandKind) -> Result<CommandKind> {
        self.correlator.request(Command::new(kind)).await
    }

    pub(crate) async fn oneway(&self, kind: CommandKind) -> Result<()> {
        self.correlator.oneway(Command::new(kind)).await
    }

    /// Fire-and-forget from synchronous contexts; order preserved.
    pub(crate) fn send_bg(&self, kind: CommandKind) {
        let _ = self.command_tx.send(BackgroundSend::Command(Command::new(kind)));
    }

    /// Barrier: resolves once everything queued before it has been
    /// handed to the transport. Direct sends that must not overtake
    /// background traffic (transaction outcomes) await this first.
    pub(crate) async fn flush_bg(&self) {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        if self.command_tx.send(BackgroundSend::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn next_transaction_value(&self) -> i64 {
        self.transaction_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn remove_session(&self, session_value: i64) {
        self.sessions.write().shift_remove(&session_value);
    }

    fn on_error(&self, error: Error) {
        if self.failed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::error!(error = %error, "connection failed");
        // Tear down delivery so session threads unblock; no wire
        // traffic, the transport is gone.
        for session in self.sessions.read().values() {
            session.clear_in_progress();
        }
        let listener = self.exception_listener.read().clone();
        if let Some(listener) = listener {
            listener(error);
        }
    }
}

impl TransportListener for ConnectionInner {
    fn on_command(&self, command: Command) {
        match command.kind {
            CommandKind::MessageDispatch(dispatch) => {
                if dispatch.consumer_id.session_id == ADVISORY_SESSION {
                    tracing::debug!(destination = %dispatch.destination, "advisory received");
                    return;
                }
                let session =
                    self.sessions.read().get(&dispatch.consumer_id.session_id).cloned();
                match session {
                    Some(session) => session.dispatch(dispatch),
                    None => {
                        tracing::debug!(consumer_id = %dispatch.consumer_id, "dispatch for unknown session");
                    }
                }
            }
            CommandKind::ProducerAck(ack) => {
                let session = self.sessions.read().get(&ack.producer_id.session_id).cloned();
                if let Some(producer) =
                    session.and_then(|s| s.producer_by_id(&ack.producer_id))
                {
                    producer.on_producer_ack(ack.size);
                }
            }
            CommandKind::BrokerInfo(info) => {
                tracing::debug!(broker = %info.broker_name, "broker info received");
                *self.broker_info.lock() = Some(info);
            }
            CommandKind::ConnectionError(error) => {
                let fault = error.exception.map(|f| Error::Broker {
                    class: f.exception_class,
                    message: f.message,
                });
                self.on_error(fault.unwrap_or_else(|| Error::io("broker reported an error")));
            }
            CommandKind::ShutdownInfo => {
                self.on_error(Error::io("broker shut down the connection"));
            }
            CommandKind::ConnectionControl(control) => {
                tracing::debug!(?control, "connection control");
            }
            CommandKind::ConsumerControl(control) => {
                tracing::debug!(consumer_id = %control.consumer_id, "consumer control");
            }
            CommandKind::WireFormatInfo(_) | CommandKind::KeepAliveInfo => {}
            other => {
                tracing::debug!(command = other.name(), "unhandled broker command");
            }
        }
    }

    fn on_exception(&self, error: Error) {
        self.on_error(error);
    }

    fn transport_interrupted(&self) {
        tracing::info!("transport interrupted");
        for session in self.sessions.read().values() {
            session.clear_in_progress();
        }
    }

    fn transport_resumed(&self) {
        tracing::info!("transport resumed");
    }
}

/// Build one socket chain: TCP/TLS + wire-format I/O, inactivity
/// monitor, negotiator. Returns once negotiation completes.
async fn connect_socket_chain(
    uri: &BrokerUri,
    base_config: &ConnectionConfig,
    runner: &CompositeTaskRunner,
    listener: Option<Arc<dyn TransportListener>>,
) -> Result<(Arc<WireFormatNegotiator>, ConnectionConfig)> {
    let mut config = base_config.clone();
    config.apply(&uri.options)?;

    let wireformat = Arc::new(Mutex::new(OpenWireFormat::new(config.wireformat.clone())));
    let tcp = TcpTransport::connect(uri, &config.transport, Arc::clone(&wireformat)).await?;
    let inactivity = InactivityMonitor::new(tcp, runner.clone(), false);
    let negotiator = WireFormatNegotiator::new(inactivity, wireformat);

    if let Some(listener) = listener {
        negotiator.set_listener(listener);
        negotiator.start().await?;
        negotiator.await_negotiated(DEFAULT_NEGOTIATE_TIMEOUT).await?;
    }
    Ok((negotiator, config))
}

/// Factory handed to the failover supervisor: one fully negotiated
/// chain per attempt.
fn socket_chain_factory(config: ConnectionConfig, runner: CompositeTaskRunner) -> ChainFactory {
    Arc::new(move |uri, listener| {
        let config = config.clone();
        let runner = runner.clone();
        Box::pin(async move {
            let (negotiator, _) =
                connect_socket_chain(&uri, &config, &runner, Some(listener)).await?;
            Ok(negotiator as Arc<dyn Transport>)
        })
    })
}

/// An open connection to a broker (or failover group).
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect, negotiate the wire format, and register with the
    /// broker. Accepts `tcp://`, `ssl://` and `failover:` URIs.
    pub async fn connect(uri: &str) -> Result<Self> {
        let parsed = ConnectionUri::parse(uri)?;
        let config = ConnectionConfig::from_uri(&parsed)?;

        let runner = CompositeTaskRunner::new();
        runner.start();

        let correlator = match &parsed {
            ConnectionUri::Direct(broker) => {
                let (negotiator, _) = connect_socket_chain(broker, &config, &runner, None).await?;
                let correlator =
                    ResponseCorrelator::new(Arc::clone(&negotiator) as Arc<dyn Transport>);
                correlator.start().await?;
                negotiator.await_negotiated(DEFAULT_NEGOTIATE_TIMEOUT).await?;
                correlator
            }
            ConnectionUri::Failover { uris, .. } => {
                let failover = FailoverTransport::new(
                    uris.clone(),
                    config.failover.clone(),
                    socket_chain_factory(config.clone(), runner.clone()),
                    runner.clone(),
                );
                let correlator =
                    ResponseCorrelator::new(Arc::clone(&failover) as Arc<dyn Transport>);
                correlator.start().await?;
                failover.await_connected(STARTUP_CONNECT_WAIT).await?;
                correlator
            }
        };

        let inner = ConnectionInner::assemble(config, Arc::clone(&correlator), runner);
        correlator.set_listener(Arc::clone(&inner) as Arc<dyn TransportListener>);

        // Register with the broker before anything else can be sent.
        let info = ConnectionInfo {
            connection_id: inner.connection_id.clone(),
            client_id: inner.client_id.clone(),
            user_name: inner.config.connection.username.clone(),
            password: inner.config.connection.password.clone(),
            fault_tolerant: true,
            manageable: false,
            client_master: true,
        };
        let response = inner
            .correlator
            .request_timeout(
                Command::new(CommandKind::ConnectionInfo(info)),
                inner.config.connection.connect_response_timeout,
            )
            .await;
        if let Err(error) = response {
            let _ = inner.correlator.close().await;
            inner.runner.shutdown();
            return Err(error.context("broker rejected the connection"));
        }

        // Opt-in advisory registration: temp-destination lifecycle
        // events from the broker. Resubscribed by failover like any
        // other consumer.
        if inner.config.connection.watch_topic_advisories {
            let advisory = ConsumerInfo {
                consumer_id: ConsumerId::new(
                    inner.connection_id.value.clone(),
                    ADVISORY_SESSION,
                    1,
                ),
                destination: Destination::parse(ADVISORY_DESTINATIONS, true)?,
                prefetch_size: 1000,
                dispatch_async: true,
                selector: None,
                subscription_name: None,
                no_local: true,
                exclusive: false,
                retroactive: false,
                browser: false,
                priority: 0,
            };
            inner.oneway(CommandKind::ConsumerInfo(advisory)).await?;
        }

        tracing::info!(connection_id = %inner.connection_id, "connected");
        Ok(Self { inner })
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.inner.connection_id
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Begin (or resume) message delivery to this connection's
    /// consumers.
    pub fn start(&self) {
        self.inner.monitor.with(|| {
            self.inner.started.store(true, Ordering::Release);
            for session in self.inner.sessions.read().values() {
                session.start();
            }
        });
    }

    /// Pause delivery; messages buffer in the dispatch channels.
    pub fn stop(&self) {
        self.inner.monitor.with(|| {
            self.inner.started.store(false, Ordering::Release);
            for session in self.inner.sessions.read().values() {
                session.stop();
            }
        });
    }

    pub fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    pub async fn create_session(&self, mode: AckMode) -> Result<Session> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::illegal_state("connection is closed"));
        }
        let value = self.inner.session_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let session = SessionInner::create(Arc::clone(&self.inner), value, mode).await?;
        self.inner.sessions.write().insert(value, Arc::clone(&session));
        Ok(Session { inner: session })
    }

    /// Create a connection-scoped temporary queue; deleted with the
    /// connection.
    pub async fn create_temporary_queue(&self) -> Result<Destination> {
        self.create_temp(false).await
    }

    pub async fn create_temporary_topic(&self) -> Result<Destination> {
        self.create_temp(true).await
    }

    async fn create_temp(&self, topic: bool) -> Result<Destination> {
        let sequence = self.inner.temp_destination_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let name = format!("{}:{}", self.inner.connection_id.value, sequence);
        let destination = if topic {
            Destination::TempTopic(name)
        } else {
            Destination::TempQueue(name)
        };
        self.inner
            .request(CommandKind::DestinationInfo(DestinationInfo {
                connection_id: self.inner.connection_id.clone(),
                destination: destination.clone(),
                operation: DestinationOperation::Add,
                timeout: 0,
            }))
            .await?;
        Ok(destination)
    }

    pub async fn delete_temporary_destination(&self, destination: &Destination) -> Result<()> {
        if !destination.is_temporary() {
            return Err(Error::illegal_state("not a temporary destination"));
        }
        self.inner
            .request(CommandKind::DestinationInfo(DestinationInfo {
                connection_id: self.inner.connection_id.clone(),
                destination: destination.clone(),
                operation: DestinationOperation::Remove,
                timeout: 0,
            }))
            .await?;
        Ok(())
    }

    /// Install the handler for asynchronous connection failures.
    pub fn set_exception_listener(&self, listener: impl Fn(Error) + Send + Sync + 'static) {
        *self.inner.exception_listener.write() = Some(Arc::new(listener));
    }

    /// Close everything: sessions, the wire registration, the transport
    /// chain, and the task runner. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop();

        let sessions: Vec<Arc<SessionInner>> =
            self.inner.sessions.read().values().cloned().collect();
        for session in sessions {
            if let Err(error) = session.close().await {
                tracing::debug!(error = %error, "session close failed during connection close");
            }
        }

        let remove = self.inner.oneway(CommandKind::RemoveInfo(RemoveInfo {
            object_id: DataStructure::ConnectionId(self.inner.connection_id.clone()),
            last_delivered_sequence_id: 0,
        }));
        if let Err(error) = remove.await {
            tracing::debug!(error = %error, "connection remove failed during close");
        }
        let _ = self.inner.oneway(CommandKind::ShutdownInfo).await;

        self.inner.correlator.close().await?;
        self.inner
            .runner
            .shutdown_and_wait(self.inner.config.connection.close_timeout)
            .await;
        tracing::info!(connection_id = %self.inner.connection_id, "closed");
        Ok(())
    }
}

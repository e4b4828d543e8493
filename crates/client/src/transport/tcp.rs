// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket transport: TCP (optionally TLS) plus wire-format I/O.
//!
//! One reader task blocks on the socket, feeding the incremental
//! unmarshaller and pushing commands to the listener; one writer task
//! drains an outbound queue through the marshaller, so frame bytes are
//! written by a single task and per-sender order is preserved.
//!
//! Structural decode failures and socket errors are fatal to this
//! socket: the error goes up the chain and the loops exit. Recovery is
//! the failover supervisor's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use openwire::{Command, OpenWireFormat};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::transport::{tls, ListenerSlot, Transport, TransportListener};
use crate::uri::{BrokerUri, Scheme, TransportOptions};

const WRITE_QUEUE_DEPTH: usize = 64;
const READ_CHUNK: usize = 64 * 1024;

/// Object-safe byte stream; plain TCP or TLS.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub struct TcpTransport {
    listeners: Arc<ListenerSlot>,
    wireformat: Arc<Mutex<OpenWireFormat>>,
    writer_tx: mpsc::Sender<Command>,
    writer_rx: Mutex<Option<mpsc::Receiver<Command>>>,
    stream: Mutex<Option<Box<dyn AsyncStream>>>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    peer: String,
}

impl TcpTransport {
    /// Establish the socket (including the TLS handshake for `ssl://`
    /// URIs; the handshake always completes here, never lazily on first
    /// I/O) but do not start the I/O loops yet.
    pub async fn connect(
        uri: &BrokerUri,
        options: &TransportOptions,
        wireformat: Arc<Mutex<OpenWireFormat>>,
    ) -> Result<Arc<Self>> {
        let address = uri.address();
        let connect = TcpStream::connect(&address);
        let stream = match tokio::time::timeout(options.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                return Err(Error::io(format!("connect to {address} failed: {error}")))
            }
            Err(_) => {
                return Err(Error::Timeout(options.connect_timeout)
                    .context(&format!("connect to {address}")))
            }
        };

        apply_socket_options(&stream, options)?;

        let stream: Box<dyn AsyncStream> = match uri.scheme {
            Scheme::Tcp => Box::new(stream),
            Scheme::Ssl => tls::wrap(stream, &uri.host, options).await?,
        };

        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        Ok(Arc::new(Self {
            listeners: Arc::new(ListenerSlot::new()),
            wireformat,
            writer_tx,
            writer_rx: Mutex::new(Some(writer_rx)),
            stream: Mutex::new(Some(stream)),
            cancel: CancellationToken::new(),
            connected: Arc::new(AtomicBool::new(true)),
            peer: address,
        }))
    }
}

fn apply_socket_options(stream: &TcpStream, options: &TransportOptions) -> Result<()> {
    stream.set_nodelay(options.tcp_no_delay)?;
    let sock = SockRef::from(stream);
    if options.so_keep_alive {
        sock.set_keepalive(true)?;
    }
    if let Some(linger) = options.so_linger {
        let duration =
            if linger < 0 { None } else { Some(std::time::Duration::from_secs(linger as u64)) };
        sock.set_linger(duration)?;
    }
    if let Some(size) = options.so_receive_buffer_size {
        sock.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.so_send_buffer_size {
        sock.set_send_buffer_size(size)?;
    }
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&self) -> Result<()> {
        let Some(stream) = self.stream.lock().take() else {
            // Already started.
            return Ok(());
        };
        let Some(writer_rx) = self.writer_rx.lock().take() else {
            return Err(Error::illegal_state("socket transport started twice"));
        };

        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(read_loop(
            read_half,
            Arc::clone(&self.wireformat),
            Arc::clone(&self.listeners),
            Arc::clone(&self.connected),
            self.cancel.clone(),
            self.peer.clone(),
        ));
        tokio::spawn(write_loop(
            write_half,
            writer_rx,
            Arc::clone(&self.wireformat),
            Arc::clone(&self.listeners),
            Arc::clone(&self.connected),
            self.cancel.clone(),
            self.peer.clone(),
        ));
        Ok(())
    }

    async fn oneway(&self, command: Command) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::io(format!("socket to {} is closed", self.peer)));
        }
        self.writer_tx
            .send(command)
            .await
            .map_err(|_| Error::io(format!("socket to {} is closed", self.peer)))
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        self.cancel.cancel();
        // Releasing an unstarted stream closes the socket immediately.
        self.stream.lock().take();
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        self.listeners.set(listener);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn read_loop(
    mut read_half: ReadHalf<Box<dyn AsyncStream>>,
    wireformat: Arc<Mutex<OpenWireFormat>>,
    listeners: Arc<ListenerSlot>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    peer: String,
) {
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_half.read_buf(&mut buffer) => read,
        };
        match read {
            Ok(0) => {
                connected.store(false, Ordering::Release);
                listeners.on_exception(Error::io(format!("{peer} closed the connection")));
                break;
            }
            Ok(_) => loop {
                let decoded = wireformat.lock().unmarshal(&mut buffer);
                match decoded {
                    Ok(Some(command)) => {
                        tracing::trace!(peer = %peer, command = command.kind.name(), "recv");
                        listeners.on_command(command);
                    }
                    Ok(None) => break,
                    Err(error) => {
                        // Stream framing is lost; this socket is done.
                        connected.store(false, Ordering::Release);
                        cancel.cancel();
                        listeners.on_exception(
                            Error::from(error).context(&format!("decoding frame from {peer}")),
                        );
                        return;
                    }
                }
            },
            Err(error) => {
                connected.store(false, Ordering::Release);
                listeners.on_exception(Error::io(format!("read from {peer} failed: {error}")));
                break;
            }
        }
    }
}

async fn write_loop(
    mut write_half: WriteHalf<Box<dyn AsyncStream>>,
    mut writer_rx: mpsc::Receiver<Command>,
    wireformat: Arc<Mutex<OpenWireFormat>>,
    listeners: Arc<ListenerSlot>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    peer: String,
) {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = writer_rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let mut frame = BytesMut::new();
        let marshalled = wireformat.lock().marshal(&command, &mut frame);
        if let Err(error) = marshalled {
            connected.store(false, Ordering::Release);
            cancel.cancel();
            listeners.on_exception(
                Error::from(error).context(&format!("encoding {} frame", command.kind.name())),
            );
            break;
        }
        tracing::trace!(peer = %peer, command = command.kind.name(), bytes = frame.len(), "send");
        if let Err(error) = write_half.write_all(&frame).await {
            connected.store(false, Ordering::Release);
            listeners.on_exception(Error::io(format!("write to {peer} failed: {error}")));
            break;
        }
        if let Err(error) = write_half.flush().await {
            connected.store(false, Ordering::Release);
            listeners.on_exception(Error::io(format!("flush to {peer} failed: {error}")));
            break;
        }
    }
}

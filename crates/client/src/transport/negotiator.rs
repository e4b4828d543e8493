// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format negotiation.
//!
//! Sends the local `WireFormatInfo` as the first frame after the socket
//! comes up, applies the intersection when the peer's proposal arrives,
//! and holds every other outbound command until the framing is fixed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openwire::command::CommandKind;
use openwire::wireformat::NegotiatedConfig;
use openwire::{Command, OpenWireFormat};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::transport::{ListenerSlot, Transport, TransportListener};

/// How long outbound traffic may wait for the peer's WireFormatInfo.
pub const DEFAULT_NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct WireFormatNegotiator {
    next: Arc<dyn Transport>,
    wireformat: Arc<Mutex<OpenWireFormat>>,
    listeners: ListenerSlot,
    ready_tx: watch::Sender<bool>,
    negotiated: Mutex<Option<NegotiatedConfig>>,
    negotiate_timeout: Duration,
}

impl WireFormatNegotiator {
    /// `wireformat` is the marshaller shared with the socket transport
    /// below; renegotiation mutates it in place.
    pub fn new(
        next: Arc<dyn Transport>,
        wireformat: Arc<Mutex<OpenWireFormat>>,
    ) -> Arc<Self> {
        let (ready_tx, _) = watch::channel(false);
        let this = Arc::new(Self {
            next,
            wireformat,
            listeners: ListenerSlot::new(),
            ready_tx,
            negotiated: Mutex::new(None),
            negotiate_timeout: DEFAULT_NEGOTIATE_TIMEOUT,
        });
        this.next.set_listener(Arc::clone(&this) as Arc<dyn TransportListener>);
        this
    }

    /// Block until the WireFormatInfo exchange completes.
    pub async fn await_negotiated(&self, budget: Duration) -> Result<NegotiatedConfig> {
        let mut ready = self.ready_tx.subscribe();
        let wait = async {
            loop {
                if *ready.borrow() {
                    return;
                }
                if ready.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(budget, wait).await.is_err() {
            return Err(Error::Timeout(budget).context("wire format negotiation"));
        }
        (*self.negotiated.lock())
            .ok_or_else(|| Error::io("negotiation signalled without a config"))
    }

    pub fn negotiated_config(&self) -> Option<NegotiatedConfig> {
        *self.negotiated.lock()
    }
}

#[async_trait]
impl Transport for WireFormatNegotiator {
    async fn start(&self) -> Result<()> {
        self.next.start().await?;
        let info = self.wireformat.lock().preferred_wireformat_info();
        tracing::debug!(version = info.version, "sending wire format proposal");
        self.next.oneway(Command::new(CommandKind::WireFormatInfo(info))).await
    }

    async fn oneway(&self, command: Command) -> Result<()> {
        // Only the negotiation bootstrap may pass before the framing is
        // fixed.
        if !matches!(command.kind, CommandKind::WireFormatInfo(_)) && !*self.ready_tx.borrow() {
            self.await_negotiated(self.negotiate_timeout).await?;
        }
        self.next.oneway(command).await
    }

    async fn close(&self) -> Result<()> {
        self.next.close().await
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        self.listeners.set(listener);
    }

    fn is_connected(&self) -> bool {
        self.next.is_connected()
    }
}

impl TransportListener for WireFormatNegotiator {
    fn on_command(&self, command: Command) {
        if let CommandKind::WireFormatInfo(peer) = &command.kind {
            let config = self.wireformat.lock().renegotiate(peer);
            *self.negotiated.lock() = Some(config);
            let _ = self.ready_tx.send(true);
        }
        self.listeners.on_command(command);
    }

    fn on_exception(&self, error: Error) {
        self.listeners.on_exception(error);
    }

    fn transport_interrupted(&self) {
        self.listeners.transport_interrupted();
    }

    fn transport_resumed(&self) {
        self.listeners.transport_resumed();
    }
}

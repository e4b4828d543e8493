// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The composable transport chain.
//!
//! Every layer implements [`Transport`] and forwards inbound traffic to a
//! [`TransportListener`] installed above it. Bottom-up a direct chain is
//! TCP/TLS (with wire-format I/O) → inactivity monitor → wire-format
//! negotiator → response correlator; a failover chain inserts the
//! supervisor between the correlator and per-attempt inner chains.

pub mod correlator;
pub mod failover;
pub mod inactivity;
pub mod mock;
pub mod negotiator;
pub mod tcp;
pub mod tls;

use std::sync::Arc;

use async_trait::async_trait;
use openwire::Command;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// One layer of the transport chain.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start I/O. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Send one command; ordering is preserved per caller.
    async fn oneway(&self, command: Command) -> Result<()>;

    /// Tear down. Idempotent; outstanding operations fail with an i/o
    /// error.
    async fn close(&self) -> Result<()>;

    /// Install the upstream listener. Must be called before `start`.
    fn set_listener(&self, listener: Arc<dyn TransportListener>);

    fn is_connected(&self) -> bool;
}

/// Upstream half of a transport layer: inbound commands and failure
/// notifications. Implementations must be non-blocking; heavy work is
/// handed off to channels.
pub trait TransportListener: Send + Sync {
    fn on_command(&self, command: Command);
    fn on_exception(&self, error: Error);
    fn transport_interrupted(&self) {}
    fn transport_resumed(&self) {}
}

/// Shared listener slot used by every filter.
#[derive(Default)]
pub struct ListenerSlot {
    inner: RwLock<Option<Arc<dyn TransportListener>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, listener: Arc<dyn TransportListener>) {
        *self.inner.write() = Some(listener);
    }

    pub fn get(&self) -> Option<Arc<dyn TransportListener>> {
        self.inner.read().clone()
    }

    pub fn on_command(&self, command: Command) {
        if let Some(listener) = self.get() {
            listener.on_command(command);
        } else {
            tracing::debug!("dropping inbound command: no listener installed");
        }
    }

    pub fn on_exception(&self, error: Error) {
        if let Some(listener) = self.get() {
            listener.on_exception(error);
        }
    }

    pub fn transport_interrupted(&self) {
        if let Some(listener) = self.get() {
            listener.transport_interrupted();
        }
    }

    pub fn transport_resumed(&self) {
        if let Some(listener) = self.get() {
            listener.transport_resumed();
        }
    }
}

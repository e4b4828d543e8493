// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection state tracking for failover resubscription.
//!
//! Records the state-bearing commands a connection has sent (connection,
//! sessions, consumers, producers, open transactions) so the failover
//! supervisor can replay them, in that order, against a fresh broker
//! before any user traffic. Maps are insertion-ordered; replay order is
//! the order things were created.

use indexmap::IndexMap;
use openwire::command::{CommandKind, TransactionPhase};
use openwire::ids::{ConnectionId, ConsumerId, DataStructure, ProducerId, SessionId, TransactionId};
use openwire::Command;
use parking_lot::Mutex;

#[derive(Default)]
struct Tracked {
    connections: IndexMap<ConnectionId, Command>,
    sessions: IndexMap<SessionId, Command>,
    consumers: IndexMap<ConsumerId, Command>,
    producers: IndexMap<ProducerId, Command>,
    transactions: IndexMap<TransactionId, Command>,
}

#[derive(Default)]
pub struct ConnectionStateTracker {
    inner: Mutex<Tracked>,
}

impl ConnectionStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe an outbound command and fold it into the tracked state.
    pub fn track(&self, command: &Command) {
        let mut tracked = self.inner.lock();
        match &command.kind {
            CommandKind::ConnectionInfo(info) => {
                tracked.connections.insert(info.connection_id.clone(), command.clone());
            }
            CommandKind::SessionInfo(info) => {
                tracked.sessions.insert(info.session_id.clone(), command.clone());
            }
            CommandKind::ConsumerInfo(info) => {
                tracked.consumers.insert(info.consumer_id.clone(), command.clone());
            }
            CommandKind::ProducerInfo(info) => {
                tracked.producers.insert(info.producer_id.clone(), command.clone());
            }
            CommandKind::TransactionInfo(info) => match info.phase {
                TransactionPhase::Begin => {
                    tracked.transactions.insert(info.transaction_id.clone(), command.clone());
                }
                TransactionPhase::CommitOnePhase
                | TransactionPhase::CommitTwoPhase
                | TransactionPhase::Rollback
                | TransactionPhase::Forget => {
                    tracked.transactions.shift_remove(&info.transaction_id);
                }
                _ => {}
            },
            CommandKind::RemoveInfo(remove) => Self::remove(&mut tracked, &remove.object_id),
            _ => {}
        }
    }

    fn remove(tracked: &mut Tracked, object_id: &DataStructure) {
        match object_id {
            DataStructure::ConnectionId(id) => {
                tracked.connections.shift_remove(id);
                tracked.sessions.retain(|s, _| s.connection_id != id.value);
                tracked.consumers.retain(|c, _| c.connection_id != id.value);
                tracked.producers.retain(|p, _| p.connection_id != id.value);
                tracked.transactions.retain(|t, _| match t {
                    TransactionId::Local { connection_id, .. } => *connection_id != id.value,
                    TransactionId::Xa { .. } => true,
                });
            }
            DataStructure::SessionId(id) => {
                tracked.sessions.shift_remove(id);
                tracked.consumers.retain(|c, _| {
                    c.connection_id != id.connection_id || c.session_id != id.value
                });
                tracked.producers.retain(|p, _| {
                    p.connection_id != id.connection_id || p.session_id != id.value
                });
            }
            DataStructure::ConsumerId(id) => {
                tracked.consumers.shift_remove(id);
            }
            DataStructure::ProducerId(id) => {
                tracked.producers.shift_remove(id);
            }
            _ => {}
        }
    }

    /// Commands to replay on a fresh broker, resubscription order:
    /// connection, sessions, consumers, producers, open transactions.
    /// Original command ids are preserved.
    pub fn restore_commands(&self) -> Vec<Command> {
        let tracked = self.inner.lock();
        let mut commands = Vec::with_capacity(
            tracked.connections.len()
                + tracked.sessions.len()
                + tracked.consumers.len()
                + tracked.producers.len()
                + tracked.transactions.len(),
        );
        commands.extend(tracked.connections.values().cloned());
        commands.extend(tracked.sessions.values().cloned());
        commands.extend(tracked.consumers.values().cloned());
        commands.extend(tracked.producers.values().cloned());
        commands.extend(tracked.transactions.values().cloned());
        commands
    }

    pub fn is_empty(&self) -> bool {
        let tracked = self.inner.lock();
        tracked.connections.is_empty()
            && tracked.sessions.is_empty()
            && tracked.consumers.is_empty()
            && tracked.producers.is_empty()
            && tracked.transactions.is_empty()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

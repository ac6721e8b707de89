//! Live connection registry.
//!
//! Pure data: it is owned by the coordinator behind a mutex and never awaits.
//! Each entry holds the only strong sender of its connection's outbound
//! queue, so removing an entry is what closes that queue.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{ServerFrame, GLOBAL_CONVERSATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type OutboundSender = mpsc::Sender<ServerFrame>;

struct ConnectionEntry {
    user_id: i64,
    conversation_id: i64,
    outbound: OutboundSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { from: i64 },
    Unchanged,
    UnknownConnection,
}

/// Result of one fan-out.
#[derive(Debug, Default)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: Vec<ConnectionId>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    pub connections: usize,
    pub users: usize,
    pub global: usize,
    pub conversations: BTreeMap<i64, usize>,
    #[serde(skip)]
    pub assignments: BTreeMap<ConnectionId, i64>,
}

impl RegistrySnapshot {
    pub fn conversation_of(&self, id: ConnectionId) -> Option<i64> {
        self.assignments.get(&id).copied()
    }

    pub fn members_of(&self, conversation_id: i64) -> usize {
        self.conversations.get(&conversation_id).copied().unwrap_or(0)
    }
}

#[derive(Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    conversations: HashMap<i64, Vec<ConnectionId>>,
    users: HashMap<i64, Vec<ConnectionId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Add a connection. Returns false if the id is already registered.
    pub fn insert(
        &mut self,
        id: ConnectionId,
        user_id: i64,
        conversation_id: i64,
        outbound: OutboundSender,
    ) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }

        self.connections.insert(
            id,
            ConnectionEntry {
                user_id,
                conversation_id,
                outbound,
            },
        );
        self.users.entry(user_id).or_default().push(id);
        self.attach(id, conversation_id);
        true
    }

    /// Move a connection to another conversation, leaving the previous one.
    pub fn move_to(&mut self, id: ConnectionId, conversation_id: i64) -> MoveOutcome {
        let Some(entry) = self.connections.get_mut(&id) else {
            return MoveOutcome::UnknownConnection;
        };
        if entry.conversation_id == conversation_id {
            return MoveOutcome::Unchanged;
        }

        let from = std::mem::replace(&mut entry.conversation_id, conversation_id);
        self.detach(id, from);
        self.attach(id, conversation_id);
        MoveOutcome::Moved { from }
    }

    /// Remove a connection, closing its outbound queue.
    ///
    /// Returns the user and conversation it was registered under, or `None`
    /// if it was already gone.
    pub fn remove(&mut self, id: ConnectionId) -> Option<(i64, i64)> {
        let entry = self.connections.remove(&id)?;
        self.detach(id, entry.conversation_id);

        if let Some(ids) = self.users.get_mut(&entry.user_id) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.users.remove(&entry.user_id);
            }
        }

        Some((entry.user_id, entry.conversation_id))
    }

    /// Enqueue a frame for a single connection without waiting.
    ///
    /// A full or closed queue removes the connection; returns whether the
    /// frame was accepted.
    pub fn offer(&mut self, id: ConnectionId, frame: ServerFrame) -> bool {
        let Some(entry) = self.connections.get(&id) else {
            return false;
        };

        match entry.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %id, user_id = entry.user_id, "outbound queue full, disconnecting");
                self.remove(id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %id, "outbound queue already closed");
                self.remove(id);
                false
            }
        }
    }

    /// Fan a frame out to every connection registered for a conversation.
    ///
    /// Connections whose queue cannot take the frame are removed; the rest
    /// still receive it.
    pub fn deliver(&mut self, conversation_id: i64, frame: &ServerFrame) -> Delivery {
        let mut delivery = Delivery::default();
        if conversation_id == GLOBAL_CONVERSATION {
            return delivery;
        }

        let targets = self
            .conversations
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();

        for id in targets {
            if self.offer(id, frame.clone()) {
                delivery.delivered += 1;
            } else {
                delivery.dropped.push(id);
            }
        }

        delivery
    }

    /// Whether any connection of `user_id` is registered for the conversation.
    pub fn is_present(&self, user_id: i64, conversation_id: i64) -> bool {
        self.users.get(&user_id).is_some_and(|ids| {
            ids.iter().any(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|entry| entry.conversation_id == conversation_id)
            })
        })
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let assignments: BTreeMap<ConnectionId, i64> = self
            .connections
            .iter()
            .map(|(id, entry)| (*id, entry.conversation_id))
            .collect();

        RegistrySnapshot {
            connections: self.connections.len(),
            users: self.users.len(),
            global: assignments
                .values()
                .filter(|conversation_id| **conversation_id == GLOBAL_CONVERSATION)
                .count(),
            conversations: self
                .conversations
                .iter()
                .map(|(conversation_id, ids)| (*conversation_id, ids.len()))
                .collect(),
            assignments,
        }
    }

    fn attach(&mut self, id: ConnectionId, conversation_id: i64) {
        if conversation_id != GLOBAL_CONVERSATION {
            self.conversations.entry(conversation_id).or_default().push(id);
        }
    }

    fn detach(&mut self, id: ConnectionId, conversation_id: i64) {
        if let Some(ids) = self.conversations.get_mut(&conversation_id) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.conversations.remove(&conversation_id);
            }
        }
    }
}

//! Room registry routing server events to live connections.
//!
//! A room is a named fan-out set: `chat_<id>` for chat membership and
//! `user_<id>` for direct-to-user delivery (call signaling, balance
//! updates). Connections register an unbounded sender per room; closed
//! receivers are pruned lazily during broadcast.

use crate::events::ServerEvent;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Identifies one fan-out room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Chat(i64),
    User(i64),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(id) => write!(f, "chat_{id}"),
            Self::User(id) => write!(f, "user_{id}"),
        }
    }
}

/// Registry of rooms and the connections inside them.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, DashMap<u64, mpsc::UnboundedSender<ServerEvent>>>,
    next_conn_id: AtomicU64,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection id. Ids are unique per process lifetime.
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection's sender in a room. Joining twice replaces
    /// the previous sender.
    pub fn join(&self, room: RoomId, conn_id: u64, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.rooms
            .entry(room)
            .or_default()
            .insert(conn_id, tx);
    }

    /// Remove a connection from one room. Empty rooms are dropped.
    pub fn leave(&self, room: RoomId, conn_id: u64) {
        if let Some(members) = self.rooms.get(&room) {
            members.remove(&conn_id);
        }
        self.rooms
            .remove_if(&room, |_, members| members.is_empty());
    }

    /// Remove a connection from every room it joined.
    pub fn leave_all(&self, conn_id: u64) {
        for members in self.rooms.iter() {
            members.remove(&conn_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
    }

    /// Send an event to every live connection in a room. Returns the
    /// number of connections reached; dead senders are pruned.
    pub fn broadcast(&self, room: RoomId, event: &ServerEvent) -> usize {
        let Some(members) = self.rooms.get(&room) else {
            return 0;
        };

        let mut reached = 0;
        let mut dead = Vec::new();
        for entry in members.iter() {
            if entry.value().send(event.clone()).is_ok() {
                reached += 1;
            } else {
                dead.push(*entry.key());
            }
        }
        for conn_id in dead {
            members.remove(&conn_id);
        }
        reached
    }

    /// Number of connections currently in a room.
    pub fn room_size(&self, room: RoomId) -> usize {
        self.rooms.get(&room).map_or(0, |members| members.len())
    }
}

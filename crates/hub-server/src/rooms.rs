//! Connection and room registry.
//!
//! Every WebSocket registers an outbound channel here. Joining a room labels
//! the connection with a user id; a room holds every connection of one
//! logical user, so a push to the room reaches each device once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use hub_shared::{ConnectionId, UserId};

use crate::events::ServerEvent;

/// Outbound half of a connection's event channel.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Push side of the gateway, injected wherever events are produced.
pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to the union of the rooms named by `users`, each
    /// connection at most once. Returns the number of connections reached.
    fn send_to_users(&self, event: &ServerEvent, users: &[UserId]) -> usize;

    fn send_to_user(&self, event: &ServerEvent, user: &UserId) -> usize {
        self.send_to_users(event, std::slice::from_ref(user))
    }
}

struct Session {
    tx: Outbound,
    rooms: HashSet<UserId>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<ConnectionId, Session>,
    rooms: HashMap<UserId, HashSet<ConnectionId>>,
}

/// What was left behind when a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub user_id: UserId,
    /// Connections still in that user's room.
    pub remaining: usize,
}

#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tx: Outbound) -> ConnectionId {
        let id = ConnectionId::new();
        self.inner.write().sessions.insert(
            id,
            Session {
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!(connection = %id, "Connection registered");
        id
    }

    /// Put a connection into `user`'s room. Returns `false` if the connection
    /// is not registered.
    pub fn join(&self, conn: ConnectionId, user: &UserId) -> bool {
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.get_mut(&conn) else {
            return false;
        };
        session.rooms.insert(user.clone());
        let room = inner.rooms.entry(user.clone()).or_default();
        room.insert(conn);

        info!(
            connection = %conn,
            user = %user,
            devices = room.len(),
            "Joined user room"
        );
        true
    }

    /// Drop a connection and leave all of its rooms. Empty rooms are removed.
    pub fn unregister(&self, conn: ConnectionId) -> Vec<Departure> {
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.remove(&conn) else {
            return Vec::new();
        };

        let mut departures = Vec::with_capacity(session.rooms.len());
        for user in session.rooms {
            let remaining = match inner.rooms.get_mut(&user) {
                Some(room) => {
                    room.remove(&conn);
                    room.len()
                }
                None => 0,
            };
            if remaining == 0 {
                inner.rooms.remove(&user);
                debug!(user = %user, "Removed empty room");
            }
            departures.push(Departure {
                user_id: user,
                remaining,
            });
        }

        debug!(connection = %conn, "Connection unregistered");
        departures
    }

    /// Whether `conn` has joined `user`'s room.
    pub fn is_member(&self, conn: ConnectionId, user: &UserId) -> bool {
        self.inner
            .read()
            .sessions
            .get(&conn)
            .map(|s| s.rooms.contains(user))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn device_count(&self, user: &UserId) -> usize {
        self.inner
            .read()
            .rooms
            .get(user)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Push to one connection only (error replies go back to the originator).
    pub fn send_to_connection(&self, conn: ConnectionId, event: &ServerEvent) -> bool {
        let inner = self.inner.read();
        match inner.sessions.get(&conn) {
            Some(session) => deliver(conn, &session.tx, event),
            None => false,
        }
    }

    /// Push to every connection that is not in `user`'s room.
    pub fn send_to_others(&self, user: &UserId, event: &ServerEvent) -> usize {
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .filter(|(_, session)| !session.rooms.contains(user))
            .filter(|(id, session)| deliver(**id, &session.tx, event))
            .count()
    }
}

impl Broadcaster for RoomRegistry {
    fn send_to_users(&self, event: &ServerEvent, users: &[UserId]) -> usize {
        let inner = self.inner.read();

        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for user in users {
            match inner.rooms.get(user) {
                Some(room) => targets.extend(room.iter().copied()),
                None => debug!(user = %user, event = event.name(), "No open room, push dropped"),
            }
        }

        targets
            .into_iter()
            .filter(|conn| {
                inner
                    .sessions
                    .get(conn)
                    .map(|session| deliver(*conn, &session.tx, event))
                    .unwrap_or(false)
            })
            .count()
    }
}

fn deliver(conn: ConnectionId, tx: &Outbound, event: &ServerEvent) -> bool {
    if tx.send(event.clone()).is_err() {
        debug!(connection = %conn, event = event.name(), "Connection closed, push dropped");
        return false;
    }
    true
}

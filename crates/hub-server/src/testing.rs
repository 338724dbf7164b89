//! Fixtures shared by the server's unit tests.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use hub_shared::{ConnectionId, UserId};
use hub_store::{Database, NewUser};

use crate::events::ServerEvent;
use crate::rooms::RoomRegistry;
use crate::Db;

pub fn test_db() -> Db {
    Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
}

/// Register a connection and join `user`'s room.
pub fn connect(
    rooms: &RoomRegistry,
    user: &str,
) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = rooms.register(tx);
    rooms.join(conn, &UserId::from(user));
    (conn, rx)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

pub async fn seed_user(db: &Db, id: &str, first_name: &str, email: Option<&str>) {
    db.lock()
        .await
        .upsert_user(&NewUser {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: String::new(),
            email: email.map(str::to_string),
            role: "agency".to_string(),
            ..NewUser::default()
        })
        .unwrap();
}

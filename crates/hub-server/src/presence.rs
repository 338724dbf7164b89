//! Online/offline flag: persisted on the user row, announced to every
//! connection outside the user's own room.

use tracing::{debug, info, warn};

use hub_shared::UserId;

use crate::events::{PresenceChange, ServerEvent};
use crate::rooms::RoomRegistry;
use crate::Db;

#[derive(Clone)]
pub struct Presence {
    db: Db,
    rooms: RoomRegistry,
}

impl Presence {
    pub fn new(db: Db, rooms: RoomRegistry) -> Self {
        Self { db, rooms }
    }

    pub async fn mark_online(&self, user: &UserId) {
        self.set(user, true).await;
        let reached = self.rooms.send_to_others(
            user,
            &ServerEvent::UserOnline(PresenceChange {
                user_id: user.clone(),
            }),
        );
        info!(user = %user, notified = reached, "User online");
    }

    pub async fn mark_offline(&self, user: &UserId) {
        self.set(user, false).await;
        let reached = self.rooms.send_to_others(
            user,
            &ServerEvent::UserOffline(PresenceChange {
                user_id: user.clone(),
            }),
        );
        info!(user = %user, notified = reached, "User offline");
    }

    // The flag only drives the online dot; a failed write is not fatal.
    async fn set(&self, user: &UserId, online: bool) {
        let db = self.db.lock().await;
        if online {
            match db.ensure_user(user) {
                Ok(true) => debug!(user = %user, "Placeholder user row created"),
                Ok(false) => {}
                Err(e) => warn!(user = %user, error = %e, "Failed to create user row"),
            }
        }
        match db.set_online(user, online) {
            Ok(true) => {}
            Ok(false) => debug!(user = %user, "Presence change for unknown user"),
            Err(e) => warn!(user = %user, error = %e, "Failed to persist presence"),
        }
    }
}

//! Connection lifecycle: register, join a user room, explicit offline
//! notice, transport close.

use tracing::{debug, warn};

use hub_shared::{ConnectionId, ProtocolError, UserId};

use crate::auth::Credentials;
use crate::error::ChatError;
use crate::events::ServerEvent;
use crate::presence::Presence;
use crate::rooms::{Outbound, RoomRegistry};

pub struct Gateway {
    rooms: RoomRegistry,
    presence: Presence,
    credentials: Credentials,
    presence_on_close: bool,
}

impl Gateway {
    pub fn new(
        rooms: RoomRegistry,
        presence: Presence,
        credentials: Credentials,
        presence_on_close: bool,
    ) -> Self {
        Self {
            rooms,
            presence,
            credentials,
            presence_on_close,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn on_connect(&self, tx: Outbound) -> ConnectionId {
        self.rooms.register(tx)
    }

    /// Check the room token, label the connection with `user` and announce
    /// them online.
    pub async fn on_join_room(
        &self,
        conn: ConnectionId,
        user: &UserId,
        token: Option<&str>,
    ) -> Result<(), ChatError> {
        if user.is_blank() {
            warn!(connection = %conn, "ROOM without a user id ignored");
            return Err(ProtocolError::Malformed("ROOM without a user id".into()).into());
        }
        if !self.credentials.verify_user(user, token) {
            warn!(connection = %conn, user = %user, "ROOM with a bad token refused");
            return Err(ChatError::Unauthenticated);
        }
        if !self.rooms.join(conn, user) {
            warn!(connection = %conn, "ROOM on an unregistered connection");
            return Ok(());
        }
        self.presence.mark_online(user).await;
        Ok(())
    }

    /// The client says the user is going offline. Only honoured from a
    /// connection that joined that user's room.
    pub async fn on_disconnect_notice(&self, conn: ConnectionId, user: &UserId) -> bool {
        if !self.rooms.is_member(conn, user) {
            warn!(connection = %conn, user = %user, "USER_DISCONNECTED for a foreign user ignored");
            return false;
        }
        self.presence.mark_offline(user).await;
        true
    }

    /// The socket went away. Presence is left alone unless configured
    /// otherwise and this was the user's last device.
    pub async fn on_close(&self, conn: ConnectionId) {
        for departure in self.rooms.unregister(conn) {
            debug!(
                connection = %conn,
                user = %departure.user_id,
                remaining = departure.remaining,
                "Left user room"
            );
            if self.presence_on_close && departure.remaining == 0 {
                self.presence.mark_offline(&departure.user_id).await;
            }
        }
    }

    pub fn owns(&self, conn: ConnectionId, user: &UserId) -> bool {
        self.rooms.is_member(conn, user)
    }

    /// Reply to the originating connection only.
    pub fn reply(&self, conn: ConnectionId, event: &ServerEvent) {
        self.rooms.send_to_connection(conn, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, names, seed_user, test_db};
    use crate::Db;
    use tokio::sync::mpsc;

    fn gateway(db: &Db, presence_on_close: bool) -> Gateway {
        gateway_with(db, Credentials::default(), presence_on_close)
    }

    fn gateway_with(db: &Db, credentials: Credentials, presence_on_close: bool) -> Gateway {
        let rooms = RoomRegistry::new();
        let presence = Presence::new(db.clone(), rooms.clone());
        Gateway::new(rooms, presence, credentials, presence_on_close)
    }

    fn open(gw: &Gateway) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (gw.on_connect(tx), rx)
    }

    async fn online(db: &Db, user: &str) -> bool {
        db.lock().await.is_online(&user.into()).unwrap()
    }

    #[tokio::test]
    async fn test_join_announces_to_others_only() {
        let db = test_db();
        seed_user(&db, "alice", "Alice", None).await;
        let gw = gateway(&db, false);

        let (bob_conn, mut bob_rx) = open(&gw);
        gw.on_join_room(bob_conn, &"bob".into(), None).await.unwrap();
        let (alice_phone, mut phone_rx) = open(&gw);
        gw.on_join_room(alice_phone, &"alice".into(), None).await.unwrap();
        drain(&mut bob_rx);

        let (alice_laptop, mut laptop_rx) = open(&gw);
        gw.on_join_room(alice_laptop, &"alice".into(), None).await.unwrap();

        assert_eq!(names(&drain(&mut bob_rx)), vec!["USER_ONLINE"]);
        assert!(drain(&mut phone_rx).is_empty());
        assert!(drain(&mut laptop_rx).is_empty());
        assert!(online(&db, "alice").await);
    }

    #[tokio::test]
    async fn test_blank_room_rejected() {
        let db = test_db();
        let gw = gateway(&db, false);
        let (conn, _rx) = open(&gw);
        assert!(gw.on_join_room(conn, &"  ".into(), None).await.is_err());
        assert_eq!(gw.rooms().connection_count(), 1);
    }

    #[tokio::test]
    async fn test_join_requires_valid_token() {
        let db = test_db();
        let credentials = Credentials::new(Some("s3cret"));
        let alice_token = credentials.issue(&"alice".into()).unwrap();
        let gw = gateway_with(&db, credentials, false);
        let (bob, mut bob_rx) = open(&gw);
        let bob_token = Credentials::new(Some("s3cret")).issue(&"bob".into()).unwrap();
        gw.on_join_room(bob, &"bob".into(), Some(&bob_token)).await.unwrap();
        drain(&mut bob_rx);

        let (mallory, _m) = open(&gw);
        for token in [None, Some("forged"), Some(bob_token.as_str())] {
            assert!(matches!(
                gw.on_join_room(mallory, &"alice".into(), token).await,
                Err(ChatError::Unauthenticated)
            ));
        }
        assert!(!gw.owns(mallory, &"alice".into()));
        assert!(drain(&mut bob_rx).is_empty());
        assert!(!online(&db, "alice").await);

        let (alice, _a) = open(&gw);
        gw.on_join_room(alice, &"alice".into(), Some(&alice_token))
            .await
            .unwrap();
        assert!(gw.owns(alice, &"alice".into()));
        assert_eq!(names(&drain(&mut bob_rx)), vec!["USER_ONLINE"]);
    }

    #[tokio::test]
    async fn test_join_stores_presence_for_unsynced_user() {
        let db = test_db();
        let gw = gateway(&db, false);
        let (conn, _rx) = open(&gw);

        gw.on_join_room(conn, &"newcomer".into(), None).await.unwrap();

        assert!(online(&db, "newcomer").await);
    }

    #[tokio::test]
    async fn test_disconnect_notice_flips_offline() {
        let db = test_db();
        seed_user(&db, "alice", "Alice", None).await;
        let gw = gateway(&db, false);
        let (alice, _alice_rx) = open(&gw);
        let (bob, mut bob_rx) = open(&gw);
        gw.on_join_room(alice, &"alice".into(), None).await.unwrap();
        gw.on_join_room(bob, &"bob".into(), None).await.unwrap();
        drain(&mut bob_rx);

        assert!(gw.on_disconnect_notice(alice, &"alice".into()).await);
        assert!(!online(&db, "alice").await);
        assert_eq!(names(&drain(&mut bob_rx)), vec!["USER_OFFLINE"]);
    }

    #[tokio::test]
    async fn test_disconnect_notice_for_other_user_ignored() {
        let db = test_db();
        seed_user(&db, "alice", "Alice", None).await;
        let gw = gateway(&db, false);
        let (alice, _a) = open(&gw);
        let (mallory, _m) = open(&gw);
        gw.on_join_room(alice, &"alice".into(), None).await.unwrap();
        gw.on_join_room(mallory, &"mallory".into(), None).await.unwrap();

        assert!(!gw.on_disconnect_notice(mallory, &"alice".into()).await);
        assert!(online(&db, "alice").await);
    }

    #[tokio::test]
    async fn test_close_leaves_presence_by_default() {
        let db = test_db();
        seed_user(&db, "alice", "Alice", None).await;
        let gw = gateway(&db, false);
        let (conn, _rx) = open(&gw);
        gw.on_join_room(conn, &"alice".into(), None).await.unwrap();

        gw.on_close(conn).await;

        assert!(online(&db, "alice").await);
        assert!(!gw.owns(conn, &"alice".into()));
    }

    #[tokio::test]
    async fn test_close_flips_presence_on_last_device_when_enabled() {
        let db = test_db();
        seed_user(&db, "alice", "Alice", None).await;
        let gw = gateway(&db, true);
        let (phone, _p) = open(&gw);
        let (laptop, _l) = open(&gw);
        gw.on_join_room(phone, &"alice".into(), None).await.unwrap();
        gw.on_join_room(laptop, &"alice".into(), None).await.unwrap();

        gw.on_close(phone).await;
        assert!(online(&db, "alice").await);

        gw.on_close(laptop).await;
        assert!(!online(&db, "alice").await);
    }
}

//! Direct and group chat relay.
//!
//! Every action validates first, persists second, then fans out. A rejected
//! action writes nothing: no row, no file, no notification.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hub_shared::constants::{CANNOT_DELETE_TEXT, CHAT_CLEARED_TEXT};
use hub_shared::media::MediaKind;
use hub_shared::protocol::MediaUpload;
use hub_shared::{ChatTarget, GroupId, MessageType, NotificationType, ProtocolError, UserId};
use hub_store::{ChatMessage, Database, NewChatMessage, StoreError};

use crate::error::ChatError;
use crate::events::{ChatCleared, DeletedRef, ReactionUpdate, ServerEvent};
use crate::media_store::MediaStore;
use crate::notify::NotificationService;
use crate::rooms::Broadcaster;
use crate::Db;

/// Who a message reaches besides its sender.
#[derive(Debug, Clone)]
enum Audience {
    Direct(UserId),
    Group { id: GroupId, members: Vec<UserId> },
}

pub struct ChatRelay {
    db: Db,
    broadcaster: Arc<dyn Broadcaster>,
    notifier: NotificationService,
    media: MediaStore,
    max_media_size: usize,
}

impl ChatRelay {
    pub fn new(
        db: Db,
        broadcaster: Arc<dyn Broadcaster>,
        notifier: NotificationService,
        media: MediaStore,
        max_media_size: usize,
    ) -> Self {
        Self {
            db,
            broadcaster,
            notifier,
            media,
            max_media_size,
        }
    }

    pub async fn send_message(
        &self,
        from: &UserId,
        target: ChatTarget,
        text: &str,
    ) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProtocolError::EmptyMessage.into());
        }

        let audience = self.audience(from, &target).await?;
        let new = NewChatMessage {
            from_user: from.clone(),
            to_user: audience.direct().cloned(),
            group_id: audience.group().cloned(),
            message: Some(text.to_string()),
            message_type: MessageType::Message,
            media_url: None,
            original_file_name: None,
        };

        let message = self.db.lock().await.insert_chat_message(&new)?;
        self.fan_out(&message, &audience).await;
        Ok(message)
    }

    pub async fn send_media(
        &self,
        kind: MediaKind,
        upload: &MediaUpload,
    ) -> Result<ChatMessage, ChatError> {
        let target = upload.target()?;
        let bytes = upload.decode_buffer()?;
        let format = kind.validate(&bytes, self.max_media_size)?;
        let audience = self.audience(&upload.from_user, &target).await?;

        let reference = self
            .media
            .store(&bytes, format)
            .await
            .map_err(ChatError::Storage)?;

        let new = NewChatMessage {
            from_user: upload.from_user.clone(),
            to_user: audience.direct().cloned(),
            group_id: audience.group().cloned(),
            message: None,
            message_type: kind.message_type(),
            media_url: Some(reference.clone()),
            original_file_name: upload.file_name.clone(),
        };

        let inserted = self.db.lock().await.insert_chat_message(&new);
        let message = match inserted {
            Ok(message) => message,
            Err(e) => {
                // No row, no file.
                if let Err(rm) = self.media.remove(&reference).await {
                    warn!(file = %reference, error = %rm, "Failed to clean up orphaned attachment");
                }
                return Err(e.into());
            }
        };

        debug!(
            id = %message.id,
            kind = ?kind,
            size = bytes.len(),
            "Attachment stored"
        );
        self.fan_out(&message, &audience).await;
        Ok(message)
    }

    /// Retract a message. Only its author may, and only until the receiver
    /// has read it.
    pub async fn delete_message(
        &self,
        chat_id: Uuid,
        from: &UserId,
        to: &UserId,
    ) -> Result<(), ChatError> {
        let message = {
            let db = self.db.lock().await;
            let message = live_message(&db, chat_id)?;

            if message.from_user != *from {
                return Err(ChatError::CannotDelete(
                    "Only the sender can delete this message".to_string(),
                ));
            }
            if message.to_user.as_ref().is_some_and(|recipient| recipient != to) {
                return Err(ChatError::MessageNotFound);
            }
            if db.chat_notification_read(chat_id)? {
                return Err(ChatError::CannotDelete(CANNOT_DELETE_TEXT.to_string()));
            }
            if !db.soft_delete_chat_message(chat_id)? {
                return Err(ChatError::MessageNotFound);
            }
            if let Err(e) = db.soft_delete_notifications_for_reference(&chat_id.to_string()) {
                warn!(id = %chat_id, error = %e, "Failed to retire chat notification");
            }
            message
        };

        // The conditional tombstone above guarantees one unlink per message.
        if let Some(reference) = message.media_url() {
            match self.media.remove(reference).await {
                Ok(true) => {}
                Ok(false) => warn!(file = %reference, "Attachment already missing"),
                Err(e) => warn!(file = %reference, error = %e, "Failed to remove attachment"),
            }
        }

        self.broadcaster.send_to_user(
            &ServerEvent::MessageDeleted(DeletedRef { id: chat_id }),
            from,
        );
        info!(id = %chat_id, user = %from, "Message deleted");
        Ok(())
    }

    /// Tombstone the whole conversation between `a` and `b`.
    pub async fn clear_chat(&self, a: &UserId, b: &UserId) -> Result<usize, ChatError> {
        let cleared = {
            let db = self.db.lock().await;
            let cleared = db.clear_direct_chat(a, b)?;
            db.soft_delete_chat_notifications(a, b)?;
            cleared
        };

        self.broadcaster.send_to_user(
            &ServerEvent::ChatCleared(ChatCleared {
                message: CHAT_CLEARED_TEXT.to_string(),
            }),
            a,
        );
        info!(user = %a, with = %b, cleared, "Chat cleared");
        Ok(cleared)
    }

    /// Conversation between `a` and `b`, oldest first. Viewing it marks what
    /// `b` sent to `a` as read.
    pub async fn aggregate_history(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let db = self.db.lock().await;
        let history = db.direct_history(a, b)?;
        db.mark_chat_notifications_read(a, b)?;
        Ok(history)
    }

    pub async fn group_history(&self, group: &GroupId) -> Result<Vec<ChatMessage>, ChatError> {
        Ok(self.db.lock().await.group_history(group)?)
    }

    /// `a` has the conversation with `b` open; what `b` sends is read.
    pub async fn ongoing_chat(&self, a: &UserId, b: &UserId) -> Result<usize, ChatError> {
        Ok(self.db.lock().await.mark_chat_notifications_read(a, b)?)
    }

    /// Toggle `user`'s `emoji` on a message and push the updated message to
    /// everyone in the conversation.
    pub async fn react(
        &self,
        chat_id: Uuid,
        user: &UserId,
        emoji: &str,
    ) -> Result<ChatMessage, ChatError> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(ProtocolError::EmptyMessage.into());
        }

        let (message, participants) = {
            let db = self.db.lock().await;
            let message = live_message(&db, chat_id)?;
            let participants = match (&message.to_user, &message.group_id) {
                (_, Some(group)) => db.group_members(group)?,
                (Some(to), None) => vec![message.from_user.clone(), to.clone()],
                (None, None) => vec![message.from_user.clone()],
            };
            if !participants.contains(user) {
                return Err(ChatError::NotParticipant);
            }

            if !db.add_reaction(chat_id, user, emoji)? {
                db.remove_reaction(chat_id, user, emoji)?;
            }
            (db.get_chat_message(chat_id)?, participants)
        };

        self.broadcaster.send_to_users(
            &ServerEvent::ReactionUpdated(ReactionUpdate {
                chat: message.clone(),
            }),
            &participants,
        );
        Ok(message)
    }

    async fn audience(&self, from: &UserId, target: &ChatTarget) -> Result<Audience, ChatError> {
        match target {
            ChatTarget::Direct(to) => Ok(Audience::Direct(to.clone())),
            ChatTarget::Group(id) => {
                let members = self.db.lock().await.group_members(id)?;
                if !members.contains(from) {
                    return Err(ChatError::NotMember(id.clone()));
                }
                Ok(Audience::Group {
                    id: id.clone(),
                    members,
                })
            }
        }
    }

    /// Push the message to every device of everyone involved, then raise a
    /// notification for each receiver.
    async fn fan_out(&self, message: &ChatMessage, audience: &Audience) {
        let from = &message.from_user;
        let (rooms, receivers, kind) = match audience {
            Audience::Direct(to) => (
                vec![from.clone(), to.clone()],
                vec![to.clone()],
                NotificationType::Chat,
            ),
            Audience::Group { members, .. } => (
                members.clone(),
                members.iter().filter(|m| *m != from).cloned().collect(),
                NotificationType::Group,
            ),
        };

        let event = ServerEvent::received(message.clone());
        let reached = self.broadcaster.send_to_users(&event, &rooms);
        debug!(id = %message.id, event = event.name(), devices = reached, "Chat message relayed");

        let preview = preview(message);
        let reference = message.id.to_string();
        let notifications = receivers
            .iter()
            .filter(|receiver| *receiver != from)
            .map(|receiver| {
                self.notifier
                    .create_and_push(receiver, kind, &reference, &preview, Some(from))
            });

        for result in join_all(notifications).await {
            if let Err(e) = result {
                warn!(id = %message.id, error = %e, "Failed to create chat notification");
            }
        }
    }
}

impl Audience {
    fn direct(&self) -> Option<&UserId> {
        match self {
            Audience::Direct(to) => Some(to),
            Audience::Group { .. } => None,
        }
    }

    fn group(&self) -> Option<&GroupId> {
        match self {
            Audience::Direct(_) => None,
            Audience::Group { id, .. } => Some(id),
        }
    }
}

fn live_message(db: &Database, chat_id: Uuid) -> Result<ChatMessage, ChatError> {
    match db.get_chat_message(chat_id) {
        Ok(message) if !message.is_deleted => Ok(message),
        Ok(_) | Err(StoreError::NotFound) => Err(ChatError::MessageNotFound),
        Err(e) => Err(e.into()),
    }
}

fn preview(message: &ChatMessage) -> String {
    match message.message_type {
        MessageType::Message => message.message.clone().unwrap_or_default(),
        MessageType::Image => "Sent an image".to_string(),
        MessageType::Document => "Sent a document".to_string(),
        MessageType::Audio => "Sent a voice note".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::LogMailer;
    use crate::rooms::RoomRegistry;
    use crate::testing::{connect, drain, names, test_db};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use hub_store::MarkRead;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    struct Fixture {
        relay: ChatRelay,
        db: Db,
        rooms: RoomRegistry,
        media: MediaStore,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = test_db();
        let rooms = RoomRegistry::new();
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(rooms.clone());
        let media = MediaStore::new(dir.path().join("uploads")).await.unwrap();
        let notifier = NotificationService::new(db.clone(), broadcaster.clone(), Arc::new(LogMailer));
        let relay = ChatRelay::new(db.clone(), broadcaster, notifier, media.clone(), 1024);
        Fixture {
            relay,
            db,
            rooms,
            media,
            _dir: dir,
        }
    }

    fn upload(from: &str, to: &str, bytes: &[u8], name: &str) -> MediaUpload {
        MediaUpload {
            from_user: from.into(),
            to_user: Some(to.into()),
            group_id: None,
            buffer: BASE64.encode(bytes),
            file_name: Some(name.into()),
            user_type: None,
        }
    }

    fn direct(to: &str) -> ChatTarget {
        ChatTarget::Direct(to.into())
    }

    async fn notification_count(db: &Db, user: &str) -> u64 {
        db.lock().await.count_unread(&user.into()).unwrap()
    }

    #[tokio::test]
    async fn test_multi_device_echo() {
        let f = fixture().await;
        let (_p, mut alice_phone) = connect(&f.rooms, "alice");
        let (_l, mut alice_laptop) = connect(&f.rooms, "alice");
        let (_b, mut bob) = connect(&f.rooms, "bob");

        let sent = f
            .relay
            .send_message(&"alice".into(), direct("bob"), "hello")
            .await
            .unwrap();

        let expected = ServerEvent::ReceivedMessage(sent.clone());
        assert_eq!(drain(&mut alice_phone), vec![expected.clone()]);
        assert_eq!(drain(&mut alice_laptop), vec![expected.clone()]);

        let bob_events = drain(&mut bob);
        assert_eq!(names(&bob_events), vec!["RECEIVED_MESSAGE", "NOTIFICATION"]);
        assert_eq!(bob_events[0], expected);
        match &bob_events[1] {
            ServerEvent::Notification(push) => {
                assert_eq!(push.un_read_count, 1);
                assert_eq!(push.notification.notification_type, NotificationType::Chat);
                assert_eq!(push.notification.data_reference_id, sent.id.to_string());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(notification_count(&f.db, "alice").await, 0);
    }

    #[tokio::test]
    async fn test_invalid_targets_write_nothing() {
        let f = fixture().await;
        let alice = UserId::from("alice");

        let err = f
            .relay
            .send_message(&alice, direct("bob"), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Protocol(ProtocolError::EmptyMessage)));

        let mut both = upload("alice", "bob", PNG, "a.png");
        both.group_id = Some("g".into());
        let err = f.relay.send_media(MediaKind::Image, &both).await.unwrap_err();
        assert!(matches!(err, ChatError::Protocol(ProtocolError::AmbiguousRecipient)));

        assert!(f
            .db
            .lock()
            .await
            .direct_history(&alice, &"bob".into())
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_group_message_reaches_members() {
        let f = fixture().await;
        let group = f
            .db
            .lock()
            .await
            .create_group("Launch", &"alice".into(), &["bob".into(), "carol".into()])
            .unwrap();
        let (_a, mut alice) = connect(&f.rooms, "alice");
        let (_b, mut bob) = connect(&f.rooms, "bob");
        let (_m, mut mallory) = connect(&f.rooms, "mallory");

        f.relay
            .send_message(&"alice".into(), ChatTarget::Group(group.id.clone()), "kickoff")
            .await
            .unwrap();

        assert_eq!(names(&drain(&mut alice)), vec!["GROUP_RECEIVED_MESSAGE"]);
        assert_eq!(
            names(&drain(&mut bob)),
            vec!["GROUP_RECEIVED_MESSAGE", "NOTIFICATION"]
        );
        assert!(drain(&mut mallory).is_empty());
        assert_eq!(notification_count(&f.db, "carol").await, 1);

        let err = f
            .relay
            .send_message(&"mallory".into(), ChatTarget::Group(group.id.clone()), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotMember(_)));
        assert_eq!(f.relay.group_history(&group.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_image_upload_stored_and_relayed() {
        let f = fixture().await;
        let (_b, mut bob) = connect(&f.rooms, "bob");

        let message = f
            .relay
            .send_media(MediaKind::Image, &upload("alice", "bob", PNG, "logo.png"))
            .await
            .unwrap();

        assert_eq!(message.message_type, MessageType::Image);
        assert_eq!(message.original_file_name.as_deref(), Some("logo.png"));
        let reference = message.image_url.clone().unwrap();
        assert!(reference.starts_with("uploads/") && reference.ends_with(".png"));
        assert_eq!(f.media.list().await.unwrap().len(), 1);
        assert_eq!(names(&drain(&mut bob)), vec!["RECEIVED_IMAGE", "NOTIFICATION"]);
    }

    #[tokio::test]
    async fn test_renamed_executable_rejected() {
        let f = fixture().await;
        let exe = b"MZ\x90\x00\x03\x00\x00\x00\x04\x00\x00\x00";

        let err = f
            .relay
            .send_media(MediaKind::Image, &upload("alice", "bob", exe, "cat.png"))
            .await
            .unwrap_err();

        assert_eq!(err.to_event().name(), "INVALID_FORMAT");
        assert!(f.media.list().await.unwrap().is_empty());
        assert!(f
            .relay
            .aggregate_history(&"alice".into(), &"bob".into())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let f = fixture().await;
        let mut big = PNG.to_vec();
        big.resize(2048, 0);

        let err = f
            .relay
            .send_media(MediaKind::Image, &upload("alice", "bob", &big, "big.png"))
            .await
            .unwrap_err();

        assert_eq!(err.to_event().name(), "FILE_TO_LARGE");
        assert!(f.media.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_tombstones_and_unlinks_once() {
        let f = fixture().await;
        let (_a, mut alice) = connect(&f.rooms, "alice");
        let message = f
            .relay
            .send_media(MediaKind::Image, &upload("alice", "bob", PNG, "x.png"))
            .await
            .unwrap();
        drain(&mut alice);

        f.relay
            .delete_message(message.id, &"alice".into(), &"bob".into())
            .await
            .unwrap();

        assert_eq!(
            drain(&mut alice),
            vec![ServerEvent::MessageDeleted(DeletedRef { id: message.id })]
        );
        assert!(f.media.list().await.unwrap().is_empty());
        assert_eq!(notification_count(&f.db, "bob").await, 0);
        assert!(f.db.lock().await.get_chat_message(message.id).unwrap().is_deleted);

        let again = f
            .relay
            .delete_message(message.id, &"alice".into(), &"bob".into())
            .await
            .unwrap_err();
        assert!(matches!(again, ChatError::MessageNotFound));
    }

    #[tokio::test]
    async fn test_delete_refused_after_read_or_by_other_user() {
        let f = fixture().await;
        let message = f
            .relay
            .send_message(&"alice".into(), direct("bob"), "secret")
            .await
            .unwrap();

        let err = f
            .relay
            .delete_message(message.id, &"bob".into(), &"alice".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::CannotDelete(_)));

        f.db.lock()
            .await
            .mark_read(&"bob".into(), MarkRead::All)
            .unwrap();

        let err = f
            .relay
            .delete_message(message.id, &"alice".into(), &"bob".into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), CANNOT_DELETE_TEXT);
        assert!(!f.db.lock().await.get_chat_message(message.id).unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_clear_chat() {
        let f = fixture().await;
        let (_a, mut alice) = connect(&f.rooms, "alice");
        f.relay
            .send_message(&"alice".into(), direct("bob"), "1")
            .await
            .unwrap();
        f.relay
            .send_message(&"bob".into(), direct("alice"), "2")
            .await
            .unwrap();
        drain(&mut alice);

        assert_eq!(
            f.relay.clear_chat(&"alice".into(), &"bob".into()).await.unwrap(),
            2
        );
        assert_eq!(names(&drain(&mut alice)), vec!["CHAT_CLEARED"]);
        assert_eq!(notification_count(&f.db, "alice").await, 0);
        assert_eq!(notification_count(&f.db, "bob").await, 0);
    }

    #[tokio::test]
    async fn test_history_marks_incoming_read() {
        let f = fixture().await;
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        f.relay.send_message(&bob, direct("alice"), "ping").await.unwrap();
        f.relay.send_message(&alice, direct("bob"), "pong").await.unwrap();

        let history = f.relay.aggregate_history(&alice, &bob).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message.as_deref(), Some("ping"));
        assert_eq!(notification_count(&f.db, "alice").await, 0);
        assert_eq!(notification_count(&f.db, "bob").await, 1);

        assert_eq!(f.relay.aggregate_history(&bob, &alice).await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_ongoing_chat_marks_read() {
        let f = fixture().await;
        f.relay
            .send_message(&"bob".into(), direct("alice"), "ping")
            .await
            .unwrap();
        assert_eq!(
            f.relay.ongoing_chat(&"alice".into(), &"bob".into()).await.unwrap(),
            1
        );
        assert_eq!(notification_count(&f.db, "alice").await, 0);
    }

    #[tokio::test]
    async fn test_react_toggles_and_pushes() {
        let f = fixture().await;
        let (_b, mut bob) = connect(&f.rooms, "bob");
        let message = f
            .relay
            .send_message(&"alice".into(), direct("bob"), "ship it")
            .await
            .unwrap();
        drain(&mut bob);

        let reacted = f.relay.react(message.id, &"bob".into(), "👍").await.unwrap();
        assert_eq!(reacted.reactions.len(), 1);
        assert_eq!(reacted.reactions[0].emoji, "👍");
        assert_eq!(names(&drain(&mut bob)), vec!["REACTION_UPDATED"]);

        let cleared = f.relay.react(message.id, &"bob".into(), "👍").await.unwrap();
        assert!(cleared.reactions.is_empty());

        let err = f
            .relay
            .react(message.id, &"mallory".into(), "👎")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotParticipant));
    }
}

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::FRAME_OVERHEAD;
use crate::error::ProtocolError;
use crate::types::{ChatTarget, GroupId, UserId};

/// Every frame a client may send over the socket.
///
/// Frames are JSON objects of the form `{"event": "SEND_MESSAGE", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    /// Label this connection with a user id and join that user's room
    Room(JoinRoom),

    /// Explicit "I am going offline" notice
    UserDisconnected(UserRef),

    /// Text chat message
    SendMessage(SendMessage),

    /// The sender has the conversation with `to_user` open on screen
    OngoingChat(ChatPair),

    /// Retract a message
    DeleteMessage(DeleteMessage),

    /// Image attachment
    Images(MediaUpload),

    /// Document attachment
    Documents(MediaUpload),

    /// Voice note / audio attachment
    Audio(MediaUpload),

    /// Wipe the conversation between two users
    ClearChat(ChatPair),

    /// Add an emoji reaction to a message
    React(React),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoom {
    pub id: UserId,
    /// Room token issued for `id`
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub from_user: UserId,
    #[serde(default)]
    pub to_user: Option<UserId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub message: String,
    /// `agency`, `client` or `team_member`; informational only
    #[serde(default)]
    pub user_type: Option<String>,
}

impl SendMessage {
    pub fn target(&self) -> Result<ChatTarget, ProtocolError> {
        ChatTarget::from_parts(self.to_user.clone(), self.group_id.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPair {
    pub from_user: UserId,
    pub to_user: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessage {
    pub chat_id: Uuid,
    pub from_user: UserId,
    pub to_user: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaUpload {
    pub from_user: UserId,
    #[serde(default)]
    pub to_user: Option<UserId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    /// Base64-encoded file content
    pub buffer: String,
    /// Name the uploader gave the file; kept for display only
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
}

impl MediaUpload {
    pub fn target(&self) -> Result<ChatTarget, ProtocolError> {
        ChatTarget::from_parts(self.to_user.clone(), self.group_id.clone())
    }

    pub fn decode_buffer(&self) -> Result<Vec<u8>, ProtocolError> {
        // Tolerate data URLs ("data:image/png;base64,....")
        let raw = match self.buffer.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => self.buffer.as_str(),
        };
        BASE64
            .decode(raw.trim())
            .map_err(|e| ProtocolError::InvalidBuffer(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct React {
    pub chat_id: Uuid,
    pub user: UserId,
    pub emoji: String,
}

/// Largest inbound frame to accept when attachments may be `max_media_size`
/// bytes. Anything up to twice the ceiling still parses, so the sender gets
/// `FILE_TO_LARGE` instead of a dropped socket.
pub fn frame_limit(max_media_size: usize) -> usize {
    let raw = max_media_size.saturating_mul(2);
    (raw / 3 + usize::from(raw % 3 != 0))
        .saturating_mul(4)
        .saturating_add(FRAME_OVERHEAD)
}

impl ClientEvent {
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_room_frame() {
        let frame = r#"{"event":"ROOM","data":{"id":"user-1"}}"#;
        match ClientEvent::from_text(frame).unwrap() {
            ClientEvent::Room(join) => {
                assert_eq!(join.id, UserId::from("user-1"));
                assert!(join.token.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_room_frame_with_token() {
        let frame = r#"{"event":"ROOM","data":{"id":"user-1","token":"abc"}}"#;
        let ClientEvent::Room(join) = ClientEvent::from_text(frame).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(join.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_send_message_without_optional_fields() {
        let frame = r#"{"event":"SEND_MESSAGE","data":{"from_user":"a","to_user":"b","message":"hi"}}"#;
        let ClientEvent::SendMessage(msg) = ClientEvent::from_text(frame).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(msg.target().unwrap(), ChatTarget::Direct("b".into()));
        assert!(msg.user_type.is_none());
    }

    #[test]
    fn test_event_names_on_the_wire() {
        let ev = ClientEvent::UserDisconnected(UserRef {
            user_id: "u".into(),
        });
        assert!(ev.to_text().unwrap().contains("\"USER_DISCONNECTED\""));
        let ev = ClientEvent::ClearChat(ChatPair {
            from_user: "a".into(),
            to_user: "b".into(),
        });
        assert!(ev.to_text().unwrap().contains("\"CLEAR_CHAT\""));
    }

    #[test]
    fn test_decode_data_url_buffer() {
        let upload = MediaUpload {
            from_user: "a".into(),
            to_user: Some("b".into()),
            group_id: None,
            buffer: format!("data:image/png;base64,{}", BASE64.encode(b"abc")),
            file_name: None,
            user_type: None,
        };
        assert_eq!(upload.decode_buffer().unwrap(), b"abc");
    }

    fn image_frame(len: usize) -> String {
        ClientEvent::Images(MediaUpload {
            from_user: "user-1".into(),
            to_user: Some("user-2".into()),
            group_id: None,
            buffer: format!("data:image/png;base64,{}", BASE64.encode(vec![0u8; len])),
            file_name: Some("holiday photo.png".into()),
            user_type: Some("client".into()),
        })
        .to_text()
        .unwrap()
    }

    #[test]
    fn test_frame_limit_fits_attachments_around_the_ceiling() {
        let max = 1024;
        let limit = frame_limit(max);
        assert!(image_frame(max).len() <= limit);
        assert!(image_frame(max + 1).len() <= limit);
        assert!(image_frame(2 * max).len() <= limit);
        assert!(image_frame(2 * max + FRAME_OVERHEAD).len() > limit);
    }

    #[test]
    fn test_frame_limit_scales_with_ceiling() {
        let ten_mib = 10 * 1024 * 1024;
        assert!(frame_limit(ten_mib) > ten_mib * 4 / 3);
        assert!(frame_limit(4 * ten_mib) > 4 * ten_mib * 4 / 3);
        assert_eq!(frame_limit(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_unknown_event_is_malformed() {
        assert!(matches!(
            ClientEvent::from_text(r#"{"event":"NOPE","data":{}}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }
}

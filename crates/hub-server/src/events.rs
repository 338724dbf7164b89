//! Server-to-client frames.
//!
//! Every event serializes as `{"event": "NAME", "data": {...}}`, mirroring
//! [`ClientEvent`](hub_shared::protocol::ClientEvent) in the other direction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hub_shared::{MessageType, UserId};
use hub_store::{ChatMessage, Notification};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    UserOnline(PresenceChange),
    UserOffline(PresenceChange),

    ReceivedMessage(ChatMessage),
    ReceivedImage(ChatMessage),
    ReceivedDocument(ChatMessage),
    ReceivedAudio(ChatMessage),

    GroupReceivedMessage(ChatMessage),
    GroupReceivedImage(ChatMessage),
    GroupReceivedDocument(ChatMessage),
    GroupReceivedAudio(ChatMessage),

    MessageDeleted(DeletedRef),
    ReactionUpdated(ReactionUpdate),
    ChatCleared(ChatCleared),

    Notification(NotificationPush),

    CannotDelete(ErrorBody),
    /// Spelling is part of the wire contract.
    FileToLarge(ErrorBody),
    InvalidFormat(ErrorBody),
    MessageFailed(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRef {
    #[serde(rename = "_id")]
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionUpdate {
    pub chat: ChatMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCleared {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPush {
    pub notification: Notification,
    pub un_read_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

impl ServerEvent {
    /// The delivery event for a freshly persisted chat message.
    pub fn received(message: ChatMessage) -> Self {
        let group = message.group_id.is_some();
        match (message.message_type, group) {
            (MessageType::Message, false) => Self::ReceivedMessage(message),
            (MessageType::Image, false) => Self::ReceivedImage(message),
            (MessageType::Document, false) => Self::ReceivedDocument(message),
            (MessageType::Audio, false) => Self::ReceivedAudio(message),
            (MessageType::Message, true) => Self::GroupReceivedMessage(message),
            (MessageType::Image, true) => Self::GroupReceivedImage(message),
            (MessageType::Document, true) => Self::GroupReceivedDocument(message),
            (MessageType::Audio, true) => Self::GroupReceivedAudio(message),
        }
    }

    /// Wire name, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserOnline(_) => "USER_ONLINE",
            Self::UserOffline(_) => "USER_OFFLINE",
            Self::ReceivedMessage(_) => "RECEIVED_MESSAGE",
            Self::ReceivedImage(_) => "RECEIVED_IMAGE",
            Self::ReceivedDocument(_) => "RECEIVED_DOCUMENT",
            Self::ReceivedAudio(_) => "RECEIVED_AUDIO",
            Self::GroupReceivedMessage(_) => "GROUP_RECEIVED_MESSAGE",
            Self::GroupReceivedImage(_) => "GROUP_RECEIVED_IMAGE",
            Self::GroupReceivedDocument(_) => "GROUP_RECEIVED_DOCUMENT",
            Self::GroupReceivedAudio(_) => "GROUP_RECEIVED_AUDIO",
            Self::MessageDeleted(_) => "MESSAGE_DELETED",
            Self::ReactionUpdated(_) => "REACTION_UPDATED",
            Self::ChatCleared(_) => "CHAT_CLEARED",
            Self::Notification(_) => "NOTIFICATION",
            Self::CannotDelete(_) => "CANNOT_DELETE",
            Self::FileToLarge(_) => "FILE_TO_LARGE",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::MessageFailed(_) => "MESSAGE_FAILED",
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

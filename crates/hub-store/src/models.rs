//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be pushed to sockets or
//! returned from the HTTP API unchanged.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hub_shared::{GroupId, MessageType, NotificationType, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub profile_image: Option<String>,
    /// `agency`, `client` or `team_member`.
    pub role: String,
    pub is_online: bool,
    /// `active`, `trial` or `expired`.
    pub subscription_status: String,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Input for [`Database::upsert_user`](crate::Database::upsert_user).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewUser {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub profile_image: Option<String>,
    pub role: String,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    /// Recipient.
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Id of the entity that caused the notification.
    pub data_reference_id: String,
    pub message: String,
    pub from_user: Option<UserId>,
    pub is_read: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Which notifications a read-state update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkRead {
    One(Uuid),
    All,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub from_user: UserId,
    pub to_user: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub message: Option<String>,
    pub message_type: MessageType,
    pub image_url: Option<String>,
    pub document_url: Option<String>,
    pub audio_url: Option<String>,
    pub original_file_name: Option<String>,
    pub is_deleted: bool,
    pub reactions: Vec<ReactionView>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// The stored media path, whichever kind of attachment this is.
    pub fn media_url(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or(self.document_url.as_deref())
            .or(self.audio_url.as_deref())
    }
}

/// Input for [`Database::insert_chat_message`](crate::Database::insert_chat_message).
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub from_user: UserId,
    pub to_user: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub message: Option<String>,
    pub message_type: MessageType,
    /// Stored path of the attachment; routed to the `*_url` column matching
    /// `message_type`.
    pub media_url: Option<String>,
    pub original_file_name: Option<String>,
}

/// A reaction with the reacting user's profile resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionView {
    pub emoji: String,
    pub user: ReactionUser,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionUser {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub profile_image: Option<String>,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatGroup {
    pub id: GroupId,
    pub name: String,
    pub created_by: UserId,
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tasks & invoices (sweep inputs)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub assign_by: UserId,
    pub assign_to: UserId,
    pub client_id: Option<UserId>,
    pub agency_id: Option<UserId>,
    pub watchers: Vec<UserId>,
    pub due_date: NaiveDate,
    /// `pending`, `in_progress`, `completed` or `overdue`.
    pub status: String,
    pub due_alert_sent: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub agency_id: UserId,
    pub client_id: UserId,
    pub due_date: NaiveDate,
    /// `draft`, `unpaid`, `paid` or `overdue`.
    pub status: String,
    pub created_at: DateTime<Utc>,
}

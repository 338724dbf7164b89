use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

// User identity = opaque account id issued by the platform (agency, client
// or team member). Also the name of the user's broadcast room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One open socket. A user may own many.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

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
        write!(f, "{}", self.0)
    }
}

/// Where a chat message is addressed. Exactly one target per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Direct(UserId),
    Group(GroupId),
}

impl ChatTarget {
    /// Build a target from the two optional wire fields, rejecting the
    /// "neither" and "both" cases.
    pub fn from_parts(
        to_user: Option<UserId>,
        group_id: Option<GroupId>,
    ) -> Result<Self, ProtocolError> {
        let to_user = to_user.filter(|u| !u.is_blank());
        let group_id = group_id.filter(|g| !g.0.trim().is_empty());
        match (to_user, group_id) {
            (Some(user), None) => Ok(Self::Direct(user)),
            (None, Some(group)) => Ok(Self::Group(group)),
            (None, None) => Err(ProtocolError::MissingRecipient),
            (Some(_), Some(_)) => Err(ProtocolError::AmbiguousRecipient),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Message,
    Image,
    Document,
    Audio,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "image" => Ok(Self::Image),
            "document" => Ok(Self::Document),
            "audio" => Ok(Self::Audio),
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

/// Category tag persisted on every notification row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Chat,
    Invoice,
    Agreement,
    Task,
    Activity,
    General,
    Referral,
    Payment,
    Board,
    Deleted,
    Group,
    Agency,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Invoice => "invoice",
            Self::Agreement => "agreement",
            Self::Task => "task",
            Self::Activity => "activity",
            Self::General => "general",
            Self::Referral => "referral",
            Self::Payment => "payment",
            Self::Board => "board",
            Self::Deleted => "deleted",
            Self::Group => "group",
            Self::Agency => "agency",
        }
    }
}

impl FromStr for NotificationType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "chat" => Self::Chat,
            "invoice" => Self::Invoice,
            "agreement" => Self::Agreement,
            "task" => Self::Task,
            "activity" => Self::Activity,
            "general" => Self::General,
            "referral" => Self::Referral,
            "payment" => Self::Payment,
            "board" => Self::Board,
            "deleted" => Self::Deleted,
            "group" => Self::Group,
            "agency" => Self::Agency,
            other => return Err(ProtocolError::UnknownTag(other.to_string())),
        })
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_target_requires_exactly_one() {
        assert_eq!(
            ChatTarget::from_parts(Some("bob".into()), None).unwrap(),
            ChatTarget::Direct("bob".into())
        );
        assert_eq!(
            ChatTarget::from_parts(None, Some("g1".into())).unwrap(),
            ChatTarget::Group("g1".into())
        );
        assert!(matches!(
            ChatTarget::from_parts(None, None),
            Err(ProtocolError::MissingRecipient)
        ));
        assert!(matches!(
            ChatTarget::from_parts(Some("bob".into()), Some("g1".into())),
            Err(ProtocolError::AmbiguousRecipient)
        ));
    }

    #[test]
    fn test_blank_recipient_counts_as_missing() {
        assert!(matches!(
            ChatTarget::from_parts(Some("  ".into()), None),
            Err(ProtocolError::MissingRecipient)
        ));
    }

    #[test]
    fn test_notification_type_tags_round_trip() {
        for ty in [
            NotificationType::Chat,
            NotificationType::Deleted,
            NotificationType::Referral,
            NotificationType::Agency,
        ] {
            assert_eq!(ty.as_str().parse::<NotificationType>().unwrap(), ty);
        }
        assert!("nope".parse::<NotificationType>().is_err());
    }
}

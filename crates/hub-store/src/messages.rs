use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use hub_shared::{GroupId, MessageType, UserId};

use crate::database::{not_found, parsed_col, ts_col, ts_to_sql, uuid_col, Database};
use crate::error::Result;
use crate::models::{ChatMessage, NewChatMessage};

const SELECT_COLUMNS: &str = "SELECT id, from_user, to_user, group_id, message, message_type,
            image_url, document_url, audio_url, original_file_name, is_deleted, created_at
     FROM chat_messages";

impl Database {
    pub fn insert_chat_message(&self, new: &NewChatMessage) -> Result<ChatMessage> {
        let (image_url, document_url, audio_url) = match new.message_type {
            MessageType::Message => (None, None, None),
            MessageType::Image => (new.media_url.clone(), None, None),
            MessageType::Document => (None, new.media_url.clone(), None),
            MessageType::Audio => (None, None, new.media_url.clone()),
        };

        let message = ChatMessage {
            id: Uuid::new_v4(),
            from_user: new.from_user.clone(),
            to_user: new.to_user.clone(),
            group_id: new.group_id.clone(),
            message: new.message.clone(),
            message_type: new.message_type,
            image_url,
            document_url,
            audio_url,
            original_file_name: new.original_file_name.clone(),
            is_deleted: false,
            reactions: Vec::new(),
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO chat_messages
                (id, from_user, to_user, group_id, message, message_type,
                 image_url, document_url, audio_url, original_file_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id.to_string(),
                message.from_user.as_str(),
                message.to_user.as_ref().map(|u| u.as_str()),
                message.group_id.as_ref().map(|g| g.as_str()),
                message.message,
                message.message_type.as_str(),
                message.image_url,
                message.document_url,
                message.audio_url,
                message.original_file_name,
                ts_to_sql(&message.created_at),
            ],
        )?;

        Ok(message)
    }

    /// Fetch one message (tombstoned or not) with its reactions resolved.
    pub fn get_chat_message(&self, id: Uuid) -> Result<ChatMessage> {
        let mut message = self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_chat_message,
            )
            .map_err(not_found)?;
        message.reactions = self.reaction_views_for_message(message.id)?;
        Ok(message)
    }

    /// Tombstone a message. Returns `false` if it was already deleted.
    pub fn soft_delete_chat_message(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_messages SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Live messages between two users, oldest first. The query is symmetric
    /// in its arguments so both participants see the same rows.
    pub fn direct_history(&self, a: &UserId, b: &UserId) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE is_deleted = 0
               AND ((from_user = ?1 AND to_user = ?2) OR (from_user = ?2 AND to_user = ?1))
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_chat_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        self.attach_reactions(messages)
    }

    pub fn group_history(&self, group_id: &GroupId) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE is_deleted = 0 AND group_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![group_id.as_str()], row_to_chat_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        self.attach_reactions(messages)
    }

    /// Tombstone every live direct message between two users.
    pub fn clear_direct_chat(&self, a: &UserId, b: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE chat_messages SET is_deleted = 1
             WHERE is_deleted = 0
               AND ((from_user = ?1 AND to_user = ?2) OR (from_user = ?2 AND to_user = ?1))",
            params![a.as_str(), b.as_str()],
        )?;
        Ok(affected)
    }

    fn attach_reactions(&self, mut messages: Vec<ChatMessage>) -> Result<Vec<ChatMessage>> {
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let mut reactions = self.reaction_views_for_messages(&ids)?;
        for message in &mut messages {
            if let Some(list) = reactions.remove(&message.id) {
                message.reactions = list;
            }
        }
        Ok(messages)
    }
}

fn row_to_chat_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let to_user: Option<String> = row.get(2)?;
    let group_id: Option<String> = row.get(3)?;
    Ok(ChatMessage {
        id: uuid_col(row, 0)?,
        from_user: UserId(row.get(1)?),
        to_user: to_user.map(UserId),
        group_id: group_id.map(GroupId),
        message: row.get(4)?,
        message_type: parsed_col(row, 5)?,
        image_url: row.get(6)?,
        document_url: row.get(7)?,
        audio_url: row.get(8)?,
        original_file_name: row.get(9)?,
        is_deleted: row.get(10)?,
        reactions: Vec::new(),
        created_at: ts_col(row, 11)?,
    })
}

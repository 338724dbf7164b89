//! Notification log and unread counter.
//!
//! Rows are append-only: after insertion only `is_read` and `is_deleted`
//! ever change. The unread count is always computed from the rows, never
//! stored.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use hub_shared::{NotificationType, UserId};

use crate::database::{not_found, parsed_col, ts_col, ts_to_sql, uuid_col, Database};
use crate::error::Result;
use crate::models::{MarkRead, Notification};

const SELECT_COLUMNS: &str = "SELECT id, user_id, notification_type, data_reference_id, message,
            from_user, is_read, is_deleted, created_at
     FROM notifications";

impl Database {
    pub fn create_notification(
        &self,
        user_id: &UserId,
        notification_type: NotificationType,
        data_reference_id: &str,
        message: &str,
        from_user: Option<&UserId>,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            notification_type,
            data_reference_id: data_reference_id.to_string(),
            message: message.to_string(),
            from_user: from_user.cloned(),
            is_read: false,
            is_deleted: false,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO notifications
                (id, user_id, notification_type, data_reference_id, message, from_user, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                notification.id.to_string(),
                notification.user_id.as_str(),
                notification.notification_type.as_str(),
                notification.data_reference_id,
                notification.message,
                notification.from_user.as_ref().map(|u| u.as_str()),
                ts_to_sql(&notification.created_at),
            ],
        )?;

        Ok(notification)
    }

    pub fn get_notification(&self, id: Uuid) -> Result<Notification> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_notification,
            )
            .map_err(not_found)
    }

    /// Newest first; among equal timestamps unread rows come first.
    pub fn list_notifications(
        &self,
        user_id: &UserId,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE user_id = ?1 AND is_deleted = 0
             ORDER BY created_at DESC, is_read ASC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![user_id.as_str(), limit, skip],
            row_to_notification,
        )?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    pub fn count_unread(&self, user_id: &UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE user_id = ?1 AND is_read = 0 AND is_deleted = 0",
            params![user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Returns the number of rows that flipped from unread to read.
    pub fn mark_read(&self, user_id: &UserId, which: MarkRead) -> Result<usize> {
        let affected = match which {
            MarkRead::One(id) => self.conn().execute(
                "UPDATE notifications SET is_read = 1
                 WHERE id = ?1 AND user_id = ?2 AND is_read = 0",
                params![id.to_string(), user_id.as_str()],
            )?,
            MarkRead::All => self.conn().execute(
                "UPDATE notifications SET is_read = 1
                 WHERE user_id = ?1 AND is_read = 0",
                params![user_id.as_str()],
            )?,
        };
        Ok(affected)
    }

    /// Retire every notification that points at a deleted source entity.
    pub fn soft_delete_notifications_for_reference(&self, reference_id: &str) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_deleted = 1
             WHERE data_reference_id = ?1 AND is_deleted = 0",
            params![reference_id],
        )?;
        Ok(affected)
    }

    /// Whether any recipient has already read the chat notification raised
    /// for `message_id`.
    pub fn chat_notification_read(&self, message_id: Uuid) -> Result<bool> {
        let seen: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE data_reference_id = ?1
               AND notification_type IN ('chat', 'group')
               AND is_read = 1",
            params![message_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(seen > 0)
    }

    /// Mark every unread direct-chat notification `from -> recipient` read.
    pub fn mark_chat_notifications_read(&self, recipient: &UserId, from: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1
             WHERE user_id = ?1 AND from_user = ?2
               AND notification_type = 'chat' AND is_read = 0",
            params![recipient.as_str(), from.as_str()],
        )?;
        Ok(affected)
    }

    /// Soft-delete the direct-chat notifications exchanged between two users.
    pub fn soft_delete_chat_notifications(&self, a: &UserId, b: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_deleted = 1
             WHERE notification_type = 'chat' AND is_deleted = 0
               AND ((user_id = ?1 AND from_user = ?2) OR (user_id = ?2 AND from_user = ?1))",
            params![a.as_str(), b.as_str()],
        )?;
        Ok(affected)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let from_user: Option<String> = row.get(5)?;
    Ok(Notification {
        id: uuid_col(row, 0)?,
        user_id: UserId(row.get(1)?),
        notification_type: parsed_col(row, 2)?,
        data_reference_id: row.get(3)?,
        message: row.get(4)?,
        from_user: from_user.map(UserId),
        is_read: row.get(6)?,
        is_deleted: row.get(7)?,
        created_at: ts_col(row, 8)?,
    })
}

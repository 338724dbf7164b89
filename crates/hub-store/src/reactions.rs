use std::collections::HashMap;

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use hub_shared::UserId;

use crate::database::{ts_to_sql, uuid_col, Database};
use crate::error::Result;
use crate::models::{ReactionUser, ReactionView};

impl Database {
    /// Add a reaction. Returns `false` when the same user already reacted
    /// with the same emoji.
    pub fn add_reaction(&self, message_id: Uuid, user_id: &UserId, emoji: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO reactions (id, message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                message_id.to_string(),
                user_id.as_str(),
                emoji,
                ts_to_sql(&Utc::now()),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_reaction(&self, message_id: Uuid, user_id: &UserId, emoji: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user_id.as_str(), emoji],
        )?;
        Ok(affected > 0)
    }

    /// Reactions on one message with the reacting user's profile resolved.
    /// Unknown users resolve to empty names rather than failing the read.
    pub fn reaction_views_for_message(&self, message_id: Uuid) -> Result<Vec<ReactionView>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.user_id, r.emoji,
                    COALESCE(u.first_name, ''), COALESCE(u.last_name, ''), u.profile_image
             FROM reactions r
             LEFT JOIN users u ON u.id = r.user_id
             WHERE r.message_id = ?1
             ORDER BY r.created_at ASC, r.rowid ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(ReactionView {
                emoji: row.get(1)?,
                user: ReactionUser {
                    id: UserId(row.get(0)?),
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    profile_image: row.get(4)?,
                },
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }

    /// Batch variant keyed by message id; messages without reactions are absent.
    pub fn reaction_views_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ReactionView>>> {
        let mut map = HashMap::new();
        if message_ids.is_empty() {
            return Ok(map);
        }

        // One round trip: every reaction whose message is in the id set.
        let placeholders = vec!["?"; message_ids.len()].join(", ");
        let sql = format!(
            "SELECT r.message_id, r.user_id, r.emoji,
                    COALESCE(u.first_name, ''), COALESCE(u.last_name, ''), u.profile_image
             FROM reactions r
             LEFT JOIN users u ON u.id = r.user_id
             WHERE r.message_id IN ({placeholders})
             ORDER BY r.created_at ASC, r.rowid ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();

        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((
                uuid_col(row, 0)?,
                ReactionView {
                    emoji: row.get(2)?,
                    user: ReactionUser {
                        id: UserId(row.get(1)?),
                        first_name: row.get(3)?,
                        last_name: row.get(4)?,
                        profile_image: row.get(5)?,
                    },
                },
            ))
        })?;

        for row in rows {
            let (message_id, view) = row?;
            map.entry(message_id).or_insert_with(Vec::new).push(view);
        }
        Ok(map)
    }
}

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use hub_shared::{GroupId, UserId};

use crate::database::{not_found, ts_col, ts_to_sql, Database};
use crate::error::Result;
use crate::models::ChatGroup;

impl Database {
    /// Create a group under a fresh id. The creator is always a member.
    pub fn create_group(
        &mut self,
        name: &str,
        created_by: &UserId,
        members: &[UserId],
    ) -> Result<ChatGroup> {
        let id = GroupId(Uuid::new_v4().to_string());
        self.sync_group(&id, name, created_by, members)
    }

    /// Create or replace a group as the CRUD side describes it. Membership
    /// becomes exactly `members` plus the creator.
    pub fn sync_group(
        &mut self,
        id: &GroupId,
        name: &str,
        created_by: &UserId,
        members: &[UserId],
    ) -> Result<ChatGroup> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chat_groups (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, created_by = excluded.created_by",
            params![id.as_str(), name, created_by.as_str(), ts_to_sql(&Utc::now())],
        )?;
        tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1",
            params![id.as_str()],
        )?;
        for member in std::iter::once(created_by).chain(members.iter()) {
            if member.is_blank() {
                continue;
            }
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                params![id.as_str(), member.as_str()],
            )?;
        }
        tx.commit()?;

        self.get_group(id)
    }

    /// Drop a group and its membership. Messages already sent stay.
    pub fn delete_group(&self, id: &GroupId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chat_groups WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    pub fn get_group(&self, id: &GroupId) -> Result<ChatGroup> {
        let (name, created_by, created_at) = self
            .conn()
            .query_row(
                "SELECT name, created_by, created_at FROM chat_groups WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, ts_col(row, 2)?)),
            )
            .map_err(not_found)?;

        Ok(ChatGroup {
            id: id.clone(),
            name,
            created_by: UserId(created_by),
            members: self.group_members(id)?,
            created_at,
        })
    }

    pub fn add_group_member(&self, id: &GroupId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            params![id.as_str(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_group_member(&self, id: &GroupId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![id.as_str(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn group_members(&self, id: &GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| row.get::<_, String>(0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(UserId(row?));
        }
        Ok(members)
    }
}

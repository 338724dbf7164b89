//! Identity lookup, the persisted presence flag and trial windows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use hub_shared::UserId;

use crate::database::{not_found, opt_ts_col, ts_col, ts_to_sql, Database};
use crate::error::Result;
use crate::models::{NewUser, User};

const SELECT_COLUMNS: &str = "SELECT id, first_name, last_name, email, profile_image, role,
            is_online, subscription_status, trial_ends_at, created_at
     FROM users";

impl Database {
    /// Insert a user or refresh its profile fields. Presence and trial state
    /// are left untouched on update.
    pub fn upsert_user(&self, new: &NewUser) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (id, first_name, last_name, email, profile_image, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                profile_image = excluded.profile_image,
                role = excluded.role",
            params![
                new.id,
                new.first_name,
                new.last_name,
                new.email,
                new.profile_image,
                new.role,
                ts_to_sql(&Utc::now()),
            ],
        )?;
        self.get_user(&UserId(new.id.clone()))
    }

    /// Make sure a row exists for `id` so presence can be stored before the
    /// CRUD side has synced the profile. Returns `true` if a row was created.
    pub fn ensure_user(&self, id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
            params![id.as_str(), ts_to_sql(&Utc::now())],
        )?;
        Ok(affected > 0)
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .optional()?)
    }

    /// Flip the presence flag. Returns `false` for unknown users.
    pub fn set_online(&self, id: &UserId, online: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET is_online = ?1 WHERE id = ?2",
            params![online, id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn is_online(&self, id: &UserId) -> Result<bool> {
        let online: Option<bool> = self
            .conn()
            .query_row(
                "SELECT is_online FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(online.unwrap_or(false))
    }

    pub fn start_trial(&self, id: &UserId, ends_at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET subscription_status = 'trial', trial_ends_at = ?1 WHERE id = ?2",
            params![ts_to_sql(&ends_at), id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Users still flagged `trial` whose window closed before `now`.
    pub fn expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE subscription_status = 'trial'
               AND trial_ends_at IS NOT NULL AND trial_ends_at < ?1
             ORDER BY trial_ends_at ASC"
        ))?;
        let rows = stmt.query_map(params![ts_to_sql(&now)], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Conditional flip `trial -> expired`; `false` if already flipped.
    pub fn expire_trial(&self, id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET subscription_status = 'expired'
             WHERE id = ?1 AND subscription_status = 'trial'",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        profile_image: row.get(4)?,
        role: row.get(5)?,
        is_online: row.get(6)?,
        subscription_status: row.get(7)?,
        trial_ends_at: opt_ts_col(row, 8)?,
        created_at: ts_col(row, 9)?,
    })
}

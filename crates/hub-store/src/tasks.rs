//! Task rows as seen by the overdue and due-date sweeps.
//!
//! Every flip is a conditional `UPDATE` that reports whether it changed a
//! row, so running a sweep twice never re-flags anything.

use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use hub_shared::UserId;

use crate::database::{date_col, date_to_sql, not_found, ts_col, ts_to_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::Task;

const SELECT_COLUMNS: &str = "SELECT id, title, assign_by, assign_to, client_id, agency_id,
            watchers, due_date, status, due_alert_sent, created_at
     FROM tasks";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub id: String,
    pub title: String,
    pub assign_by: UserId,
    pub assign_to: UserId,
    pub client_id: Option<UserId>,
    pub agency_id: Option<UserId>,
    #[serde(default)]
    pub watchers: Vec<UserId>,
    pub due_date: NaiveDate,
}

impl From<Task> for NewTask {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            assign_by: task.assign_by,
            assign_to: task.assign_to,
            client_id: task.client_id,
            agency_id: task.agency_id,
            watchers: task.watchers,
            due_date: task.due_date,
        }
    }
}

impl Database {
    /// Insert a task or refresh it from a newer copy. Moving the due date
    /// re-arms the due-today reminder and lifts an overdue flag.
    pub fn upsert_task(&self, new: &NewTask) -> Result<Task> {
        let watchers = serde_json::to_string(&new.watchers).map_err(|e| StoreError::Corrupt {
            column: "watchers",
            reason: e.to_string(),
        })?;
        self.conn().execute(
            "INSERT INTO tasks
                (id, title, assign_by, assign_to, client_id, agency_id, watchers, due_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                assign_by = excluded.assign_by,
                assign_to = excluded.assign_to,
                client_id = excluded.client_id,
                agency_id = excluded.agency_id,
                watchers = excluded.watchers,
                due_date = excluded.due_date,
                status = CASE
                    WHEN status = 'overdue' AND due_date <> excluded.due_date THEN 'pending'
                    ELSE status END,
                due_alert_sent = CASE
                    WHEN due_date <> excluded.due_date THEN 0
                    ELSE due_alert_sent END",
            params![
                new.id,
                new.title,
                new.assign_by.as_str(),
                new.assign_to.as_str(),
                new.client_id.as_ref().map(|u| u.as_str()),
                new.agency_id.as_ref().map(|u| u.as_str()),
                watchers,
                date_to_sql(&new.due_date),
                ts_to_sql(&Utc::now()),
            ],
        )?;
        self.get_task(&new.id)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .map_err(not_found)
    }

    pub fn set_task_status(&self, id: &str, status: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE tasks SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Tasks past their due date that are neither completed nor flagged.
    pub fn overdue_task_candidates(&self, today: NaiveDate) -> Result<Vec<Task>> {
        self.query_tasks(
            "WHERE due_date < ?1 AND status NOT IN ('completed', 'overdue')",
            &date_to_sql(&today),
        )
    }

    pub fn flag_task_overdue(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE tasks SET status = 'overdue'
             WHERE id = ?1 AND status NOT IN ('completed', 'overdue')",
            params![id],
        )?;
        Ok(affected > 0)
    }

    /// Open tasks due on `today` whose reminder has not gone out.
    pub fn tasks_due_on(&self, today: NaiveDate) -> Result<Vec<Task>> {
        self.query_tasks(
            "WHERE due_date = ?1 AND due_alert_sent = 0 AND status NOT IN ('completed', 'overdue')",
            &date_to_sql(&today),
        )
    }

    pub fn mark_due_alert_sent(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE tasks SET due_alert_sent = 1 WHERE id = ?1 AND due_alert_sent = 0",
            params![id],
        )?;
        Ok(affected > 0)
    }

    fn query_tasks(&self, filter: &str, day: &str) -> Result<Vec<Task>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} {filter} ORDER BY due_date ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![day], row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let client_id: Option<String> = row.get(4)?;
    let agency_id: Option<String> = row.get(5)?;
    let watchers_json: String = row.get(6)?;
    let watchers: Vec<UserId> = serde_json::from_str(&watchers_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        assign_by: UserId(row.get(2)?),
        assign_to: UserId(row.get(3)?),
        client_id: client_id.map(UserId),
        agency_id: agency_id.map(UserId),
        watchers,
        due_date: date_col(row, 7)?,
        status: row.get(8)?,
        due_alert_sent: row.get(9)?,
        created_at: ts_col(row, 10)?,
    })
}

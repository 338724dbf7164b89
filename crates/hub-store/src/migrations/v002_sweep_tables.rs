//! v002 -- State scanned by the scheduled sweeps.
//!
//! Tasks and invoices only carry the columns the sweeps and the recipient
//! resolution read; the CRUD side owns the rest of their schema.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Trial window on the account owner
ALTER TABLE users ADD COLUMN subscription_status TEXT NOT NULL DEFAULT 'active';
ALTER TABLE users ADD COLUMN trial_ends_at TEXT;

CREATE TABLE IF NOT EXISTS tasks (
    id             TEXT PRIMARY KEY NOT NULL,
    title          TEXT NOT NULL,
    assign_by      TEXT NOT NULL,
    assign_to      TEXT NOT NULL,
    client_id      TEXT,
    agency_id      TEXT,
    watchers       TEXT NOT NULL DEFAULT '[]',    -- JSON array of user ids
    due_date       TEXT NOT NULL,                 -- YYYY-MM-DD
    status         TEXT NOT NULL DEFAULT 'pending',
    due_alert_sent INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(due_date, status);

CREATE TABLE IF NOT EXISTS invoices (
    id             TEXT PRIMARY KEY NOT NULL,
    invoice_number TEXT NOT NULL,
    agency_id      TEXT NOT NULL,
    client_id      TEXT NOT NULL,
    due_date       TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'unpaid', -- draft | unpaid | paid | overdue
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_invoices_due ON invoices(due_date, status);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

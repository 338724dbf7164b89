//! Schema migrations, applied on every open.
//!
//! `PRAGMA user_version` records the last applied step, so each runs once.

pub mod v001_initial;
pub mod v002_sweep_tables;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered by version; append new steps at the end.
const STEPS: &[(u32, &str, Step)] = &[
    (1, "initial", v001_initial::up),
    (2, "sweep_tables", v002_sweep_tables::up),
];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = STEPS.last().map(|(v, _, _)| *v).unwrap_or(0);

    tracing::info!(
        current_version = current,
        target_version = target,
        "checking database migrations"
    );

    for &(version, name, up) in STEPS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(version, name, "applying migration");
        up(conn).map_err(|source| StoreError::Migration {
            version,
            name,
            source,
        })?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('notifications', 'tasks', 'invoices')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}

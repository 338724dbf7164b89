use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No `DATABASE_PATH` was given and the platform has no data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The row a single-row query asked for does not exist (or is
    /// tombstoned, where the query filters on that).
    #[error("Record not found")]
    NotFound,

    #[error("Migration v{version:03} ({name}) failed: {source}")]
    Migration {
        version: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored column held a value the domain types reject.
    #[error("Corrupt column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

//! v001 -- Initial schema creation.
//!
//! Creates `users`, `notifications`, `chat_messages`, `reactions`,
//! `chat_groups` and `group_members`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (identity lookup + persisted presence flag)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                  TEXT PRIMARY KEY NOT NULL,
    first_name          TEXT NOT NULL DEFAULT '',
    last_name           TEXT NOT NULL DEFAULT '',
    email               TEXT,
    profile_image       TEXT,
    role                TEXT NOT NULL DEFAULT 'client',   -- agency | client | team_member
    is_online           INTEGER NOT NULL DEFAULT 0,       -- boolean 0/1
    created_at          TEXT NOT NULL                     -- RFC-3339
);

-- ----------------------------------------------------------------
-- Notifications (append-only log per recipient)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id                TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    user_id           TEXT NOT NULL,               -- recipient
    notification_type TEXT NOT NULL,
    data_reference_id TEXT NOT NULL,               -- originating entity
    message           TEXT NOT NULL,
    from_user         TEXT,
    is_read           INTEGER NOT NULL DEFAULT 0,
    is_deleted        INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user_ts
    ON notifications(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_reference
    ON notifications(data_reference_id);

-- ----------------------------------------------------------------
-- Chat messages (direct or group, tombstoned on delete)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id                 TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    from_user          TEXT NOT NULL,
    to_user            TEXT,
    group_id           TEXT,
    message            TEXT,
    message_type       TEXT NOT NULL,              -- message | image | document | audio
    image_url          TEXT,
    document_url       TEXT,
    audio_url          TEXT,
    original_file_name TEXT,
    is_deleted         INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,

    CHECK ((to_user IS NULL) <> (group_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_chat_pair_ts
    ON chat_messages(from_user, to_user, created_at);
CREATE INDEX IF NOT EXISTS idx_chat_group_ts
    ON chat_messages(group_id, created_at);

-- ----------------------------------------------------------------
-- Reactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    id         TEXT PRIMARY KEY NOT NULL,
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES chat_messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_reactions_unique
    ON reactions(message_id, user_id, emoji);

-- ----------------------------------------------------------------
-- Chat groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_groups (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    user_id  TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

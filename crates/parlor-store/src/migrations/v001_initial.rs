//! v001 -- Initial schema creation.
//!
//! Creates `chat_groups`, `group_members` and the append-only `messages` log.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_groups (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    creator_id INTEGER NOT NULL,
    created_at TEXT NOT NULL                  -- RFC-3339
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  INTEGER NOT NULL,
    user_id   INTEGER NOT NULL,
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Messages (append-only log)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,  -- log position
    conversation TEXT NOT NULL,                      -- "dm:<low>:<high>" or "group:<id>"
    from_user    INTEGER NOT NULL,
    to_user      INTEGER,
    group_id     INTEGER,
    content      TEXT,
    media_url    TEXT,
    media_type   TEXT,
    created_at   TEXT NOT NULL,                      -- RFC-3339

    CHECK ((to_user IS NULL) <> (group_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

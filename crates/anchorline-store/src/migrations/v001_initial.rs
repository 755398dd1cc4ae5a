//! v001 -- Initial ledger schema.
//!
//! Creates `anchors` (finalized records), `pending_appends` (submitted but
//! unconfirmed transactions) and `server_members` (who may append to a
//! server's channels).

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Anchors (append-only, never updated or deleted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS anchors (
    conversation_key TEXT NOT NULL,              -- dm:<a>:<b> / channel:<s>:<c>
    position         INTEGER NOT NULL,           -- dense, 0-based per key
    cid              TEXT NOT NULL,
    commit_hash      TEXT NOT NULL,              -- 0x-prefixed hex, 32 bytes
    previous_cid     TEXT,
    submitter        TEXT NOT NULL,
    tx_id            TEXT NOT NULL UNIQUE,
    anchored_at      TEXT NOT NULL,              -- RFC-3339

    PRIMARY KEY (conversation_key, position)
);

-- ----------------------------------------------------------------
-- Pending appends
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_appends (
    tx_id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_key TEXT NOT NULL,
    cid              TEXT NOT NULL,
    commit_hash      TEXT NOT NULL,
    previous_cid     TEXT,
    submitter        TEXT NOT NULL,
    submitted_at     TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Server membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS server_members (
    server_id INTEGER NOT NULL,
    address   TEXT NOT NULL,
    added_at  TEXT NOT NULL,

    PRIMARY KEY (server_id, address)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

//! v001 -- Initial schema creation.
//!
//! Creates the four log tables: `strings`, `character`, `channel` and
//! `channelmessage`.

use rusqlite::Connection;

use super::table_exists;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Interned message text
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS strings (
    id    INTEGER PRIMARY KEY NOT NULL,
    hash  INTEGER NOT NULL,                   -- first 8 bytes of BLAKE3(value)
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_strings_hash ON strings(hash);

-- ----------------------------------------------------------------
-- Characters seen in logs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS character (
    id         INTEGER PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,                 -- canonical casing, first seen
    name_lower TEXT NOT NULL UNIQUE
);

-- ----------------------------------------------------------------
-- Channels: public rooms (type 0) and PM conversations (type 1)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channel (
    id                        INTEGER PRIMARY KEY NOT NULL,
    channel_type              INTEGER NOT NULL,
    name                      TEXT,           -- public only
    name_lower                TEXT,           -- public only
    title                     TEXT,           -- public only
    my_character_id           INTEGER,        -- pm only, FK -> character(id)
    interlocutor_character_id INTEGER,        -- pm only, FK -> character(id)

    FOREIGN KEY (my_character_id) REFERENCES character(id),
    FOREIGN KEY (interlocutor_character_id) REFERENCES character(id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channelmessage (
    id                    INTEGER PRIMARY KEY NOT NULL,
    channel_id            INTEGER NOT NULL,   -- FK -> channel(id)
    speaking_character_id INTEGER NOT NULL,   -- FK -> character(id)
    message_type          INTEGER NOT NULL,
    text_string_id        INTEGER NOT NULL,   -- FK -> strings(id)
    gender                INTEGER NOT NULL,   -- snapshot at message time
    status                INTEGER NOT NULL,   -- snapshot at message time
    timestamp             INTEGER NOT NULL,   -- unix millis, UTC

    FOREIGN KEY (channel_id) REFERENCES channel(id),
    FOREIGN KEY (speaking_character_id) REFERENCES character(id),
    FOREIGN KEY (text_string_id) REFERENCES strings(id)
);

CREATE INDEX IF NOT EXISTS idx_channelmessage_text ON channelmessage(text_string_id);
"#;

pub fn needs_upgrade(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!table_exists(conn, "channelmessage")?)
}

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

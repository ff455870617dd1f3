//! v003 -- Timestamp-ordered indexes used by paging, search and the
//! calendar date scan.

use rusqlite::Connection;

use super::index_exists;

const INDEXES: &[&str] = &[
    "idx_channelmessage_channel_ts",
    "idx_channelmessage_ts",
    "idx_channelmessage_speaker_ts",
];

const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_channelmessage_channel_ts
    ON channelmessage(channel_id, timestamp);

CREATE INDEX IF NOT EXISTS idx_channelmessage_ts
    ON channelmessage(timestamp);

CREATE INDEX IF NOT EXISTS idx_channelmessage_speaker_ts
    ON channelmessage(speaking_character_id, timestamp);
"#;

pub fn needs_upgrade(conn: &Connection) -> rusqlite::Result<bool> {
    for name in INDEXES {
        if !index_exists(conn, name)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

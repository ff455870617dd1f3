//! v004 -- Full-text index over `strings`.
//!
//! External-content FTS5 table with the trigram tokenizer so that
//! "text contains" searches can use the index for needles of three or more
//! characters. Strings are immutable, so only insert and delete are mirrored.

use rusqlite::Connection;

use super::table_exists;

const UP_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS strings_fts USING fts5(
    value,
    content = 'strings',
    content_rowid = 'id',
    tokenize = 'trigram'
);

CREATE TRIGGER IF NOT EXISTS strings_fts_ai AFTER INSERT ON strings BEGIN
    INSERT INTO strings_fts(rowid, value) VALUES (new.id, new.value);
END;

CREATE TRIGGER IF NOT EXISTS strings_fts_ad AFTER DELETE ON strings BEGIN
    INSERT INTO strings_fts(strings_fts, rowid, value) VALUES ('delete', old.id, old.value);
END;

-- Index rows written before this migration.
INSERT INTO strings_fts(strings_fts) VALUES ('rebuild');
"#;

pub fn needs_upgrade(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!table_exists(conn, "strings_fts")?)
}

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

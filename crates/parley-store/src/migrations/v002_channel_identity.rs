//! v002 -- One channel row per identity.
//!
//! Public channels are identified by their lower-cased name, PM
//! conversations by the unordered pair of character ids. Rows duplicated by
//! earlier builds are folded into the lowest id before the unique indexes
//! are created.

use rusqlite::Connection;

use super::index_exists;

const UP_SQL: &str = r#"
CREATE TEMP TABLE IF NOT EXISTS channel_canonical AS
SELECT c.id AS id,
       (SELECT MIN(d.id) FROM channel d
         WHERE d.channel_type = c.channel_type
           AND ((c.channel_type = 0 AND d.name_lower = c.name_lower)
             OR (c.channel_type = 1
                 AND min(d.my_character_id, d.interlocutor_character_id)
                     = min(c.my_character_id, c.interlocutor_character_id)
                 AND max(d.my_character_id, d.interlocutor_character_id)
                     = max(c.my_character_id, c.interlocutor_character_id)))) AS keep_id
FROM channel c;

UPDATE channelmessage
   SET channel_id = (SELECT keep_id FROM channel_canonical
                      WHERE channel_canonical.id = channelmessage.channel_id)
 WHERE channel_id IN (SELECT id FROM channel_canonical WHERE id <> keep_id);

DELETE FROM channel
 WHERE id IN (SELECT id FROM channel_canonical WHERE id <> keep_id);

DROP TABLE channel_canonical;

CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_public_identity
    ON channel(name_lower) WHERE channel_type = 0;

CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_pm_identity
    ON channel(min(my_character_id, interlocutor_character_id),
               max(my_character_id, interlocutor_character_id))
    WHERE channel_type = 1;
"#;

pub fn needs_upgrade(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(!index_exists(conn, "idx_channel_public_identity")?
        || !index_exists(conn, "idx_channel_pm_identity")?)
}

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_channels_are_folded() {
        let conn = Connection::open_in_memory().unwrap();
        crate::migrations::v001_initial::up(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO character (id, name, name_lower) VALUES (1, 'Alice', 'alice'), (2, 'Bob', 'bob');
            INSERT INTO strings (id, hash, value) VALUES (1, 0, 'x');
            INSERT INTO channel (id, channel_type, name, name_lower, title) VALUES
                (10, 0, 'Lobby', 'lobby', 'Lobby'),
                (11, 0, 'LOBBY', 'lobby', 'Lobby');
            INSERT INTO channel (id, channel_type, my_character_id, interlocutor_character_id) VALUES
                (20, 1, 1, 2),
                (21, 1, 2, 1);
            INSERT INTO channelmessage
                (channel_id, speaking_character_id, message_type, text_string_id, gender, status, timestamp)
            VALUES (11, 1, 0, 1, 0, 0, 1), (21, 2, 0, 1, 0, 0, 2);
            "#,
        )
        .unwrap();

        assert!(needs_upgrade(&conn).unwrap());
        up(&conn).unwrap();
        assert!(!needs_upgrade(&conn).unwrap());

        let channels: i64 = conn
            .query_row("SELECT COUNT(*) FROM channel", [], |r| r.get(0))
            .unwrap();
        assert_eq!(channels, 2);

        let moved: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM channelmessage WHERE channel_id IN (10, 20)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(moved, 2);
    }
}

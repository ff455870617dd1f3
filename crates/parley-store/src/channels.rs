//! Channel rows: one per public channel, one per PM conversation.

use rusqlite::{params, Connection, OptionalExtension};

use parley_shared::CharacterName;

use crate::database::Database;
use crate::error::Result;
use crate::interning::find_character;

pub(crate) const CHANNEL_PUBLIC: i64 = 0;
pub(crate) const CHANNEL_PM: i64 = 1;

/// Resolve a public channel by name, creating it if absent. A non-empty
/// title replaces a stale one.
pub(crate) fn resolve_public_channel(
    conn: &Connection,
    name: &str,
    title: &str,
) -> rusqlite::Result<i64> {
    let name_lower = name.to_lowercase();

    if let Some((id, stored_title)) = find_public(conn, &name_lower)? {
        if !title.is_empty() && stored_title.as_deref() != Some(title) {
            conn.prepare_cached("UPDATE channel SET title = ?1 WHERE id = ?2")?
                .execute(params![title, id])?;
        }
        return Ok(id);
    }

    let title = if title.is_empty() { name } else { title };
    let inserted = conn
        .prepare_cached(
            "INSERT INTO channel (channel_type, name, name_lower, title)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT DO NOTHING",
        )?
        .execute(params![CHANNEL_PUBLIC, name, name_lower, title])?;
    if inserted == 1 {
        return Ok(conn.last_insert_rowid());
    }

    // Lost the race to another writer: the row exists now.
    conn.prepare_cached(
        "SELECT id FROM channel WHERE channel_type = ?1 AND name_lower = ?2",
    )?
    .query_row(params![CHANNEL_PUBLIC, name_lower], |row| row.get(0))
}

fn find_public(conn: &Connection, name_lower: &str) -> rusqlite::Result<Option<(i64, Option<String>)>> {
    conn.prepare_cached(
        "SELECT id, title FROM channel WHERE channel_type = ?1 AND name_lower = ?2",
    )?
    .query_row(params![CHANNEL_PUBLIC, name_lower], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
    .optional()
}

/// Look up the PM conversation between two character ids, in either order.
pub(crate) fn find_pm(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<Option<i64>> {
    conn.prepare_cached(
        "SELECT id FROM channel
         WHERE channel_type = ?1
           AND min(my_character_id, interlocutor_character_id) = ?2
           AND max(my_character_id, interlocutor_character_id) = ?3",
    )?
    .query_row(params![CHANNEL_PM, a.min(b), a.max(b)], |row| row.get(0))
    .optional()
}

/// Resolve the PM conversation `{me, interlocutor}`, creating it with this
/// orientation if absent.
pub(crate) fn resolve_pm_channel(
    conn: &Connection,
    me_id: i64,
    interlocutor_id: i64,
) -> rusqlite::Result<i64> {
    if let Some(id) = find_pm(conn, me_id, interlocutor_id)? {
        return Ok(id);
    }

    let inserted = conn
        .prepare_cached(
            "INSERT INTO channel (channel_type, my_character_id, interlocutor_character_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
        )?
        .execute(params![CHANNEL_PM, me_id, interlocutor_id])?;
    if inserted == 1 {
        return Ok(conn.last_insert_rowid());
    }

    find_pm(conn, me_id, interlocutor_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

impl Database {
    /// Id of a public channel, if it has ever been logged.
    pub fn find_channel_id(&self, name: &str) -> Result<Option<i64>> {
        Ok(find_public(self.conn(), &name.to_lowercase())?.map(|(id, _)| id))
    }

    /// Id of a PM conversation, if it has ever been logged.
    pub fn find_pm_convo_id(&self, me: &CharacterName, other: &CharacterName) -> Result<Option<i64>> {
        let conn = self.conn();
        let (Some(me_id), Some(other_id)) = (find_character(conn, me)?, find_character(conn, other)?)
        else {
            return Ok(None);
        };
        Ok(find_pm(conn, me_id, other_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interning::{resolve_character, CharacterCache};

    #[test]
    fn test_public_channel_resolves_to_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let a = resolve_public_channel(db.conn(), "Frontpage", "Frontpage").unwrap();
        let b = resolve_public_channel(db.conn(), "FRONTPAGE", "").unwrap();
        assert_eq!(a, b);
        assert_eq!(db.channel_count().unwrap(), 1);
        assert_eq!(db.find_channel_id("frontpage").unwrap(), Some(a));
    }

    #[test]
    fn test_duplicate_insert_is_rejected_by_index() {
        let db = Database::open_in_memory().unwrap();
        resolve_public_channel(db.conn(), "Lobby", "Lobby").unwrap();
        let raw = db.conn().execute(
            "INSERT INTO channel (channel_type, name, name_lower, title) VALUES (0, 'LOBBY', 'lobby', 'x')",
            [],
        );
        assert!(raw.is_err());
    }

    #[test]
    fn test_pm_channel_is_order_independent() {
        let db = Database::open_in_memory().unwrap();
        let cache = CharacterCache::default();
        let alice = resolve_character(db.conn(), &cache, &CharacterName::new("Alice")).unwrap();
        let bob = resolve_character(db.conn(), &cache, &CharacterName::new("Bob")).unwrap();

        let ab = resolve_pm_channel(db.conn(), alice, bob).unwrap();
        let ba = resolve_pm_channel(db.conn(), bob, alice).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(db.channel_count().unwrap(), 1);

        let (me, other): (i64, i64) = db
            .conn()
            .query_row(
                "SELECT my_character_id, interlocutor_character_id FROM channel WHERE id = ?1",
                params![ab],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((me, other), (alice, bob));

        assert_eq!(
            db.find_pm_convo_id(&CharacterName::new("bob"), &CharacterName::new("alice"))
                .unwrap(),
            Some(ab)
        );
    }
}

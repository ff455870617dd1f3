//! Deduplication of message text and character names.
//!
//! Message text lives in `strings`, addressed by a 64-bit BLAKE3 prefix. The
//! hash only narrows the lookup; rows are matched on `(hash, value)` so a
//! collision yields a second row instead of aliasing two texts, and a
//! duplicate insert always resolves to the existing row.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use parley_shared::CharacterName;

use crate::database::Database;
use crate::error::Result;

const CHARACTER_CACHE_CAPACITY: usize = 4096;

/// 64-bit content hash stored alongside every interned string.
pub fn string_hash(value: &str) -> i64 {
    let digest = blake3::hash(value.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_le_bytes(prefix)
}

/// Resolve `value` to its `strings` row, inserting it if absent.
pub(crate) fn intern_string(conn: &Connection, value: &str) -> rusqlite::Result<i64> {
    let hash = string_hash(value);

    let existing: Option<i64> = conn
        .prepare_cached("SELECT id FROM strings WHERE hash = ?1 AND value = ?2 LIMIT 1")?
        .query_row(params![hash, value], |row| row.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    conn.prepare_cached("INSERT INTO strings (hash, value) VALUES (?1, ?2)")?
        .execute(params![hash, value])?;
    Ok(conn.last_insert_rowid())
}

/// Look up a character row without creating it.
pub(crate) fn find_character(conn: &Connection, name: &CharacterName) -> rusqlite::Result<Option<i64>> {
    conn.prepare_cached("SELECT id FROM character WHERE name_lower = ?1")?
        .query_row(params![name.folded()], |row| row.get(0))
        .optional()
}

/// Resolve `name` to its `character` row, inserting it if absent. The first
/// spelling seen is kept as the canonical name.
pub(crate) fn resolve_character(
    conn: &Connection,
    cache: &CharacterCache,
    name: &CharacterName,
) -> rusqlite::Result<i64> {
    if let Some(id) = cache.get(name) {
        return Ok(id);
    }
    if let Some(id) = find_character(conn, name)? {
        return Ok(id);
    }

    conn.prepare_cached(
        "INSERT INTO character (name, name_lower) VALUES (?1, ?2)
         ON CONFLICT(name_lower) DO NOTHING",
    )?
    .execute(params![name.as_str(), name.folded()])?;

    // Re-select: another writer may have won the insert.
    conn.prepare_cached("SELECT id FROM character WHERE name_lower = ?1")?
        .query_row(params![name.folded()], |row| row.get(0))
}

/// Bounded map of `name_lower -> character id`.
///
/// Character rows are never deleted, so a cached id stays valid for the life
/// of the database. Entries are only added after the transaction that
/// resolved them has committed. The whole map is dropped once it exceeds its
/// capacity.
#[derive(Debug)]
pub(crate) struct CharacterCache {
    ids: HashMap<String, i64>,
    capacity: usize,
}

impl CharacterCache {
    pub(crate) fn get(&self, name: &CharacterName) -> Option<i64> {
        self.ids.get(name.folded()).copied()
    }

    pub(crate) fn remember(&mut self, name: &CharacterName, id: i64) {
        if self.ids.len() >= self.capacity {
            tracing::debug!(entries = self.ids.len(), "character id cache full, clearing");
            self.ids.clear();
        }
        self.ids.insert(name.folded().to_string(), id);
    }
}

impl Default for CharacterCache {
    fn default() -> Self {
        Self {
            ids: HashMap::new(),
            capacity: CHARACTER_CACHE_CAPACITY,
        }
    }
}

/// Row counts used by the store's own tests.
#[cfg(test)]
impl Database {
    pub(crate) fn string_count(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM strings", [], |row| row.get(0))?)
    }

    pub(crate) fn character_count(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM character", [], |row| row.get(0))?)
    }

    pub(crate) fn channel_count(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM channel", [], |row| row.get(0))?)
    }
}

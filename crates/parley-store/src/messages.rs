use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, TransactionBehavior};

use parley_shared::{ChannelDescriptor, CharacterName, Gender, LogMessageType, OnlineStatus};

use crate::channels::{resolve_pm_channel, resolve_public_channel, CHANNEL_PUBLIC};
use crate::database::Database;
use crate::error::Result;
use crate::interning::{find_character, intern_string, resolve_character};
use crate::models::{ChannelHint, DateAnchor, ImportTarget, ImportedMessage, LoggedMessage, NewLogMessage};

/// Column list shared by every query that returns [`LoggedMessage`] rows.
pub(crate) const MESSAGE_SELECT: &str = "
    SELECT cm.id, ch.channel_type, ch.name, ch.title, me.name, other.name,
           sp.name, cm.gender, cm.status, cm.message_type, s.value, cm.timestamp
    FROM channelmessage cm
    JOIN channel ch ON ch.id = cm.channel_id
    JOIN character sp ON sp.id = cm.speaking_character_id
    JOIN strings s ON s.id = cm.text_string_id
    LEFT JOIN character me ON me.id = ch.my_character_id
    LEFT JOIN character other ON other.id = ch.interlocutor_character_id";

impl Database {
    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Append one message to a public channel's log. Returns the row id.
    pub fn log_channel_message(
        &mut self,
        channel: &str,
        channel_title: &str,
        message: &NewLogMessage,
    ) -> Result<i64> {
        let (conn, characters) = self.parts_mut();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let speaker_id = resolve_character(&tx, characters, &message.speaker)?;
        let channel_id = resolve_public_channel(&tx, channel, channel_title)?;
        let id = insert_message(&tx, channel_id, speaker_id, message)?;
        tx.commit()?;

        characters.remember(&message.speaker, speaker_id);
        Ok(id)
    }

    /// Append one message to the PM conversation `{me, interlocutor}`.
    pub fn log_pm_convo_message(
        &mut self,
        me: &CharacterName,
        interlocutor: &CharacterName,
        message: &NewLogMessage,
    ) -> Result<i64> {
        let (conn, characters) = self.parts_mut();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let me_id = resolve_character(&tx, characters, me)?;
        let other_id = resolve_character(&tx, characters, interlocutor)?;
        let speaker_id = resolve_character(&tx, characters, &message.speaker)?;
        let channel_id = resolve_pm_channel(&tx, me_id, other_id)?;
        let id = insert_message(&tx, channel_id, speaker_id, message)?;
        tx.commit()?;

        characters.remember(me, me_id);
        characters.remember(interlocutor, other_id);
        characters.remember(&message.speaker, speaker_id);
        Ok(id)
    }

    /// Append a batch of messages in a single transaction. Either every row
    /// is written or none is.
    pub fn import_messages(&mut self, batch: &[ImportedMessage]) -> Result<usize> {
        let (conn, characters) = self.parts_mut();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for entry in batch {
            let speaker_id = resolve_character(&tx, characters, &entry.message.speaker)?;
            let channel_id = match &entry.target {
                ImportTarget::Channel { name, title } => resolve_public_channel(&tx, name, title)?,
                ImportTarget::PmConvo { me, interlocutor } => {
                    let me_id = resolve_character(&tx, characters, me)?;
                    let other_id = resolve_character(&tx, characters, interlocutor)?;
                    resolve_pm_channel(&tx, me_id, other_id)?
                }
            };
            insert_message(&tx, channel_id, speaker_id, &entry.message)?;
        }
        tx.commit()?;

        tracing::info!(count = batch.len(), "imported log messages");
        Ok(batch.len())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Up to `max_entries` messages of a public channel on one side of `date`.
    ///
    /// `After` returns `timestamp >= date` oldest first; `Before` returns
    /// `timestamp < date` newest first.
    pub fn get_channel_messages(
        &self,
        channel: &str,
        anchor: DateAnchor,
        date: DateTime<Utc>,
        max_entries: usize,
    ) -> Result<Vec<LoggedMessage>> {
        match self.find_channel_id(channel)? {
            Some(channel_id) => self.messages_around(channel_id, anchor, date, max_entries),
            None => Ok(Vec::new()),
        }
    }

    /// Same as [`Database::get_channel_messages`] for a PM conversation.
    pub fn get_pm_convo_messages(
        &self,
        me: &CharacterName,
        interlocutor: &CharacterName,
        anchor: DateAnchor,
        date: DateTime<Utc>,
        max_entries: usize,
    ) -> Result<Vec<LoggedMessage>> {
        match self.find_pm_convo_id(me, interlocutor)? {
            Some(channel_id) => self.messages_around(channel_id, anchor, date, max_entries),
            None => Ok(Vec::new()),
        }
    }

    fn messages_around(
        &self,
        channel_id: i64,
        anchor: DateAnchor,
        date: DateTime<Utc>,
        max_entries: usize,
    ) -> Result<Vec<LoggedMessage>> {
        let filter = match anchor {
            DateAnchor::Before => {
                "WHERE cm.channel_id = ?1 AND cm.timestamp < ?2
                 ORDER BY cm.timestamp DESC, cm.id DESC LIMIT ?3"
            }
            DateAnchor::After => {
                "WHERE cm.channel_id = ?1 AND cm.timestamp >= ?2
                 ORDER BY cm.timestamp ASC, cm.id ASC LIMIT ?3"
            }
        };
        let sql = format!("{MESSAGE_SELECT} {filter}");

        let mut stmt = self.conn().prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![channel_id, date.timestamp_millis(), max_entries as i64],
            row_to_logged_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Autocomplete
    // ------------------------------------------------------------------

    /// Public channels whose name or title starts with `prefix`
    /// (case-insensitive), at most `limit` of them.
    pub fn get_channel_hints_from_partial_name(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ChannelHint>> {
        let pattern = like_prefix(&prefix.to_lowercase());
        let mut stmt = self.conn().prepare_cached(
            "SELECT name, title FROM channel
             WHERE channel_type = ?1
               AND (name_lower LIKE ?2 ESCAPE '\\' OR lower(title) LIKE ?2 ESCAPE '\\')
             ORDER BY name_lower
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![CHANNEL_PUBLIC, pattern, limit as i64], |row| {
            let name: String = row.get(0)?;
            let title: Option<String> = row.get(1)?;
            Ok(ChannelHint {
                title: title.unwrap_or_else(|| name.clone()),
                name,
            })
        })?;

        let mut hints = Vec::new();
        for row in rows {
            hints.push(row?);
        }
        Ok(hints)
    }

    /// Characters `my_name` has a logged PM conversation with whose name
    /// starts with `prefix`, at most `limit` of them.
    pub fn get_pm_convo_hints_from_partial_name(
        &self,
        my_name: &CharacterName,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<CharacterName>> {
        let Some(me_id) = find_character(self.conn(), my_name)? else {
            return Ok(Vec::new());
        };

        let pattern = like_prefix(&prefix.to_lowercase());
        let mut stmt = self.conn().prepare_cached(
            "SELECT other.name FROM channel ch
             JOIN character other ON other.id = CASE
                 WHEN ch.my_character_id = ?1 THEN ch.interlocutor_character_id
                 ELSE ch.my_character_id END
             WHERE ch.channel_type = 1
               AND (ch.my_character_id = ?1 OR ch.interlocutor_character_id = ?1)
               AND other.name_lower LIKE ?2 ESCAPE '\\'
             ORDER BY other.name_lower
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![me_id, pattern, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut names = Vec::new();
        for row in rows {
            names.push(CharacterName::new(&row?));
        }
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_message(
    conn: &Connection,
    channel_id: i64,
    speaker_id: i64,
    message: &NewLogMessage,
) -> rusqlite::Result<i64> {
    let text_id = intern_string(conn, &message.text)?;
    conn.prepare_cached(
        "INSERT INTO channelmessage
             (channel_id, speaking_character_id, message_type, text_string_id, gender, status, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?
    .execute(params![
        channel_id,
        speaker_id,
        message.message_type.code(),
        text_id,
        message.gender.code(),
        message.status.code(),
        message.timestamp.timestamp_millis(),
    ])?;
    Ok(conn.last_insert_rowid())
}

/// Turn user input into a `LIKE ... ESCAPE '\'` prefix pattern.
pub(crate) fn like_prefix(prefix: &str) -> String {
    let mut pattern = escape_like(prefix);
    pattern.push('%');
    pattern
}

pub(crate) fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn conversion_error(column: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Integer, Box::new(e))
}

/// Map a row selected with [`MESSAGE_SELECT`] to a [`LoggedMessage`].
pub(crate) fn row_to_logged_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<LoggedMessage> {
    let id: i64 = row.get(0)?;
    let channel_type: i64 = row.get(1)?;

    let channel = if channel_type == CHANNEL_PUBLIC {
        let name: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
        let title: String = row.get::<_, Option<String>>(3)?.unwrap_or_else(|| name.clone());
        ChannelDescriptor::Public { name, title }
    } else {
        let me: String = row.get::<_, Option<String>>(4)?.unwrap_or_default();
        let other: String = row.get::<_, Option<String>>(5)?.unwrap_or_default();
        ChannelDescriptor::PrivateConvo {
            me: CharacterName::new(&me),
            interlocutor: CharacterName::new(&other),
        }
    };

    let speaker: String = row.get(6)?;
    let gender = Gender::from_code(row.get(7)?).map_err(|e| conversion_error(7, e))?;
    let status = OnlineStatus::from_code(row.get(8)?).map_err(|e| conversion_error(8, e))?;
    let message_type = LogMessageType::from_code(row.get(9)?).map_err(|e| conversion_error(9, e))?;
    let text: String = row.get(10)?;
    let ts_millis: i64 = row.get(11)?;

    let timestamp = DateTime::<Utc>::from_timestamp_millis(ts_millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(11, ts_millis)
    })?;

    Ok(LoggedMessage {
        id,
        channel,
        speaker: CharacterName::new(&speaker),
        gender,
        status,
        message_type,
        text,
        timestamp,
    })
}

//! Structured and full-text search over the log.
//!
//! Every criteria is compiled to one `WHERE` clause over `channelmessage`.
//! Results are ordered `(timestamp DESC, id DESC)`; the id tiebreak keeps
//! pages disjoint when several messages share a millisecond.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use parley_shared::CharacterName;

use crate::channels::{find_pm, CHANNEL_PUBLIC};
use crate::database::Database;
use crate::error::Result;
use crate::interning::find_character;
use crate::messages::{escape_like, row_to_logged_message, MESSAGE_SELECT};
use crate::models::{LoggedMessage, RecentConversation, SearchCriteria, SearchScope};

/// Needles shorter than this cannot use the trigram index.
const TRIGRAM_MIN_CHARS: usize = 3;

const RESULT_ORDER: &str = "ORDER BY cm.timestamp DESC, cm.id DESC";

// ---------------------------------------------------------------------------
// Criteria compilation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Filter {
    clauses: Vec<String>,
    args: Vec<Value>,
}

impl Filter {
    fn push(&mut self, clause: impl FnOnce(usize) -> String, arg: impl Into<Value>) {
        self.args.push(arg.into());
        self.clauses.push(clause(self.args.len()));
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Compile `criteria`. `None` means a referenced speaker or stream is not
/// in the log, so nothing can match.
fn compile(conn: &Connection, criteria: &SearchCriteria) -> rusqlite::Result<Option<Filter>> {
    let mut filter = Filter::default();

    if let Some(speaker) = &criteria.speaker {
        let Some(id) = find_character(conn, speaker)? else {
            return Ok(None);
        };
        filter.push(|n| format!("cm.speaking_character_id = ?{n}"), id);
    }

    if let Some(scope) = &criteria.scope {
        let Some(channel_id) = scope_channel_id(conn, scope)? else {
            return Ok(None);
        };
        filter.push(|n| format!("cm.channel_id = ?{n}"), channel_id);
    }

    if let Some(needle) = criteria.text_contains.as_deref().filter(|s| !s.is_empty()) {
        if needle.chars().count() >= TRIGRAM_MIN_CHARS {
            let phrase = format!("\"{}\"", needle.replace('"', "\"\""));
            filter.push(
                |n| {
                    format!(
                        "cm.text_string_id IN \
                         (SELECT rowid FROM strings_fts WHERE strings_fts MATCH ?{n})"
                    )
                },
                phrase,
            );
        } else {
            let pattern = format!("%{}%", escape_like(needle));
            filter.push(
                |n| {
                    format!(
                        "cm.text_string_id IN \
                         (SELECT id FROM strings WHERE value LIKE ?{n} ESCAPE '\\')"
                    )
                },
                pattern,
            );
        }
    }

    if let Some(before) = criteria.before {
        filter.push(|n| format!("cm.timestamp < ?{n}"), before.timestamp_millis());
    }
    if let Some(after) = criteria.after {
        filter.push(|n| format!("cm.timestamp >= ?{n}"), after.timestamp_millis());
    }

    Ok(Some(filter))
}

fn scope_channel_id(conn: &Connection, scope: &SearchScope) -> rusqlite::Result<Option<i64>> {
    match scope {
        SearchScope::Channel { name } => conn
            .prepare_cached("SELECT id FROM channel WHERE channel_type = ?1 AND name_lower = ?2")?
            .query_row(params![CHANNEL_PUBLIC, name.to_lowercase()], |row| row.get(0))
            .optional(),
        SearchScope::PmConvo { me, other } => pm_channel_id(conn, me, other),
    }
}

fn pm_channel_id(
    conn: &Connection,
    me: &CharacterName,
    other: &CharacterName,
) -> rusqlite::Result<Option<i64>> {
    match (find_character(conn, me)?, find_character(conn, other)?) {
        (Some(a), Some(b)) => find_pm(conn, a, b),
        _ => Ok(None),
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Paged search
    // ------------------------------------------------------------------

    /// Number of messages matching `criteria`.
    pub fn get_search_result_count(&self, criteria: &SearchCriteria) -> Result<i64> {
        let Some(filter) = compile(self.conn(), criteria)? else {
            return Ok(0);
        };
        let sql = format!("SELECT COUNT(*) FROM channelmessage cm {}", filter.where_sql());
        Ok(self
            .conn()
            .query_row(&sql, params_from_iter(filter.args.iter()), |row| row.get(0))?)
    }

    /// Ids of one page of matches, newest first.
    pub fn get_search_result_ids(
        &self,
        criteria: &SearchCriteria,
        skip: usize,
        take: usize,
    ) -> Result<Vec<i64>> {
        let Some(mut filter) = compile(self.conn(), criteria)? else {
            return Ok(Vec::new());
        };
        let page = page_sql(&mut filter, skip, take);
        let sql = format!(
            "SELECT cm.id FROM channelmessage cm {} {RESULT_ORDER} {page}",
            filter.where_sql()
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.args.iter()), |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// One page of matches as full messages, newest first.
    pub fn get_search_result_subset(
        &self,
        criteria: &SearchCriteria,
        skip: usize,
        take: usize,
    ) -> Result<Vec<LoggedMessage>> {
        let Some(mut filter) = compile(self.conn(), criteria)? else {
            return Ok(Vec::new());
        };
        let page = page_sql(&mut filter, skip, take);
        let sql = format!("{MESSAGE_SELECT} {} {RESULT_ORDER} {page}", filter.where_sql());

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.args.iter()), row_to_logged_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Hydrate message ids in the order given. Ids no longer in the log
    /// (expired) are skipped.
    pub fn get_messages_by_ids(&self, ids: &[i64]) -> Result<Vec<LoggedMessage>> {
        let sql = format!("{MESSAGE_SELECT} WHERE cm.id = ?1");
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = stmt
                .query_row(params![id], row_to_logged_message)
                .optional()?
            {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Calendar
    // ------------------------------------------------------------------

    /// Local calendar dates in `tz` on which the public channel has at least
    /// one message, ascending.
    pub fn get_channel_message_dates<Tz: TimeZone>(
        &self,
        channel: &str,
        tz: &Tz,
    ) -> Result<Vec<NaiveDate>> {
        match self.find_channel_id(channel)? {
            Some(channel_id) => self.message_dates(channel_id, tz),
            None => Ok(Vec::new()),
        }
    }

    /// Same as [`Database::get_channel_message_dates`] for a PM conversation.
    pub fn get_pm_conversation_dates<Tz: TimeZone>(
        &self,
        me: &CharacterName,
        other: &CharacterName,
        tz: &Tz,
    ) -> Result<Vec<NaiveDate>> {
        match pm_channel_id(self.conn(), me, other)? {
            Some(channel_id) => self.message_dates(channel_id, tz),
            None => Ok(Vec::new()),
        }
    }

    /// Skip-scan over `(channel_id, timestamp)`: one index probe per
    /// distinct day instead of one row per message.
    fn message_dates<Tz: TimeZone>(&self, channel_id: i64, tz: &Tz) -> Result<Vec<NaiveDate>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT MIN(timestamp) FROM channelmessage
             WHERE channel_id = ?1 AND timestamp >= ?2",
        )?;

        let mut dates = BTreeSet::new();
        let mut cursor = i64::MIN;
        loop {
            let next: Option<i64> = stmt.query_row(params![channel_id, cursor], |row| row.get(0))?;
            let Some(ts) = next else { break };
            let Some(utc) = DateTime::<Utc>::from_timestamp_millis(ts) else {
                cursor = ts.saturating_add(1);
                continue;
            };

            let day = utc.with_timezone(tz).date_naive();
            dates.insert(day);

            cursor = match next_local_midnight(tz, day) {
                Some(midnight) if midnight > ts => midnight,
                _ => ts.saturating_add(1),
            };
            if cursor == i64::MAX {
                break;
            }
        }

        Ok(dates.into_iter().collect())
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// PM partners of `character`, most recently active first.
    pub fn get_recent_conversations(
        &self,
        character: &CharacterName,
        limit: usize,
    ) -> Result<Vec<RecentConversation>> {
        let Some(me_id) = find_character(self.conn(), character)? else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn().prepare_cached(
            "SELECT other.name, MAX(cm.timestamp) AS last_ts
             FROM channel ch
             JOIN channelmessage cm ON cm.channel_id = ch.id
             JOIN character other ON other.id = CASE
                 WHEN ch.my_character_id = ?1 THEN ch.interlocutor_character_id
                 ELSE ch.my_character_id END
             WHERE ch.channel_type = 1
               AND (ch.my_character_id = ?1 OR ch.interlocutor_character_id = ?1)
             GROUP BY ch.id
             ORDER BY last_ts DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![me_id, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            let (name, ts) = row?;
            let Some(last_message_at) = DateTime::<Utc>::from_timestamp_millis(ts) else {
                continue;
            };
            conversations.push(RecentConversation {
                interlocutor: CharacterName::new(&name),
                last_message_at,
            });
        }
        Ok(conversations)
    }

    /// Whether the public channel has any logged message.
    pub fn validate_channel_in_logs(&self, name: &str) -> Result<bool> {
        match self.find_channel_id(name)? {
            Some(id) => self.channel_has_messages(id),
            None => Ok(false),
        }
    }

    /// Whether the PM conversation has any logged message.
    pub fn validate_pm_convo_in_logs(&self, me: &CharacterName, other: &CharacterName) -> Result<bool> {
        match pm_channel_id(self.conn(), me, other)? {
            Some(id) => self.channel_has_messages(id),
            None => Ok(false),
        }
    }

    fn channel_has_messages(&self, channel_id: i64) -> Result<bool> {
        Ok(self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM channelmessage WHERE channel_id = ?1)",
            params![channel_id],
            |row| row.get(0),
        )?)
    }
}

fn page_sql(filter: &mut Filter, skip: usize, take: usize) -> String {
    filter.args.push(Value::Integer(take as i64));
    let limit = filter.args.len();
    filter.args.push(Value::Integer(skip as i64));
    let offset = filter.args.len();
    format!("LIMIT ?{limit} OFFSET ?{offset}")
}

/// Start of the local day after `day`, in UTC millis. Zones that skip
/// midnight for DST start the day at the first existing hour.
fn next_local_midnight<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> Option<i64> {
    let next = day.succ_opt()?;
    (0..24).find_map(|hour| {
        let local = next.and_hms_opt(hour, 0, 0)?;
        tz.from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.timestamp_millis())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewLogMessage;
    use chrono::{Duration, FixedOffset};
    use parley_shared::{Gender, LogMessageType, OnlineStatus};

    fn say(speaker: &str, text: &str, ts: DateTime<Utc>) -> NewLogMessage {
        NewLogMessage {
            speaker: CharacterName::new(speaker),
            gender: Gender::None,
            status: OnlineStatus::Online,
            message_type: LogMessageType::Chat,
            text: text.to_string(),
            timestamp: ts,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        for i in 0..30 {
            let speaker = if i % 3 == 0 { "Alice" } else { "Bob" };
            // Pairs share a timestamp so the id tiebreak matters.
            let ts = t0() + Duration::seconds(i / 2);
            db.log_channel_message("Lobby", "Lobby", &say(speaker, &format!("line {i} banana"), ts))
                .unwrap();
        }
        db.log_channel_message("Other", "Other", &say("Alice", "apple pie", t0()))
            .unwrap();
        db
    }

    #[test]
    fn test_pages_concatenate() {
        let db = seeded();
        let criteria = SearchCriteria::default();

        let mut paged = db.get_search_result_ids(&criteria, 0, 10).unwrap();
        paged.extend(db.get_search_result_ids(&criteria, 10, 10).unwrap());
        let whole = db.get_search_result_ids(&criteria, 0, 20).unwrap();
        assert_eq!(paged, whole);
        assert_eq!(whole.len(), 20);

        let subset = db.get_search_result_subset(&criteria, 0, 20).unwrap();
        let subset_ids: Vec<_> = subset.iter().map(|m| m.id).collect();
        assert_eq!(subset_ids, whole);
    }

    #[test]
    fn test_criteria_compose() {
        let db = seeded();
        let alice = SearchCriteria {
            speaker: Some(CharacterName::new("alice")),
            ..Default::default()
        };
        assert_eq!(db.get_search_result_count(&alice).unwrap(), 11);

        let alice_in_lobby = SearchCriteria {
            scope: Some(SearchScope::Channel { name: "LOBBY".into() }),
            ..alice.clone()
        };
        assert_eq!(db.get_search_result_count(&alice_in_lobby).unwrap(), 10);

        let bounded = SearchCriteria {
            after: Some(t0() + Duration::seconds(5)),
            before: Some(t0() + Duration::seconds(7)),
            scope: Some(SearchScope::Channel { name: "Lobby".into() }),
            ..Default::default()
        };
        // Seconds 5 and 6, two messages each.
        assert_eq!(db.get_search_result_count(&bounded).unwrap(), 4);
    }

    #[test]
    fn test_text_contains_long_and_short_needles() {
        let db = seeded();
        let fts = SearchCriteria {
            text_contains: Some("BANANA".into()),
            ..Default::default()
        };
        assert_eq!(db.get_search_result_count(&fts).unwrap(), 30);

        let short = SearchCriteria {
            text_contains: Some("pi".into()),
            ..Default::default()
        };
        let hits = db.get_search_result_subset(&short, 0, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "apple pie");

        let wildcard = SearchCriteria {
            text_contains: Some("%".into()),
            ..Default::default()
        };
        assert_eq!(db.get_search_result_count(&wildcard).unwrap(), 0);
    }

    #[test]
    fn test_unknown_speaker_or_scope_matches_nothing() {
        let db = seeded();
        let nobody = SearchCriteria {
            speaker: Some(CharacterName::new("Nobody")),
            ..Default::default()
        };
        assert_eq!(db.get_search_result_count(&nobody).unwrap(), 0);
        assert!(db.get_search_result_ids(&nobody, 0, 10).unwrap().is_empty());

        let nowhere = SearchCriteria {
            scope: Some(SearchScope::PmConvo {
                me: CharacterName::new("Alice"),
                other: CharacterName::new("Bob"),
            }),
            ..Default::default()
        };
        assert_eq!(db.get_search_result_count(&nowhere).unwrap(), 0);
    }

    #[test]
    fn test_messages_by_ids_keeps_order() {
        let db = seeded();
        let ids = db.get_search_result_ids(&SearchCriteria::default(), 0, 3).unwrap();
        let reversed: Vec<_> = ids.iter().rev().copied().chain([999_999]).collect();
        let messages = db.get_messages_by_ids(&reversed).unwrap();
        let got: Vec<_> = messages.iter().map(|m| m.id).collect();
        assert_eq!(got, ids.into_iter().rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_dates_empty_channel() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(db.get_channel_message_dates("Lobby", &Utc).unwrap().is_empty());

        // The channel row survives with all of its messages gone.
        db.log_channel_message("Lobby", "Lobby", &say("Alice", "x", t0())).unwrap();
        db.conn().execute("DELETE FROM channelmessage", []).unwrap();
        assert!(db.get_channel_message_dates("Lobby", &Utc).unwrap().is_empty());
        assert!(!db.validate_channel_in_logs("Lobby").unwrap());
    }

    #[test]
    fn test_dates_bucket_in_viewer_zone() {
        let mut db = Database::open_in_memory().unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap();
        db.log_channel_message("Lobby", "Lobby", &say("Alice", "late", late)).unwrap();
        db.log_channel_message("Lobby", "Lobby", &say("Alice", "later", late + Duration::seconds(30)))
            .unwrap();
        db.log_channel_message("Lobby", "Lobby", &say("Alice", "much later", late + Duration::days(3)))
            .unwrap();

        let utc_days = db.get_channel_message_dates("Lobby", &Utc).unwrap();
        assert_eq!(
            utc_days,
            [
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            ]
        );

        let plus_one = FixedOffset::east_opt(3600).unwrap();
        let local_days = db.get_channel_message_dates("Lobby", &plus_one).unwrap();
        assert_eq!(
            local_days,
            [
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            ]
        );
    }

    #[test]
    fn test_pm_dates_and_recent_conversations() {
        let mut db = Database::open_in_memory().unwrap();
        let me = CharacterName::new("Alice");
        let bob = CharacterName::new("Bob");
        let carol = CharacterName::new("Carol");
        db.log_pm_convo_message(&me, &bob, &say("Bob", "old", t0())).unwrap();
        db.log_pm_convo_message(&carol, &me, &say("Carol", "new", t0() + Duration::hours(2)))
            .unwrap();

        let dates = db.get_pm_conversation_dates(&bob, &me, &Utc).unwrap();
        assert_eq!(dates, [NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()]);

        let recent = db.get_recent_conversations(&me, 10).unwrap();
        let names: Vec<_> = recent.iter().map(|c| c.interlocutor.as_str()).collect();
        assert_eq!(names, ["Carol", "Bob"]);
        assert_eq!(db.get_recent_conversations(&me, 1).unwrap().len(), 1);

        assert!(db.validate_pm_convo_in_logs(&me, &carol).unwrap());
        assert!(!db.validate_pm_convo_in_logs(&bob, &carol).unwrap());
    }
}

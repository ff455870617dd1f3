//! Async facade over [`Database`].
//!
//! One connection serves every caller. A single-permit semaphore orders the
//! callers fairly; the permit is held while the closure runs on the blocking
//! pool. Waiting for the permit and running the query are both cancellable:
//! a cancelled query is interrupted at the SQLite level before the permit is
//! released, so the next caller never inherits a busy connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::InterruptHandle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use parley_shared::CharacterName;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::maintenance::{expiration_cutoff, EXPIRATION_BATCH};
use crate::models::{
    ChannelHint, DateAnchor, ExpirationReport, ImportedMessage, LoggedMessage, NewLogMessage,
    RecentConversation, SearchCriteria,
};

/// How often a cancelled query is re-interrupted until it unwinds.
const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

struct Shared {
    db: Mutex<Database>,
    gate: Semaphore,
    interrupt: InterruptHandle,
}

/// Cloneable handle to the log database, safe to use from many tasks.
#[derive(Clone)]
pub struct LogStore {
    shared: Arc<Shared>,
}

impl LogStore {
    pub fn new(db: Database) -> Self {
        let interrupt = db.interrupt_handle();
        Self {
            shared: Arc::new(Shared {
                db: Mutex::new(db),
                gate: Semaphore::new(1),
                interrupt,
            }),
        }
    }

    /// Open the database at `path` (migrating it) on the blocking pool.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let db = tokio::task::spawn_blocking(move || -> Result<Database> {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            tracing::info!(path = %path.display(), "opening log database");
            Database::open_at(&path)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("open task failed: {e}")))??;
        Ok(Self::new(db))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Refuse all further calls. Calls already holding the connection finish.
    pub fn close(&self) {
        self.shared.gate.close();
    }

    /// Run `f` against the database with exclusive access.
    pub async fn with_database<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            permit = self.shared.gate.acquire() => permit
                .map_err(|_| StoreError::Unavailable("log store closed".into()))?,
        };

        let shared = Arc::clone(&self.shared);
        let mut task = tokio::task::spawn_blocking(move || {
            let mut db = shared.db.lock();
            f(&mut db)
        });

        tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) => Err(StoreError::Unavailable(format!("store task failed: {e}"))),
            },
            _ = cancel.cancelled() => {
                // Keep interrupting until the closure returns; a statement
                // may not have started on the first attempt.
                let finished = loop {
                    self.shared.interrupt.interrupt();
                    tokio::select! {
                        joined = &mut task => break joined,
                        _ = tokio::time::sleep(INTERRUPT_RETRY) => {}
                    }
                };
                match finished {
                    // Completed before the interrupt landed.
                    Ok(Ok(value)) => Ok(value),
                    _ => Err(StoreError::Cancelled),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    pub async fn log_channel_message(
        &self,
        channel: &str,
        channel_title: &str,
        message: NewLogMessage,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let channel = channel.to_owned();
        let title = channel_title.to_owned();
        self.with_database(cancel, move |db| {
            db.log_channel_message(&channel, &title, &message)
        })
        .await
    }

    pub async fn log_pm_convo_message(
        &self,
        me: &CharacterName,
        interlocutor: &CharacterName,
        message: NewLogMessage,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let (me, interlocutor) = (me.clone(), interlocutor.clone());
        self.with_database(cancel, move |db| {
            db.log_pm_convo_message(&me, &interlocutor, &message)
        })
        .await
    }

    pub async fn import_messages(
        &self,
        batch: Vec<ImportedMessage>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.with_database(cancel, move |db| db.import_messages(&batch))
            .await
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub async fn get_channel_messages(
        &self,
        channel: &str,
        anchor: DateAnchor,
        date: DateTime<Utc>,
        max_entries: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<LoggedMessage>> {
        let channel = channel.to_owned();
        self.with_database(cancel, move |db| {
            db.get_channel_messages(&channel, anchor, date, max_entries)
        })
        .await
    }

    pub async fn get_pm_convo_messages(
        &self,
        me: &CharacterName,
        interlocutor: &CharacterName,
        anchor: DateAnchor,
        date: DateTime<Utc>,
        max_entries: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<LoggedMessage>> {
        let (me, interlocutor) = (me.clone(), interlocutor.clone());
        self.with_database(cancel, move |db| {
            db.get_pm_convo_messages(&me, &interlocutor, anchor, date, max_entries)
        })
        .await
    }

    pub async fn get_channel_hints_from_partial_name(
        &self,
        prefix: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelHint>> {
        let prefix = prefix.to_owned();
        self.with_database(cancel, move |db| {
            db.get_channel_hints_from_partial_name(&prefix, limit)
        })
        .await
    }

    pub async fn get_pm_convo_hints_from_partial_name(
        &self,
        my_name: &CharacterName,
        prefix: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CharacterName>> {
        let my_name = my_name.clone();
        let prefix = prefix.to_owned();
        self.with_database(cancel, move |db| {
            db.get_pm_convo_hints_from_partial_name(&my_name, &prefix, limit)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    pub async fn get_search_result_count(
        &self,
        criteria: SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        self.with_database(cancel, move |db| db.get_search_result_count(&criteria))
            .await
    }

    pub async fn get_search_result_ids(
        &self,
        criteria: SearchCriteria,
        skip: usize,
        take: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>> {
        self.with_database(cancel, move |db| {
            db.get_search_result_ids(&criteria, skip, take)
        })
        .await
    }

    pub async fn get_search_result_subset(
        &self,
        criteria: SearchCriteria,
        skip: usize,
        take: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<LoggedMessage>> {
        self.with_database(cancel, move |db| {
            db.get_search_result_subset(&criteria, skip, take)
        })
        .await
    }

    pub async fn get_messages_by_ids(
        &self,
        ids: Vec<i64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LoggedMessage>> {
        self.with_database(cancel, move |db| db.get_messages_by_ids(&ids))
            .await
    }

    pub async fn get_channel_message_dates<Tz>(
        &self,
        channel: &str,
        tz: Tz,
        cancel: &CancellationToken,
    ) -> Result<Vec<NaiveDate>>
    where
        Tz: TimeZone + Send + 'static,
    {
        let channel = channel.to_owned();
        self.with_database(cancel, move |db| {
            db.get_channel_message_dates(&channel, &tz)
        })
        .await
    }

    pub async fn get_pm_conversation_dates<Tz>(
        &self,
        me: &CharacterName,
        other: &CharacterName,
        tz: Tz,
        cancel: &CancellationToken,
    ) -> Result<Vec<NaiveDate>>
    where
        Tz: TimeZone + Send + 'static,
    {
        let (me, other) = (me.clone(), other.clone());
        self.with_database(cancel, move |db| {
            db.get_pm_conversation_dates(&me, &other, &tz)
        })
        .await
    }

    pub async fn get_recent_conversations(
        &self,
        character: &CharacterName,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecentConversation>> {
        let character = character.clone();
        self.with_database(cancel, move |db| {
            db.get_recent_conversations(&character, limit)
        })
        .await
    }

    pub async fn validate_channel_in_logs(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let name = name.to_owned();
        self.with_database(cancel, move |db| db.validate_channel_in_logs(&name))
            .await
    }

    pub async fn validate_pm_convo_in_logs(
        &self,
        me: &CharacterName,
        other: &CharacterName,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let (me, other) = (me.clone(), other.clone());
        self.with_database(cancel, move |db| db.validate_pm_convo_in_logs(&me, &other))
            .await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Delete messages older than `retention`, then strings nothing refers
    /// to any more. Each batch takes the connection separately so live
    /// logging interleaves with a long purge.
    pub async fn perform_expiration(
        &self,
        retention: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExpirationReport> {
        let mut report = ExpirationReport::default();
        let Some(cutoff) = expiration_cutoff(Utc::now(), retention) else {
            return Ok(report);
        };

        loop {
            let n = self
                .with_database(cancel, move |db| {
                    db.expire_messages_batch(cutoff, EXPIRATION_BATCH)
                })
                .await?;
            report.messages_deleted += n;
            if n < EXPIRATION_BATCH {
                break;
            }
        }

        let mut cursor = 0;
        loop {
            let (n, last) = self
                .with_database(cancel, move |db| {
                    db.delete_orphan_strings_batch(cursor, EXPIRATION_BATCH)
                })
                .await?;
            report.strings_deleted += n;
            match last {
                Some(last) => cursor = last,
                None => break,
            }
        }

        tracing::info!(
            messages = report.messages_deleted,
            strings = report.strings_deleted,
            cutoff = %cutoff,
            "log expiration complete"
        );
        Ok(report)
    }

    pub async fn get_log_file_size(&self, cancel: &CancellationToken) -> Result<u64> {
        self.with_database(cancel, |db| db.get_log_file_size()).await
    }

    pub async fn vacuum_database(&self, cancel: &CancellationToken) -> Result<()> {
        self.with_database(cancel, |db| db.vacuum_database()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use parley_shared::{Gender, LogMessageType, OnlineStatus};

    fn say(speaker: &str, text: &str, ts: DateTime<Utc>) -> NewLogMessage {
        NewLogMessage {
            speaker: CharacterName::new(speaker),
            gender: Gender::Male,
            status: OnlineStatus::Busy,
            message_type: LogMessageType::Chat,
            text: text.to_string(),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_same_text_one_string_row() {
        let store = LogStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        store
            .log_channel_message("Lobby", "Lobby", say("Alice", "hello", now), &cancel)
            .await
            .unwrap();
        store
            .log_channel_message("Lobby", "Lobby", say("Bob", "hello", now), &cancel)
            .await
            .unwrap();

        let strings = store
            .with_database(&cancel, |db| db.string_count())
            .await
            .unwrap();
        assert_eq!(strings, 1);
    }

    #[tokio::test]
    async fn test_round_trip_and_json_shape() {
        let store = LogStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let t0 = Utc::now() - ChronoDuration::minutes(1);
        store
            .log_channel_message("Lobby", "Lobby", say("Alice", "hi", t0 + ChronoDuration::seconds(1)), &cancel)
            .await
            .unwrap();

        let got = store
            .get_channel_messages("Lobby", DateAnchor::After, t0, 10, &cancel)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);

        let json = serde_json::to_value(&got[0]).unwrap();
        assert_eq!(json["speaker"], "Alice");
        assert_eq!(json["messageType"], "chat");
        assert_eq!(json["channel"]["kind"], "public");
    }

    #[tokio::test]
    async fn test_concurrent_writers_all_land() {
        let store = LogStore::open_in_memory().unwrap();
        let now = Utc::now();
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                store
                    .log_channel_message("Lobby", "", say("Alice", &format!("m{i}"), now), &cancel)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let cancel = CancellationToken::new();
        let count = store
            .get_search_result_count(SearchCriteria::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = LogStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .log_channel_message("Lobby", "", say("Alice", "never", Utc::now()), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let fresh = CancellationToken::new();
        assert!(!store.validate_channel_in_logs("Lobby", &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_query() {
        let store = LogStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        // Never terminates on its own.
        let err = store
            .with_database(&cancel, |db| {
                Ok(db.conn().query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                     SELECT count(*) FROM c",
                    [],
                    |r| r.get::<_, i64>(0),
                )?)
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        // The connection is usable again.
        let fresh = CancellationToken::new();
        assert_eq!(
            store.with_database(&fresh, |db| db.string_count()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_expiration_through_facade() {
        let store = LogStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let old = Utc::now() - ChronoDuration::days(10);
        store
            .log_channel_message("Lobby", "", say("Alice", "old", old), &cancel)
            .await
            .unwrap();
        store
            .log_channel_message("Lobby", "", say("Alice", "new", Utc::now()), &cancel)
            .await
            .unwrap();

        let report = store
            .perform_expiration(Duration::from_secs(86_400), &cancel)
            .await
            .unwrap();
        assert_eq!(report.messages_deleted, 1);
        assert_eq!(report.strings_deleted, 1);

        let none = store.perform_expiration(Duration::ZERO, &cancel).await.unwrap();
        assert_eq!(none, ExpirationReport::default());
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = LogStore::open_in_memory().unwrap();
        store.close();
        let cancel = CancellationToken::new();
        let err = store.get_log_file_size(&cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}

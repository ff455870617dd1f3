use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};

use crate::database::Database;
use crate::error::Result;
use crate::models::ExpirationReport;

/// Rows deleted per transaction during expiration.
pub const EXPIRATION_BATCH: usize = 1000;

impl Database {
    /// Delete up to `limit` messages older than `cutoff`. Returns how many
    /// were removed; fewer than `limit` means the backlog is drained.
    pub fn expire_messages_batch(&mut self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx
            .prepare_cached(
                "DELETE FROM channelmessage WHERE id IN (
                     SELECT id FROM channelmessage WHERE timestamp < ?1 LIMIT ?2
                 )",
            )?
            .execute(params![cutoff.timestamp_millis(), limit as i64])?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Delete strings no message references, scanning up to `limit` string
    /// rows with id greater than `after_id`.
    ///
    /// Returns the number deleted and the last id scanned, or `None` once
    /// the scan has passed the end of the table.
    pub fn delete_orphan_strings_batch(
        &mut self,
        after_id: i64,
        limit: usize,
    ) -> Result<(usize, Option<i64>)> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last: Option<i64> = tx
            .prepare_cached(
                "SELECT MAX(id) FROM (SELECT id FROM strings WHERE id > ?1 ORDER BY id LIMIT ?2)",
            )?
            .query_row(params![after_id, limit as i64], |row| row.get(0))?;
        let Some(last) = last else {
            return Ok((0, None));
        };

        let deleted = tx
            .prepare_cached(
                "DELETE FROM strings
                 WHERE id > ?1 AND id <= ?2
                   AND NOT EXISTS (
                       SELECT 1 FROM channelmessage cm WHERE cm.text_string_id = strings.id
                   )",
            )?
            .execute(params![after_id, last])?;
        tx.commit()?;
        Ok((deleted, Some(last)))
    }

    /// Run a whole expiration pass in one go. [`crate::LogStore`] drives the
    /// batches itself so it can yield the connection between them.
    pub fn perform_expiration(
        &mut self,
        now: DateTime<Utc>,
        retention: std::time::Duration,
    ) -> Result<ExpirationReport> {
        let mut report = ExpirationReport::default();
        let Some(cutoff) = expiration_cutoff(now, retention) else {
            return Ok(report);
        };

        loop {
            let n = self.expire_messages_batch(cutoff, EXPIRATION_BATCH)?;
            report.messages_deleted += n;
            if n < EXPIRATION_BATCH {
                break;
            }
        }

        let mut cursor = 0;
        while let (n, Some(last)) = self.delete_orphan_strings_batch(cursor, EXPIRATION_BATCH)? {
            report.strings_deleted += n;
            cursor = last;
        }

        Ok(report)
    }

    /// Bytes on disk for the database and its WAL and shared-memory files.
    /// An in-memory database reports 0.
    pub fn get_log_file_size(&self) -> Result<u64> {
        let Some(path) = self.path() else {
            return Ok(0);
        };

        let mut total = 0;
        for candidate in [path.clone(), sidecar(&path, "-wal"), sidecar(&path, "-shm")] {
            match std::fs::metadata(&candidate) {
                Ok(meta) => total += meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// Rebuild the database file, returning freed pages to the filesystem.
    pub fn vacuum_database(&self) -> Result<()> {
        let before = self.get_log_file_size()?;
        self.conn().execute_batch("VACUUM")?;
        let after = self.get_log_file_size()?;
        tracing::info!(before, after, "vacuumed log database");
        Ok(())
    }
}

/// Instant before which messages expire, or `None` when retention is off.
pub fn expiration_cutoff(now: DateTime<Utc>, retention: std::time::Duration) -> Option<DateTime<Utc>> {
    if retention.is_zero() {
        return None;
    }
    let retention = chrono::Duration::from_std(retention).ok()?;
    now.checked_sub_signed(retention)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

//! Database migration runner.
//!
//! Migrations are executed in ascending version order on every
//! [`Database::open_at`](crate::Database::open_at) call. Each step inspects
//! the live schema through its `needs_upgrade` check and, when needed, runs
//! its idempotent `up` action and records itself in `schema_version`, all in
//! one transaction. The first failing step aborts the open: a half-migrated
//! schema is never handed out.

pub mod v001_initial;
pub mod v002_channel_identity;
pub mod v003_message_indexes;
pub mod v004_strings_fts;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Result, StoreError};

/// One forward-only schema step.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    /// Returns `true` when the live schema lacks what this step creates.
    pub needs_upgrade: fn(&Connection) -> rusqlite::Result<bool>,
    /// Must be safe to run against a schema that is partially upgraded.
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

/// All migrations, in the order they must run.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        needs_upgrade: v001_initial::needs_upgrade,
        up: v001_initial::up,
    },
    Migration {
        version: 2,
        name: "channel_identity",
        needs_upgrade: v002_channel_identity::needs_upgrade,
        up: v002_channel_identity::up,
    },
    Migration {
        version: 3,
        name: "message_indexes",
        needs_upgrade: v003_message_indexes::needs_upgrade,
        up: v003_message_indexes::up,
    },
    Migration {
        version: 4,
        name: "strings_fts",
        needs_upgrade: v004_strings_fts::needs_upgrade,
        up: v004_strings_fts::up,
    },
];

/// Current schema version.
pub const CURRENT_VERSION: u32 = 4;

const VERSION_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version    INTEGER PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    applied_at INTEGER NOT NULL               -- unix millis
);
"#;

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    run_steps(conn, MIGRATIONS)
}

pub(crate) fn run_steps(conn: &mut Connection, steps: &[Migration]) -> Result<()> {
    conn.execute_batch(VERSION_TABLE_SQL)?;

    let current = recorded_version(conn)?;
    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    for step in steps {
        match apply(conn, step) {
            Ok(true) => {
                tracing::info!(version = step.version, name = step.name, "applied migration");
            }
            Ok(false) => {
                tracing::debug!(version = step.version, name = step.name, "migration not needed");
            }
            Err(source) => {
                tracing::error!(
                    version = step.version,
                    name = step.name,
                    error = %source,
                    "migration failed"
                );
                return Err(StoreError::Migration {
                    version: step.version,
                    name: step.name,
                    source,
                });
            }
        }
    }

    Ok(())
}

/// Highest version recorded in `schema_version`, or 0 for a fresh database.
pub fn recorded_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn apply(conn: &mut Connection, step: &Migration) -> rusqlite::Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let needed = (step.needs_upgrade)(&tx)?;
    if needed {
        (step.up)(&tx)?;
    }

    let recorded: Option<u32> = tx
        .query_row(
            "SELECT version FROM schema_version WHERE version = ?1",
            params![step.version],
            |row| row.get(0),
        )
        .optional()?;
    if recorded.is_none() {
        tx.execute(
            "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![step.version, step.name, chrono::Utc::now().timestamp_millis()],
        )?;
    }

    tx.commit()?;
    Ok(needed)
}

// ---------------------------------------------------------------------------
// Schema inspection helpers
// ---------------------------------------------------------------------------

pub(crate) fn object_exists(conn: &Connection, kind: &str, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
        params![kind, name],
        |row| row.get(0),
    )
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    object_exists(conn, "table", name)
}

pub(crate) fn index_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    object_exists(conn, "index", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_dump(conn: &Connection) -> Vec<(String, Option<String>)> {
        let mut stmt = conn
            .prepare("SELECT name, sql FROM sqlite_master ORDER BY name")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(recorded_version(&conn).unwrap(), CURRENT_VERSION);
        assert!(table_exists(&conn, "strings_fts").unwrap());
    }

    #[test]
    fn test_versions_strictly_ascending() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(CURRENT_VERSION));
    }

    #[test]
    fn test_rerun_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        let before = schema_dump(&conn);

        for step in MIGRATIONS {
            assert!(!(step.needs_upgrade)(&conn).unwrap(), "{} still needs upgrade", step.name);
        }

        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_dump(&conn), before);
    }

    #[test]
    fn test_restart_mid_sequence_resumes() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_steps(&mut conn, &MIGRATIONS[..2]).unwrap();
        assert_eq!(recorded_version(&conn).unwrap(), 2);

        run_migrations(&mut conn).unwrap();
        assert_eq!(recorded_version(&conn).unwrap(), CURRENT_VERSION);
        assert!(!(MIGRATIONS[1].needs_upgrade)(&conn).unwrap());
    }

    fn always(_: &Connection) -> rusqlite::Result<bool> {
        Ok(true)
    }

    fn broken_up(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch("CREATE TABLE half_done (id INTEGER); SELECT * FROM no_such_table;")
    }

    #[test]
    fn test_failed_step_rolls_back_and_aborts() {
        let mut conn = Connection::open_in_memory().unwrap();
        let steps = [
            Migration {
                version: 1,
                name: "initial",
                needs_upgrade: v001_initial::needs_upgrade,
                up: v001_initial::up,
            },
            Migration {
                version: 2,
                name: "broken",
                needs_upgrade: always,
                up: broken_up,
            },
        ];

        let err = run_steps(&mut conn, &steps).unwrap_err();
        assert!(matches!(err, StoreError::Migration { version: 2, .. }));
        assert!(!table_exists(&conn, "half_done").unwrap());
        assert_eq!(recorded_version(&conn).unwrap(), 1);
    }
}

//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. It is synchronous; the
//! async [`LogStore`](crate::LogStore) wraps it for use from tokio tasks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::{Connection, InterruptHandle};

use crate::error::{Result, StoreError};
use crate::interning::CharacterCache;
use crate::migrations;

/// File name of the log database inside the data directory.
pub const DATABASE_FILE: &str = "chatlogs.db";

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    characters: CharacterCache,
}

impl Database {
    /// Open (or create) the default log database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/parley/chatlogs.db`
    /// - macOS:   `~/Library/Application Support/net.parley.parley/chatlogs.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\chatlogs.db`
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path()?;
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        tracing::info!(path = %db_path.display(), "opening log database");

        Self::open_at(&db_path)
    }

    /// Platform default location of the log database.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("net", "parley", "parley").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join(DATABASE_FILE))
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database. Nothing is persisted.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        // A failed migration aborts the open.
        migrations::run_migrations(&mut conn)?;

        Ok(Self {
            conn,
            characters: CharacterCache::default(),
        })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Connection and character cache borrowed together, for write
    /// transactions that resolve characters.
    pub(crate) fn parts_mut(&mut self) -> (&mut Connection, &mut CharacterCache) {
        (&mut self.conn, &mut self.characters)
    }

    /// Handle that aborts whatever statement is running on this connection.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

//! SQLite-backed session storage.
//!
//! [`SqliteSessionStorage`] keeps the session's key-value pairs in a single
//! `session_kv` table, namespaced by a session identifier so one file can
//! outlive several sign-ins without leaking state between them.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migrations;
use crate::session::SessionStorage;

/// Session storage persisted in a SQLite file.
pub struct SqliteSessionStorage {
    conn: Mutex<Connection>,
    session: String,
}

impl SqliteSessionStorage {
    /// Open (or create) the session database in the platform cache directory.
    ///
    /// - Linux:   `~/.cache/parley/session.db`
    /// - macOS:   `~/Library/Caches/app.parley.parley/session.db`
    /// - Windows: `{FOLDERID_LocalAppData}\parley\parley\cache\session.db`
    pub fn open_default(session: &str) -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("app", "parley", "parley").ok_or(StoreError::NoCacheDir)?;

        let cache_dir = project_dirs.cache_dir();
        std::fs::create_dir_all(cache_dir)?;

        let db_path = cache_dir.join("session.db");

        tracing::info!(path = %db_path.display(), "opening session database");

        Self::open_at(&db_path, session)
    }

    /// Open (or create) a session database at an explicit path.
    pub fn open_at(path: &Path, session: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, session)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory(session: &str) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, session)
    }

    fn from_connection(conn: Connection, session: &str) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            session: session.to_string(),
        })
    }

    /// The session namespace this handle reads and writes.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Drop every key of this session, e.g. on sign-out.
    pub fn clear_session(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let affected = conn.execute(
            "DELETE FROM session_kv WHERE session = ?1",
            params![self.session],
        )?;
        Ok(affected)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        let conn = self.conn.lock().ok()?;
        conn.path().map(PathBuf::from)
    }
}

impl SessionStorage for SqliteSessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM session_kv WHERE session = ?1 AND key = ?2",
                params![self.session, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO session_kv (session, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (session, key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
            params![self.session, key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "DELETE FROM session_kv WHERE session = ?1 AND key = ?2",
            params![self.session, key],
        )?;
        Ok(())
    }
}

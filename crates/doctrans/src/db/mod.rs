//! SQLite storage for the job history.
//!
//! One rusqlite connection per [`Database`], shared by clones behind a
//! mutex. Several processes may open the same file; writers wait on
//! each other for up to [`BUSY_TIMEOUT`].

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod history_repo;
pub mod migrations;

pub use error::DatabaseError;

/// How long a statement waits for another connection's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the history file at `path`, creating it and its directory on
    /// first use, and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("History database opened at {}", path.display());
        Ok(db)
    }

    /// Private database that vanishes with the handle.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive use of the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_rows(db: &Database) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM history", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_file_database_lives_under_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("history.db");
        let db = Database::open(&path).unwrap();

        assert!(path.is_file());
        assert_eq!(history_rows(&db), 0);
        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_two_handles_see_each_others_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let writer = Database::open(&path).unwrap();
        let reader = Database::open(&path).unwrap();

        writer
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO history (id, source_path, original_name, status, created_at, updated_at)
                     VALUES ('j1', '/docs/a.pdf', 'a.pdf', 'running', '2026-03-01', '2026-03-01')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        assert_eq!(history_rows(&reader), 1);
    }

    #[test]
    fn test_in_memory_databases_are_separate() {
        let first = Database::open_in_memory().unwrap();
        let second = Database::open_in_memory().unwrap();
        first
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO history (id, source_path, original_name, status, created_at, updated_at)
                     VALUES ('j1', '/docs/a.pdf', 'a.pdf', 'queued', '2026-03-01', '2026-03-01')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        assert_eq!(history_rows(&first.clone()), 1);
        assert_eq!(history_rows(&second), 0);
    }
}

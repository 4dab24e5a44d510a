//! SQLite issue store.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so monitors can read while a command writes
//! - `busy_timeout = 5s` to ride out short lock contention between processes
//! - `foreign_keys = ON`
//!
//! One [`Store`] exists per resolved database path per process. Callers go
//! through [`Store::open`], which reuses the registered handle instead of
//! opening another connection, so a monitor that re-opens on every refresh
//! does not leak file descriptors.

pub mod action_log;
pub mod activity;
pub mod history;
pub mod issues;
pub mod links;
pub mod migrations;
pub mod planning;
pub mod records;
pub mod schema;
pub mod sync_state;

use crate::error::{Result, TdError};
use rusqlite::{Connection, Transaction};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File name of the database inside `.todos/`.
pub const DB_FILE: &str = "issues.db";

/// Shared handle on one SQLite database.
///
/// Cloning is cheap; all clones share one connection. Writers serialize on
/// the inner mutex and on SQLite's own file lock.
#[derive(Clone)]
pub struct Store {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

fn registry() -> &'static Mutex<HashMap<PathBuf, Store>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Store>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registry key: canonical parent directory plus file name, so the key is the
/// same before and after the database file exists.
fn registry_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map_or_else(|_| path.to_path_buf(), |dir| dir.join(name)),
        _ => path.to_path_buf(),
    }
}

impl Store {
    /// Open (or reuse) the store at `path`, creating and migrating it when
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `database_error` if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key = registry_key(path);
        let mut stores = registry().lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = stores.get(&key) {
            return Ok(existing.clone());
        }
        let conn = open_connection(path)?;
        let store = Self {
            path: Some(key.clone()),
            conn: Arc::new(Mutex::new(conn)),
        };
        stores.insert(key, store.clone());
        tracing::debug!(path = %path.display(), "opened issue store");
        Ok(store)
    }

    /// Open the store for a project's `.todos` directory.
    ///
    /// # Errors
    ///
    /// See [`Store::open`].
    pub fn open_project(todos_dir: &Path) -> Result<Self> {
        Self::open(&todos_dir.join(DB_FILE))
    }

    /// Private in-memory store, never registered. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns `database_error` if SQLite cannot migrate the schema.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            path: None,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Drop the registered handle for `path` so the next [`Store::open`]
    /// reopens the file. Used after the database file is replaced.
    pub fn evict(path: &Path) {
        let key = registry_key(path);
        let mut stores = registry().lock().unwrap_or_else(PoisonError::into_inner);
        if stores.remove(&key).is_some() {
            tracing::debug!(path = %path.display(), "evicted issue store");
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read against the connection.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    /// Run `f` inside one immediate transaction. The transaction commits only
    /// when `f` returns `Ok`.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error; the transaction is rolled back.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Flush WAL content into the main database file. Called before the
    /// file is copied or replaced.
    ///
    /// # Errors
    ///
    /// Returns `database_error` when the checkpoint fails.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Consistent copy of the whole database as bytes.
    ///
    /// # Errors
    ///
    /// Returns `database_error` when the copy fails.
    pub fn export_bytes(&self) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("export.db");
        let conn = self.lock();
        conn.execute("VACUUM INTO ?1", [target.to_string_lossy().as_ref()])?;
        drop(conn);
        Ok(std::fs::read(&target)?)
    }

    /// Swap the database file for `replacement` while holding the
    /// connection lock. Every clone of this store sees the new contents.
    ///
    /// `replacement` must already have passed [`validate_database_file`] and
    /// live on the same filesystem as the store.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` for in-memory stores and `database_error` when
    /// the new file cannot be opened; in that case the old connection is
    /// restored if the original file is still in place.
    pub fn replace_file(&self, replacement: &Path) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Err(TdError::invalid("in-memory store cannot be replaced"));
        };
        let mut conn = self.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        let old = std::mem::replace(&mut *conn, Connection::open_in_memory()?);
        if let Err((old, err)) = old.close() {
            *conn = old;
            return Err(err.into());
        }
        for suffix in ["-wal", "-shm"] {
            let mut side = path.clone().into_os_string();
            side.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(side));
        }
        if let Err(err) = std::fs::rename(replacement, &path) {
            *conn = open_connection(&path)?;
            return Err(err.into());
        }
        *conn = open_connection(&path)?;
        tracing::info!(path = %path.display(), "database replaced from snapshot");
        Ok(())
    }
}

/// Open a connection, apply pragmas and migrate.
///
/// # Errors
///
/// Returns `database_error` on any SQLite failure.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Check that a file is a readable `td` database: it opens, passes
/// `quick_check`, carries an `issues` table, and is not from a newer schema
/// than this binary migrates to.
///
/// # Errors
///
/// Returns `database_error` describing the first failed check.
pub fn validate_database_file(path: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if check != "ok" {
        return Err(TdError::Execution(format!(
            "snapshot integrity check failed: {check}"
        )));
    }
    let has_issues: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'issues')",
        [],
        |row| row.get(0),
    )?;
    if !has_issues {
        return Err(TdError::Execution(
            "snapshot does not contain an issues table".to_string(),
        ));
    }
    let version = migrations::current_schema_version(&conn)?;
    if version > migrations::LATEST_SCHEMA_VERSION {
        return Err(TdError::Execution(format!(
            "snapshot schema version {version} is newer than supported version {}",
            migrations::LATEST_SCHEMA_VERSION
        )));
    }
    Ok(())
}

/// `?, ?, ?` placeholder list of length `n`.
#[must_use]
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_sets_wal_busy_timeout_and_fk() {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open_project(dir.path()).expect("open");
        store
            .read(|conn| {
                let journal_mode: String =
                    conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
                assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
                let busy: u64 = conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
                assert_eq!(u128::from(busy), DEFAULT_BUSY_TIMEOUT.as_millis());
                let fk: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
                assert_eq!(fk, 1);
                Ok(())
            })
            .expect("pragmas");
    }

    #[test]
    fn open_reuses_registered_handle() {
        let dir = TempDir::new().expect("tempdir");
        let a = Store::open_project(dir.path()).expect("open a");
        let b = Store::open_project(dir.path()).expect("open b");
        assert!(Arc::ptr_eq(&a.conn, &b.conn));

        Store::evict(&dir.path().join(DB_FILE));
        let c = Store::open_project(dir.path()).expect("open c");
        assert!(!Arc::ptr_eq(&a.conn, &c.conn));
    }

    #[test]
    fn write_rolls_back_on_error() {
        let store = Store::open_in_memory().expect("store");
        let result: Result<()> = store.write(|tx| {
            tx.execute(
                "INSERT INTO sync_state (key, value) VALUES ('k', 'v')",
                [],
            )?;
            Err(TdError::invalid("boom"))
        });
        assert!(result.is_err());
        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sync_state", [], |r| r.get(0))?))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn validate_rejects_non_database() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("junk.db");
        std::fs::write(&path, b"not a database at all, just bytes").expect("write");
        assert!(validate_database_file(&path).is_err());

        let good = dir.path().join("good.db");
        drop(open_connection(&good).expect("create"));
        validate_database_file(&good).expect("valid");
    }

    #[test]
    fn validate_rejects_newer_schema() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("future.db");
        let conn = open_connection(&path).expect("create");
        conn.pragma_update(None, "user_version", migrations::LATEST_SCHEMA_VERSION + 1)
            .expect("bump");
        drop(conn);
        let err = validate_database_file(&path).expect_err("newer schema");
        assert!(err.to_string().contains("newer"), "{err}");
    }
}

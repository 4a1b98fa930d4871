//! SQLite database owning a single read-write connection

use crate::Result;
use crate::config::SqliteDatabaseConfig;
use crate::error::Error;
use crate::write_guard::WriteGuard;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// SQLite database backed by exactly one read-write connection.
///
/// All engine calls go through [`acquire_writer()`](Self::acquire_writer), which hands out
/// exclusive access to the connection. Because reads and writes share the connection, a read
/// issued while a transaction is open sees that transaction's uncommitted writes.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_conn::SqliteDatabase;
///
/// # async fn example() -> Result<(), sqlx_sqlite_conn::Error> {
/// let db = SqliteDatabase::open("test.db", None).await?;
///
/// let mut conn = db.acquire_writer().await?;
/// let rows = sqlx::query("SELECT * FROM users")
///     .fetch_all(&mut *conn)
///     .await?;
/// drop(conn);
///
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteDatabase {
   /// The one connection; `None` once the database is closed
   conn: Arc<Mutex<Option<SqliteConnection>>>,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Path to database file
   path: PathBuf,
}

impl SqliteDatabase {
   /// Open a SQLite database
   ///
   /// Every call opens a new, independent connection; there is no process-wide registry.
   ///
   /// # Arguments
   ///
   /// * `path` - Path to the SQLite database file, or `:memory:`
   /// * `custom_config` - Optional configuration. Pass `None` to use defaults.
   ///
   /// # Errors
   ///
   /// Returns [`Error::SchemaVersionMismatch`] when `expected_user_version` is configured and
   /// differs from the database's `PRAGMA user_version`. The connection is closed again before
   /// the error is returned.
   ///
   /// # Examples
   ///
   /// ```no_run
   /// use sqlx_sqlite_conn::{SqliteDatabase, SqliteDatabaseConfig};
   ///
   /// # async fn example() -> Result<(), sqlx_sqlite_conn::Error> {
   /// let config = SqliteDatabaseConfig {
   ///    expected_user_version: Some(2),
   ///    ..Default::default()
   /// };
   /// let db = SqliteDatabase::open("test.db", Some(config)).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn open(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Self> {
      let config = custom_config.unwrap_or_default();
      let path = path.as_ref();

      if path.as_os_str().is_empty() {
         return Err(Error::InvalidPath("Database path cannot be empty".to_string()));
      }

      let options = if is_memory_database(path) {
         SqliteConnectOptions::from_str("sqlite::memory:")?
      } else {
         SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(config.create_if_missing)
      };

      let mut conn = options
         .read_only(false)
         .statement_cache_capacity(config.statement_cache_capacity)
         .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
         .connect()
         .await?;

      if let Some(expected) = config.expected_user_version {
         let found: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut conn)
            .await?;

         if found != expected {
            if let Err(e) = conn.close().await {
               warn!("closing connection after version mismatch failed: {}", e);
            }
            return Err(Error::SchemaVersionMismatch { expected, found });
         }
      }

      debug!(path = %path.display(), "Opened SQLite database");

      Ok(Self {
         conn: Arc::new(Mutex::new(Some(conn))),
         closed: AtomicBool::new(false),
         path: path.to_path_buf(),
      })
   }

   /// Acquire exclusive access to the connection
   ///
   /// Waits until any other guard is dropped. Fails with [`Error::DatabaseClosed`] once
   /// [`close()`](Self::close) has run.
   pub async fn acquire_writer(&self) -> Result<WriteGuard> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }

      let slot = Arc::clone(&self.conn).lock_owned().await;

      // close() may have won the race for the lock
      OwnedMutexGuard::try_map(slot, |conn| conn.as_mut())
         .map(WriteGuard::new)
         .map_err(|_| Error::DatabaseClosed)
   }

   /// Read `PRAGMA user_version`
   pub async fn user_version(&self) -> Result<i64> {
      let mut conn = self.acquire_writer().await?;
      let version = sqlx::query_scalar("PRAGMA user_version")
         .fetch_one(&mut *conn)
         .await?;
      Ok(version)
   }

   /// Returns true once [`close()`](Self::close) has been called
   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   /// Path this database was opened with
   pub fn path(&self) -> &Path {
      &self.path
   }

   /// Close the connection
   ///
   /// Waits for the current guard holder to finish. Any transaction still open on the
   /// connection is rolled back by the engine, so callers that must keep uncommitted work
   /// commit before closing. Closing twice is a no-op.
   pub async fn close(&self) -> Result<()> {
      let mut slot = self.conn.lock().await;
      self.closed.store(true, Ordering::SeqCst);

      if let Some(conn) = slot.take() {
         conn.close().await?;
         debug!(path = %self.path.display(), "Closed SQLite database");
      }

      Ok(())
   }
}

/// Returns true for paths that name an in-memory database
pub fn is_memory_database(path: &Path) -> bool {
   let path = path.to_string_lossy();
   path == ":memory:" || path == "sqlite::memory:"
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_is_memory_database() {
      assert!(is_memory_database(Path::new(":memory:")));
      assert!(is_memory_database(Path::new("sqlite::memory:")));
      assert!(!is_memory_database(Path::new("memory.db")));
   }

   #[tokio::test]
   async fn test_empty_path_rejected() {
      let result = SqliteDatabase::open("", None).await;
      assert!(matches!(result, Err(Error::InvalidPath(_))));
   }

   #[tokio::test]
   async fn test_close_is_idempotent() {
      let db = SqliteDatabase::open(":memory:", None).await.unwrap();
      db.close().await.unwrap();
      db.close().await.unwrap();
      assert!(db.is_closed());
   }
}

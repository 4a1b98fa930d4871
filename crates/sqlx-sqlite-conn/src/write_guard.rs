//! WriteGuard for exclusive access to the database connection

use sqlx::sqlite::SqliteConnection;
use std::ops::{Deref, DerefMut};
use tokio::sync::OwnedMappedMutexGuard;

/// RAII guard for exclusive access to the database connection
///
/// Only one `WriteGuard` can exist at a time, so every statement issued through a guard
/// runs to completion before another caller (including a background commit timer) can
/// touch the connection. The connection is released when the guard is dropped.
///
/// The guard derefs to `SqliteConnection` allowing direct use with sqlx queries.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_conn::SqliteDatabase;
/// use sqlx::query;
///
/// # async fn example() -> Result<(), sqlx_sqlite_conn::Error> {
/// let db = SqliteDatabase::open("test.db", None).await?;
/// let mut conn = db.acquire_writer().await?;
/// query("INSERT INTO users (name) VALUES (?)")
///     .bind("Alice")
///     .execute(&mut *conn)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WriteGuard {
   conn: OwnedMappedMutexGuard<Option<SqliteConnection>, SqliteConnection>,
}

impl WriteGuard {
   pub(crate) fn new(
      conn: OwnedMappedMutexGuard<Option<SqliteConnection>, SqliteConnection>,
   ) -> Self {
      Self { conn }
   }
}

impl Deref for WriteGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for WriteGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}

//! Configuration for the SQLite connection

use serde::{Deserialize, Serialize};

/// Configuration for [`SqliteDatabase`](crate::SqliteDatabase)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn::SqliteDatabaseConfig;
///
/// // Use defaults
/// let config = SqliteDatabaseConfig::default();
///
/// // Require a specific schema version, keep everything else
/// let config = SqliteDatabaseConfig {
///     expected_user_version: Some(3),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteDatabaseConfig {
   /// Create the database file when it does not exist yet
   ///
   /// Default: true
   pub create_if_missing: bool,

   /// Capacity of the connection's prepared-statement cache
   ///
   /// Statements are prepared once per distinct SQL text and reused for the
   /// lifetime of the connection.
   ///
   /// Default: 100
   pub statement_cache_capacity: usize,

   /// How long a statement waits on a locked database file (in seconds)
   ///
   /// Default: 5
   pub busy_timeout_secs: u64,

   /// Expected value of `PRAGMA user_version`
   ///
   /// When set, opening a database whose user version differs fails with
   /// [`Error::SchemaVersionMismatch`](crate::Error::SchemaVersionMismatch).
   ///
   /// Default: None (no check)
   pub expected_user_version: Option<i64>,
}

impl Default for SqliteDatabaseConfig {
   fn default() -> Self {
      Self {
         create_if_missing: true,
         statement_cache_capacity: 100,
         busy_timeout_secs: 5,
         expected_user_version: None,
      }
   }
}

//! Error types for sqlx-sqlite-conn

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-conn
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// The database file was written by a different schema version than expected.
   ///
   /// Raised by `open` before the connection is handed out.
   #[error("Schema version mismatch: expected user_version {expected}, found {found}")]
   SchemaVersionMismatch { expected: i64, found: i64 },

   /// Invalid database path provided
   #[error("Invalid database path: {0}")]
   InvalidPath(String),
}

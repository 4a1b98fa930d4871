//! Error types for the sqlx-sqlite-audit crate.

/// Errors that can occur while preparing or reading change tracking.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// The table to track does not exist.
   #[error("table not found: {0}")]
   TableNotFound(String),

   /// Key columns identify rows in the log and cannot be excluded.
   #[error("cannot exclude key column '{column}' of table '{table}'")]
   KeyColumnExcluded { table: String, column: String },

   /// A log row could not be decoded.
   #[error("invalid change record: {0}")]
   InvalidChangeRecord(String),
}

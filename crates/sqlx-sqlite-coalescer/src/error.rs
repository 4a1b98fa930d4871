/// Result type alias for coalescer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for SQLite coalescer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection owner (closed database, schema version mismatch, ...).
   #[error(transparent)]
   Connection(#[from] sqlx_sqlite_conn::Error),

   /// Error from change tracking.
   #[error(transparent)]
   Audit(#[from] sqlx_sqlite_audit::Error),

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Multiple rows returned from fetch_one query.
   #[error("fetch_one() query returned {0} rows, expected 0 or 1")]
   MultipleRowsReturned(usize),

   /// A named statement referred to a table or view that does not exist.
   #[error("unknown table or view: {0}")]
   UnknownTable(String),

   /// A named statement referred to a column the table does not have.
   #[error("unknown column '{column}' in {table}")]
   UnknownColumn { table: String, column: String },

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => sqlx_error_code(e),
         Error::Connection(sqlx_sqlite_conn::Error::Sqlx(e)) => sqlx_error_code(e),
         Error::Connection(sqlx_sqlite_conn::Error::DatabaseClosed) => {
            "DATABASE_CLOSED".to_string()
         }
         Error::Connection(sqlx_sqlite_conn::Error::SchemaVersionMismatch { .. }) => {
            "SCHEMA_VERSION_MISMATCH".to_string()
         }
         Error::Connection(_) => "CONNECTION_ERROR".to_string(),
         Error::Audit(sqlx_sqlite_audit::Error::Sqlx(e)) => sqlx_error_code(e),
         Error::Audit(_) => "AUDIT_ERROR".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::MultipleRowsReturned(_) => "MULTIPLE_ROWS_RETURNED".to_string(),
         Error::UnknownTable(_) => "UNKNOWN_TABLE".to_string(),
         Error::UnknownColumn { .. } => "UNKNOWN_COLUMN".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }
}

fn sqlx_error_code(e: &sqlx::Error) -> String {
   if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
      return format!("SQLITE_{}", code);
   }
   "SQLX_ERROR".to_string()
}

//! Trigger-based change auditing for SQLite tables using sqlx.
//!
//! Given a table, this crate derives the SQL for three `AFTER` triggers (insert, update,
//! delete) that append one row per changed row to a caller-owned log table. Once the
//! triggers are installed the engine captures every change itself; no application code
//! runs on the write path.
//!
//! Two capture modes are supported:
//!
//! - [`CaptureMode::Json`]: `(id, table_name, before, after, timestamp)` rows holding JSON
//!   objects of the row before and after the change. Updates record only the columns that
//!   changed, plus the key columns in `before`.
//! - [`CaptureMode::Sql`]: `(id, statement, timestamp)` rows holding a literal SQL statement
//!   that replays the change.
//!
//! The log table is never created by this crate. For JSON mode it needs the columns
//! `id INTEGER PRIMARY KEY`, `table_name TEXT`, `"before" TEXT`, `"after" TEXT` and
//! `timestamp INTEGER`; for SQL mode `id INTEGER PRIMARY KEY`, `statement TEXT` and
//! `timestamp INTEGER`. A log table lacking those columns surfaces as an engine error from
//! the trigger DDL or from the first audited write.
//!
//! # Example
//!
//! ```no_run
//! use sqlx::Connection;
//! use sqlx_sqlite_audit::{CaptureMode, TrackingOptions, tracking_ddl};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = sqlx::SqliteConnection::connect("sqlite::memory:").await?;
//! let options = TrackingOptions::new("changes").with_mode(CaptureMode::Json);
//! let ddl = tracking_ddl(&mut conn, "foo", &options).await?;
//! sqlx::raw_sql(&ddl).execute(&mut conn).await?;
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod change_log;
pub mod config;
pub mod error;
pub mod schema;
pub mod trigger;

pub use change::{CaptureMode, ChangeOperation, JsonChange, SqlChange};
pub use config::{TrackingOptions, TriggerSchema};
pub use change_log::{read_json_changes, read_sql_changes};
pub use error::Error;
pub use schema::{ColumnInfo, TableInfo, query_table_info};
pub use trigger::{TriggerSpec, drop_triggers, generate, quote_ident, quote_literal, trigger_name};

pub type Result<T> = std::result::Result<T, Error>;

/// Introspects `table` and returns the DDL installing its change-tracking triggers.
///
/// Key columns are the table's primary key in key order (`rowid` when none is declared);
/// data columns are the remaining columns in declaration order minus
/// [`TrackingOptions::exclude_columns`]. The returned text is a batch of
/// `CREATE TRIGGER IF NOT EXISTS` statements; the caller executes it.
pub async fn tracking_ddl(
   conn: &mut sqlx::SqliteConnection,
   table: &str,
   options: &TrackingOptions,
) -> Result<String> {
   let info = query_table_info(conn, table)
      .await?
      .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

   let (keys, data) = info.partition(&options.exclude_columns)?;

   tracing::debug!(
      table = %table,
      destination = %options.destination,
      mode = ?options.mode,
      keys = ?keys,
      data = ?data,
      "Generating change tracking triggers"
   );

   let spec = TriggerSpec::new(table, keys, data, &options.destination)
      .with_mode(options.mode)
      .with_schema(options.schema)
      .with_excluded(options.exclude_columns.iter().cloned());

   Ok(generate(&spec))
}

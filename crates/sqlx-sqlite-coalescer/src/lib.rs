//! SQLite convenience layer over a single sqlx connection.
//!
//! This crate sits on top of the connection owner (`sqlx-sqlite-conn`) and the trigger
//! generator (`sqlx-sqlite-audit`). It provides:
//!
//! - [`DatabaseWrapper`], the main entry point, owning one connection
//! - Timer-coalesced commits: many logical writes share one physical transaction, which a
//!   background timer commits every interval
//! - Flattened transaction scopes ([`DatabaseWrapper::run_sync`],
//!   [`DatabaseWrapper::run_coalesced`])
//! - Pre/post write hooks with idempotent disposal ([`WriteHook`], [`HookHandle`])
//! - Named insert/select statements resolved from column introspection
//! - Change tracking through generated audit triggers
//! - JSON type decoding for SQLite values
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_sqlite_coalescer::{CoalescerConfig, DatabaseWrapper, Error};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoalescerConfig { coalescing_interval_ms: 100 };
//! let db = DatabaseWrapper::open("mydb.db", None, Some(config)).await?;
//!
//! // Write: joins the open physical transaction, committed by the timer
//! db.execute("INSERT INTO users (name) VALUES (?)", vec![json!("Alice")]).await?;
//!
//! // Read: sees the uncommitted write
//! let rows = db.fetch_all("SELECT * FROM users", vec![]).await?;
//!
//! // All or nothing
//! db.run_sync(async |db| {
//!    db.execute("INSERT INTO users (name) VALUES (?)", vec![json!("Bob")]).await?;
//!    db.execute("INSERT INTO users (name) VALUES (?)", vec![json!("Charlie")]).await?;
//!    Ok::<_, Error>(())
//! })
//! .await?;
//!
//! // Commits whatever is still open
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod coalesce;
pub mod config;
pub mod decode;
pub mod error;
pub mod hooks;
mod resolve;
pub mod wrapper;

pub use config::CoalescerConfig;
pub use decode::JsonRow;
pub use error::{Error, Result};
pub use hooks::{CompletedWrite, HookHandle, PendingWrite, WriteHook};
pub use wrapper::{DatabaseWrapper, WriteQueryResult, bind_value};

// Re-export commonly used types from dependencies
pub use sqlx_sqlite_audit::{
   CaptureMode, ChangeOperation, JsonChange, SqlChange, TrackingOptions, TriggerSchema,
};
pub use sqlx_sqlite_conn::{SqliteDatabase, SqliteDatabaseConfig};

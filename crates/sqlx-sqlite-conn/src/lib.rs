//! # sqlx-sqlite-conn
//!
//! Owns exactly one read-write SQLite connection and hands out exclusive access to it.
//!
//! ## Core Types
//!
//! - **[`SqliteDatabase`]**: The single engine handle. Opened once, closed once.
//! - **[`SqliteDatabaseConfig`]**: Statement cache, busy timeout and schema version settings
//! - **[`WriteGuard`]**: RAII guard ensuring exclusive access to the connection
//! - **[`Error`]**: Error type for database operations
//!
//! ## Architecture
//!
//! - **One connection**: every statement, read or write, runs on the same connection, so
//!   reads observe writes of a still-open transaction
//! - **Exclusive access**: an async mutex serializes all engine calls; a statement always
//!   runs to completion before the next one starts
//! - **Fail-fast schema check**: an expected `PRAGMA user_version` is verified at open time,
//!   before any write is possible
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_sqlite_conn::SqliteDatabase;
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_conn::Result<()> {
//!     let db = SqliteDatabase::open("example.db", None).await?;
//!
//!     let mut conn = db.acquire_writer().await?;
//!     sqlx::query("INSERT INTO users (name) VALUES (?)")
//!         .bind("Alice")
//!         .execute(&mut *conn)
//!         .await?;
//!     drop(conn);
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod database;
mod error;
mod write_guard;

pub use config::SqliteDatabaseConfig;
pub use database::{SqliteDatabase, is_memory_database};
pub use error::Error;
pub use write_guard::WriteGuard;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

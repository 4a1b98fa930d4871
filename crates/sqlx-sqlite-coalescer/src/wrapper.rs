use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteQueryResult};
use sqlx::Sqlite;
use sqlx_sqlite_audit::{CaptureMode, JsonChange, SqlChange, TrackingOptions, TriggerSchema};
use sqlx_sqlite_conn::{SqliteDatabase, SqliteDatabaseConfig, WriteGuard};
use tracing::{debug, trace, warn};

use crate::coalesce::{ScopeKind, TransactionState};
use crate::config::CoalescerConfig;
use crate::decode::{JsonRow, decode_row};
use crate::hooks::{CompletedWrite, HookHandle, HookRegistry, PendingWrite, WriteHook};
use crate::resolve::StatementResolver;
use crate::{Error, Result};

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only set for INSERT operations on tables with a ROWID.
   /// Tables created with `WITHOUT ROWID` will not set this value (returns 0).
   pub last_insert_id: i64,
}

impl From<SqliteQueryResult> for WriteQueryResult {
   fn from(result: SqliteQueryResult) -> Self {
      Self {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_rowid(),
      }
   }
}

/// State shared by every clone of a [`DatabaseWrapper`].
pub(crate) struct Shared {
   db: SqliteDatabase,
   state: Mutex<TransactionState>,
   hooks: Arc<HookRegistry>,
   resolver: StatementResolver,
}

impl Shared {
   /// Open a physical transaction for the next write when coalescing is armed, and start
   /// the timer's period.
   async fn begin_if_armed(&self, conn: &mut SqliteConnection) -> Result<()> {
      let needs_begin = {
         let state = self.state.lock();
         !state.active && state.timer.is_some()
      };
      if !needs_begin {
         return Ok(());
      }

      begin(conn).await?;

      let mut state = self.state.lock();
      state.active = true;
      if let Some(timer) = &state.timer {
         timer.signal();
      }
      trace!(generation = state.generation, "Opened coalesced transaction");
      Ok(())
   }

   /// Roll back a transaction left open by a failed write, unless a scope owns it.
   async fn abort_write(&self, conn: &mut SqliteConnection, error: Error) -> Error {
      let owned_by_writes = {
         let state = self.state.lock();
         state.active && state.scope.is_none()
      };
      if !owned_by_writes {
         return error;
      }

      let rolled_back = rollback(conn).await;
      self.state.lock().active = false;

      match rolled_back {
         Ok(()) => {
            debug!("Rolled back coalesced transaction after failed write: {}", error);
            error
         }
         Err(rollback_error) => Error::TransactionRollbackFailed {
            transaction_error: error.to_string(),
            rollback_error: rollback_error.to_string(),
         },
      }
   }

   /// Acquire the connection, first rolling back the transaction of an abandoned scope.
   async fn writer(&self) -> Result<WriteGuard> {
      let mut conn = self.db.acquire_writer().await?;
      self.recover_abandoned_scope(&mut conn).await?;
      Ok(conn)
   }

   async fn recover_abandoned_scope(&self, conn: &mut SqliteConnection) -> Result<()> {
      let active = {
         let mut state = self.state.lock();
         if !std::mem::take(&mut state.abandoned) {
            return Ok(());
         }
         state.scope = None;
         state.active
      };
      if !active {
         return Ok(());
      }

      if let Err(e) = rollback(conn).await {
         self.state.lock().abandoned = true;
         return Err(e);
      }
      self.state.lock().active = false;
      debug!("Rolled back transaction of abandoned scope");
      Ok(())
   }

   /// COMMIT the open transaction. If that fails, roll it back and return the commit error.
   async fn commit_or_rollback(&self, conn: &mut SqliteConnection) -> Result<()> {
      let outcome = match commit(conn).await {
         Ok(()) => Ok(()),
         Err(commit_error) => match rollback(conn).await {
            Ok(()) => Err(commit_error),
            Err(rollback_error) => Err(Error::TransactionRollbackFailed {
               transaction_error: commit_error.to_string(),
               rollback_error: rollback_error.to_string(),
            }),
         },
      };
      self.state.lock().active = false;
      outcome
   }

   pub(crate) async fn commit_from_timer(&self, generation: u64) -> Result<()> {
      let mut conn = match self.writer().await {
         Ok(conn) => conn,
         Err(Error::Connection(sqlx_sqlite_conn::Error::DatabaseClosed)) => return Ok(()),
         Err(e) => return Err(e),
      };

      if !self.state.lock().timer_may_commit(generation) {
         return Ok(());
      }

      self.commit_or_rollback(&mut conn).await?;
      debug!(generation, "Timer committed coalesced transaction");
      Ok(())
   }
}

impl Drop for Shared {
   fn drop(&mut self) {
      if self.state.get_mut().active {
         warn!(
            path = %self.db.path().display(),
            "Database handle dropped with an open transaction; it will be rolled back"
         );
      }
   }
}

/// Marks the scope abandoned if a `run_sync`/`run_coalesced` future is dropped mid-flight.
///
/// The next engine call on the handle rolls the transaction back before it proceeds, so it
/// never joins the abandoned work. A `run_coalesced` guard also restores the previous
/// interval right away.
struct ScopeGuard {
   shared: Option<Arc<Shared>>,
   restore_interval_ms: Option<u64>,
}

impl ScopeGuard {
   fn new(shared: &Arc<Shared>, restore_interval_ms: Option<u64>) -> Self {
      Self {
         shared: Some(Arc::clone(shared)),
         restore_interval_ms,
      }
   }

   fn disarm(mut self) {
      self.shared = None;
   }
}

impl Drop for ScopeGuard {
   fn drop(&mut self) {
      let Some(shared) = self.shared.take() else {
         return;
      };

      warn!("Transaction scope dropped before completion, rolling back");
      let runtime = tokio::runtime::Handle::try_current().ok();

      let old_timer = {
         let mut state = shared.state.lock();
         state.abandoned = true;
         match (self.restore_interval_ms, &runtime) {
            (Some(ms), Some(_)) => state.rearm(Arc::downgrade(&shared), interval_period(ms)),
            _ => None,
         }
      };
      drop(old_timer);

      if let Some(runtime) = runtime {
         runtime.spawn(async move {
            match shared.writer().await {
               Ok(_) | Err(Error::Connection(sqlx_sqlite_conn::Error::DatabaseClosed)) => {}
               Err(e) => warn!("rollback of abandoned scope failed: {}", e),
            }
         });
      }
   }
}

fn interval_period(interval_ms: u64) -> Option<Duration> {
   (interval_ms > 0).then(|| Duration::from_millis(interval_ms))
}

async fn begin(conn: &mut SqliteConnection) -> Result<()> {
   sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
   Ok(())
}

async fn commit(conn: &mut SqliteConnection) -> Result<()> {
   sqlx::query("COMMIT").execute(&mut *conn).await?;
   Ok(())
}

async fn rollback(conn: &mut SqliteConnection) -> Result<()> {
   sqlx::query("ROLLBACK").execute(&mut *conn).await?;
   Ok(())
}

/// Handle to one SQLite connection with coalesced commits, write hooks, named statements
/// and change tracking.
///
/// Clones share the same connection and coalescer state. Every engine call, including
/// reads, is serialized on the connection, so reads observe writes of the open physical
/// transaction.
///
/// # Coalescing
///
/// With a non-zero coalescing interval, the first write after a commit opens a physical
/// transaction and starts a timer period. When the period elapses the transaction is
/// committed and the next write opens a new one. A failure only loses the writes made since
/// the last commit.
///
/// The period is fixed: later writes join the open transaction without extending it, so a
/// steady stream of writes still commits once per period.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), sqlx_sqlite_coalescer::Error> {
/// use serde_json::json;
/// use sqlx_sqlite_coalescer::{DatabaseWrapper, Error};
///
/// let db = DatabaseWrapper::open("app.db", None, None).await?;
/// db.execute_batch("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT)")
///    .await?;
///
/// db.run_sync(async |db| {
///    db.execute("INSERT INTO users (name) VALUES (?)", vec![json!("Alice")]).await?;
///    db.execute("INSERT INTO users (name) VALUES (?)", vec![json!("Bob")]).await?;
///    Ok::<_, Error>(())
/// })
/// .await?;
///
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatabaseWrapper {
   inner: Arc<Shared>,
}

impl DatabaseWrapper {
   /// Open a database and arm the configured coalescing interval.
   ///
   /// # Arguments
   ///
   /// * `path` - Path to the SQLite database file, or `:memory:`
   /// * `db_config` - Connection settings. Pass `None` to use defaults.
   /// * `config` - Coalescer settings. Pass `None` to leave coalescing off.
   pub async fn open(
      path: impl AsRef<Path>,
      db_config: Option<SqliteDatabaseConfig>,
      config: Option<CoalescerConfig>,
   ) -> Result<Self> {
      let db = SqliteDatabase::open(path, db_config).await?;
      let config = config.unwrap_or_default();

      let wrapper = Self {
         inner: Arc::new(Shared {
            db,
            state: Mutex::new(TransactionState::default()),
            hooks: HookRegistry::new(),
            resolver: StatementResolver::new(),
         }),
      };

      if config.coalescing_interval_ms > 0 {
         wrapper
            .set_coalescing_interval(config.coalescing_interval_ms)
            .await?;
      }

      Ok(wrapper)
   }

   async fn writer(&self) -> Result<WriteGuard> {
      self.inner.writer().await
   }

   /// Execute one write statement with positional parameters.
   ///
   /// Pre hooks run before dispatch and post hooks after the engine acknowledged the
   /// write. Hooks run while the connection is held and must not call back into this
   /// handle.
   ///
   /// If the write fails while a coalesced transaction is open outside any scope, that
   /// transaction is rolled back before the error is returned.
   pub async fn execute(&self, sql: &str, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      let mut conn = self.writer().await?;
      self.inner.begin_if_armed(&mut conn).await?;
      self.inner.hooks.run_pre(&PendingWrite { sql });

      let mut query = sqlx::query(sql);
      for value in values {
         query = bind_value(query, value);
      }

      match query.execute(&mut *conn).await {
         Ok(done) => {
            let result = WriteQueryResult::from(done);
            self
               .inner
               .hooks
               .run_post(&CompletedWrite { sql, result: &result });
            Ok(result)
         }
         Err(e) => Err(self.inner.abort_write(&mut conn, e.into()).await),
      }
   }

   /// Execute several `;`-separated statements without parameters.
   ///
   /// Hooks fire once for the whole batch. Cached named statements are discarded since
   /// the batch may have changed the schema.
   pub async fn execute_batch(&self, sql: &str) -> Result<WriteQueryResult> {
      let mut conn = self.writer().await?;
      self.inner.begin_if_armed(&mut conn).await?;
      self.inner.hooks.run_pre(&PendingWrite { sql });

      let outcome = sqlx::raw_sql(sql).execute(&mut *conn).await;
      self.inner.resolver.clear();

      match outcome {
         Ok(done) => {
            let result = WriteQueryResult::from(done);
            self
               .inner
               .hooks
               .run_post(&CompletedWrite { sql, result: &result });
            Ok(result)
         }
         Err(e) => Err(self.inner.abort_write(&mut conn, e.into()).await),
      }
   }

   /// Run a query and decode all rows to JSON objects.
   pub async fn fetch_all(&self, sql: &str, values: Vec<JsonValue>) -> Result<Vec<JsonRow>> {
      let mut conn = self.writer().await?;

      let mut query = sqlx::query(sql);
      for value in values {
         query = bind_value(query, value);
      }

      let rows = query.fetch_all(&mut *conn).await?;
      rows.iter().map(decode_row).collect()
   }

   /// Run a query expected to return zero or one row.
   ///
   /// # Errors
   ///
   /// Returns [`Error::MultipleRowsReturned`] if the query returns more than one row.
   pub async fn fetch_one(&self, sql: &str, values: Vec<JsonValue>) -> Result<Option<JsonRow>> {
      let mut rows = self.fetch_all(sql, values).await?;

      match rows.len() {
         0 => Ok(None),
         1 => Ok(rows.pop()),
         count => Err(Error::MultipleRowsReturned(count)),
      }
   }

   /// Insert one row into `table`, with columns named by the map keys.
   ///
   /// # Errors
   ///
   /// Returns [`Error::UnknownTable`] or [`Error::UnknownColumn`] before anything is
   /// written if the names do not resolve.
   pub async fn insert(
      &self,
      table: &str,
      row: IndexMap<String, JsonValue>,
   ) -> Result<WriteQueryResult> {
      let columns: Vec<String> = row.keys().cloned().collect();
      let sql = {
         let mut conn = self.writer().await?;
         self.inner.resolver.insert_sql(&mut conn, table, &columns).await?
      };
      self.execute(&sql, row.into_values().collect()).await
   }

   /// Select the rows of `table` whose columns equal every value in `filter`.
   ///
   /// An empty filter selects every row. A `null` filter value matches SQL `NULL`.
   pub async fn select(
      &self,
      table: &str,
      filter: IndexMap<String, JsonValue>,
   ) -> Result<Vec<JsonRow>> {
      let columns: Vec<String> = filter.keys().cloned().collect();
      let sql = {
         let mut conn = self.writer().await?;
         self.inner.resolver.select_sql(&mut conn, table, &columns).await?
      };
      self.fetch_all(&sql, filter.into_values().collect()).await
   }

   /// Set the coalescing interval in milliseconds; `0` turns coalescing off.
   ///
   /// The previous timer is torn down and never commits again. Turning coalescing off
   /// commits the open transaction immediately, except inside an outermost
   /// [`run_sync()`](Self::run_sync), whose own commit still decides.
   pub async fn set_coalescing_interval(&self, interval_ms: u64) -> Result<()> {
      let mut conn = self.writer().await?;

      let (commit_now, old_timer) = {
         let mut state = self.inner.state.lock();
         let old_timer = state.rearm(Arc::downgrade(&self.inner), interval_period(interval_ms));

         match &state.timer {
            Some(timer) => {
               if state.active {
                  timer.signal();
               }
               (false, old_timer)
            }
            None => (state.active && state.scope != Some(ScopeKind::Sync), old_timer),
         }
      };
      drop(old_timer);

      debug!(interval_ms, "Set coalescing interval");

      if commit_now {
         self.inner.commit_or_rollback(&mut conn).await?;
         debug!("Committed open transaction after disabling coalescing");
      }

      Ok(())
   }

   /// Current coalescing interval in milliseconds, `0` when off.
   pub fn coalescing_interval(&self) -> u64 {
      self.inner.state.lock().interval_ms()
   }

   /// Returns true while a physical transaction is open.
   pub fn is_transaction_active(&self) -> bool {
      self.inner.state.lock().active
   }

   /// Commit the open physical transaction now.
   ///
   /// Returns whether anything was committed. Does nothing inside an outermost
   /// [`run_sync()`](Self::run_sync).
   pub async fn flush(&self) -> Result<bool> {
      let mut conn = self.writer().await?;

      let open = {
         let state = self.inner.state.lock();
         state.active && state.scope != Some(ScopeKind::Sync)
      };
      if !open {
         return Ok(false);
      }

      self.inner.commit_or_rollback(&mut conn).await?;
      Ok(true)
   }

   /// Run `f` atomically.
   ///
   /// The outermost call opens a transaction, commits it when `f` succeeds and rolls it
   /// back when `f` fails, returning `f`'s error unchanged. Calls made while a scope or a
   /// physical transaction is already open just run `f` as part of it.
   ///
   /// # Errors
   ///
   /// Besides `f`'s own errors: the error of a failed COMMIT (after rolling back), or
   /// [`Error::TransactionRollbackFailed`] if rolling back `f`'s failure also failed.
   pub async fn run_sync<T, E, F>(&self, f: F) -> std::result::Result<T, E>
   where
      F: AsyncFnOnce(&DatabaseWrapper) -> std::result::Result<T, E>,
      E: From<Error> + Display,
   {
      if !self.open_scope(ScopeKind::Sync).await? {
         return f(self).await;
      }

      let guard = ScopeGuard::new(&self.inner, None);
      let outcome = f(self).await;
      let result = self.close_scope(outcome).await;
      guard.disarm();
      result
   }

   /// Run `f` with coalescing armed at `interval_ms`.
   ///
   /// The previous interval is restored when `f` finishes. On success the open transaction
   /// is committed; on failure it is rolled back, which discards only the writes made since
   /// the last timer commit. Nested calls run `f` as part of the enclosing scope.
   pub async fn run_coalesced<T, E, F>(
      &self,
      interval_ms: u64,
      f: F,
   ) -> std::result::Result<T, E>
   where
      F: AsyncFnOnce(&DatabaseWrapper) -> std::result::Result<T, E>,
      E: From<Error> + Display,
   {
      if !self.open_scope(ScopeKind::Coalesced).await? {
         return f(self).await;
      }

      let previous = self.coalescing_interval();
      let guard = ScopeGuard::new(&self.inner, Some(previous));

      let outcome = match self.set_coalescing_interval(interval_ms).await {
         Ok(()) => f(self).await,
         Err(e) => Err(E::from(e)),
      };
      let result = self.close_scope(outcome).await;
      let restored = self.set_coalescing_interval(previous).await;
      guard.disarm();

      match (result, restored) {
         (Ok(_), Err(e)) => Err(E::from(e)),
         (Err(e), Err(restore_error)) => {
            warn!("restoring coalescing interval failed: {}", restore_error);
            Err(e)
         }
         (result, Ok(())) => result,
      }
   }

   /// Mark an outermost scope open. Returns false when the call should flatten.
   async fn open_scope(&self, kind: ScopeKind) -> Result<bool> {
      let mut conn = self.writer().await?;

      if self.inner.state.lock().should_flatten() {
         trace!(?kind, "Flattening nested scope");
         return Ok(false);
      }

      if kind == ScopeKind::Sync {
         begin(&mut conn).await?;
      }

      let mut state = self.inner.state.lock();
      state.scope = Some(kind);
      if kind == ScopeKind::Sync {
         state.active = true;
      }
      trace!(?kind, "Opened scope");
      Ok(true)
   }

   /// End the outermost scope: commit on success, roll back on failure.
   async fn close_scope<T, E>(
      &self,
      outcome: std::result::Result<T, E>,
   ) -> std::result::Result<T, E>
   where
      E: From<Error> + Display,
   {
      let mut conn = match self.writer().await {
         Ok(conn) => conn,
         Err(e) => {
            self.inner.state.lock().scope = None;
            return Err(E::from(e));
         }
      };

      let active = self.inner.state.lock().active;

      let result = match outcome {
         Ok(value) if !active => Ok(value),
         Ok(value) => match self.inner.commit_or_rollback(&mut conn).await {
            Ok(()) => Ok(value),
            Err(e) => Err(E::from(e)),
         },
         Err(e) if !active => Err(e),
         Err(e) => match rollback(&mut conn).await {
            Ok(()) => Err(e),
            Err(rollback_error) => Err(E::from(Error::TransactionRollbackFailed {
               transaction_error: e.to_string(),
               rollback_error: rollback_error.to_string(),
            })),
         },
      };

      let mut state = self.inner.state.lock();
      state.active = false;
      state.scope = None;
      trace!("Closed scope");
      result
   }

   /// Register a write hook. The returned handle removes it again.
   pub fn register_hook(&self, hook: WriteHook) -> HookHandle {
      self.inner.hooks.register(hook)
   }

   /// Install change-tracking triggers for `table`.
   ///
   /// The DDL runs through the write path, so it joins an open transaction. Installing the
   /// same table and mode twice is a no-op.
   pub async fn install_change_tracking(
      &self,
      table: &str,
      options: TrackingOptions,
   ) -> Result<()> {
      let ddl = {
         let mut conn = self.writer().await?;
         sqlx_sqlite_audit::tracking_ddl(&mut conn, table, &options).await?
      };

      self.execute_batch(&ddl).await?;
      debug!(
         table = %table,
         destination = %options.destination,
         mode = options.mode.label(),
         "Installed change tracking"
      );
      Ok(())
   }

   /// Drop the change-tracking triggers installed for `table` in `mode`.
   pub async fn uninstall_change_tracking(
      &self,
      table: &str,
      mode: CaptureMode,
      schema: TriggerSchema,
   ) -> Result<()> {
      self
         .execute_batch(&sqlx_sqlite_audit::drop_triggers(table, mode, schema))
         .await?;
      Ok(())
   }

   /// Read JSON-mode change records from `destination` with `id > after_id`.
   pub async fn json_changes(&self, destination: &str, after_id: i64) -> Result<Vec<JsonChange>> {
      let mut conn = self.writer().await?;
      Ok(sqlx_sqlite_audit::read_json_changes(&mut conn, destination, after_id).await?)
   }

   /// Read SQL-replay change records from `destination` with `id > after_id`.
   pub async fn sql_changes(&self, destination: &str, after_id: i64) -> Result<Vec<SqlChange>> {
      let mut conn = self.writer().await?;
      Ok(sqlx_sqlite_audit::read_sql_changes(&mut conn, destination, after_id).await?)
   }

   /// Execute SQL-replay records in order, all or nothing.
   pub async fn replay_sql_changes(&self, changes: &[SqlChange]) -> Result<()> {
      self
         .run_sync(async |db| {
            for change in changes {
               db.execute(&change.statement, Vec::new()).await?;
            }
            Ok::<(), Error>(())
         })
         .await
   }

   /// Close the database.
   ///
   /// Disarms the timer and commits any open transaction first, so acknowledged writes are
   /// never discarded. If that commit fails the database stays open and the error is
   /// returned.
   pub async fn close(self) -> Result<()> {
      {
         let mut conn = match self.writer().await {
            Ok(conn) => conn,
            Err(Error::Connection(sqlx_sqlite_conn::Error::DatabaseClosed)) => return Ok(()),
            Err(e) => return Err(e),
         };

         let (active, old_timer) = {
            let mut state = self.inner.state.lock();
            let old_timer = state.rearm(Arc::downgrade(&self.inner), None);
            (state.active, old_timer)
         };
         drop(old_timer);

         if active {
            commit(&mut conn).await?;
            self.inner.state.lock().active = false;
            debug!("Committed open transaction before close");
         }
      }

      self.inner.db.close().await?;
      Ok(())
   }
}

/// Helper function to bind a JSON value to a SQLx query
///
/// Integers bind as `INTEGER` when they fit in an `i64`, booleans as `0`/`1`, and arrays
/// and objects as JSON text.
pub fn bind_value<'a>(
   query: Query<'a, Sqlite, SqliteArguments<'a>>,
   value: JsonValue,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Number(number) => {
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            match i64::try_from(uint_val) {
               Ok(int_val) => query.bind(int_val),
               // Value too large for i64, use f64 (will lose precision)
               Err(_) => query.bind(uint_val as f64),
            }
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      other => query.bind(other),
   }
}

//! Integration tests for pre/post write hooks.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use sqlx_sqlite_coalescer::{DatabaseWrapper, WriteHook};

type Log = Arc<Mutex<Vec<String>>>;

async fn setup_test_db() -> (DatabaseWrapper, Log) {
   let db = DatabaseWrapper::open(":memory:", None, None).await.unwrap();
   db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
      .await
      .unwrap();
   (db, Arc::new(Mutex::new(Vec::new())))
}

fn pre(log: &Log, name: &'static str) -> WriteHook {
   let log = Arc::clone(log);
   WriteHook::pre(move |w| log.lock().push(format!("{} pre {}", name, w.sql)))
}

fn post(log: &Log, name: &'static str) -> WriteHook {
   let log = Arc::clone(log);
   WriteHook::post(move |w| {
      log.lock().push(format!(
         "{} post {} rows={}",
         name, w.sql, w.result.rows_affected
      ))
   })
}

#[tokio::test]
async fn test_hooks_fire_around_each_write_in_order() {
   let (db, log) = setup_test_db().await;
   let _a = db.register_hook(pre(&log, "a"));
   let _b = db.register_hook(post(&log, "b"));
   let _c = db.register_hook(pre(&log, "c"));

   db.execute("INSERT INTO t (v) VALUES (?)", vec![json!("x")])
      .await
      .unwrap();

   assert_eq!(
      *log.lock(),
      vec![
         "a pre INSERT INTO t (v) VALUES (?)",
         "c pre INSERT INTO t (v) VALUES (?)",
         "b post INSERT INTO t (v) VALUES (?) rows=1",
      ]
   );
}

#[tokio::test]
async fn test_reads_fire_no_hooks() {
   let (db, log) = setup_test_db().await;
   let _a = db.register_hook(pre(&log, "a"));
   let _b = db.register_hook(post(&log, "b"));

   db.fetch_all("SELECT * FROM t", vec![]).await.unwrap();
   db.select("t", Default::default()).await.unwrap();

   assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_failed_write_skips_post_hooks() {
   let (db, log) = setup_test_db().await;
   let _a = db.register_hook(pre(&log, "a"));
   let _b = db.register_hook(post(&log, "b"));

   db.execute("INSERT INTO nope VALUES (1)", vec![])
      .await
      .unwrap_err();

   assert_eq!(*log.lock(), vec!["a pre INSERT INTO nope VALUES (1)"]);
}

#[tokio::test]
async fn test_dispose_removes_exactly_one_hook() {
   let (db, log) = setup_test_db().await;
   let a = db.register_hook(pre(&log, "a"));
   let b = db.register_hook(pre(&log, "b"));

   assert!(a.dispose());
   assert!(!a.dispose(), "second dispose is a no-op");

   db.execute_batch("DELETE FROM t").await.unwrap();
   assert_eq!(*log.lock(), vec!["b pre DELETE FROM t"]);

   assert!(b.dispose());
   db.execute_batch("DELETE FROM t").await.unwrap();
   assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn test_hooks_are_per_handle() {
   let (db, log) = setup_test_db().await;
   let other = DatabaseWrapper::open(":memory:", None, None).await.unwrap();
   let _a = db.register_hook(pre(&log, "a"));

   other.execute_batch("CREATE TABLE u (x)").await.unwrap();
   assert!(log.lock().is_empty());

   // Clones share the registry
   db.clone().execute_batch("DELETE FROM t").await.unwrap();
   assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn test_pre_hook_runs_inside_coalesced_transaction() {
   let (db, _log) = setup_test_db().await;
   db.set_coalescing_interval(60_000).await.unwrap();

   let seen = Arc::new(Mutex::new(Vec::new()));
   let s = Arc::clone(&seen);
   let probe = db.clone();
   let handle = db.register_hook(WriteHook::pre(move |_| {
      s.lock().push(probe.is_transaction_active())
   }));

   db.execute("INSERT INTO t (v) VALUES ('x')", vec![])
      .await
      .unwrap();
   assert_eq!(*seen.lock(), vec![true]);

   // The hook holds a clone of the handle; dispose it to release that reference
   assert!(handle.dispose());
}

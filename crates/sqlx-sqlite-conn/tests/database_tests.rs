use sqlx_sqlite_conn::{Error, SqliteDatabase, SqliteDatabaseConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn create_versioned_db(dir: &TempDir, version: i64) -> std::path::PathBuf {
   let path = dir.path().join("versioned.db");
   let db = SqliteDatabase::open(&path, None).await.unwrap();
   let mut conn = db.acquire_writer().await.unwrap();
   sqlx::query(&format!("PRAGMA user_version = {}", version))
      .execute(&mut *conn)
      .await
      .unwrap();
   drop(conn);
   db.close().await.unwrap();
   path
}

#[tokio::test]
async fn test_open_creates_file() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("created.db");

   let db = SqliteDatabase::open(&path, None).await.unwrap();
   assert!(path.exists());
   assert_eq!(db.path(), path.as_path());

   db.close().await.unwrap();
}

#[tokio::test]
async fn test_open_without_create_fails_for_missing_file() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("missing.db");

   let config = SqliteDatabaseConfig {
      create_if_missing: false,
      ..Default::default()
   };
   let result = SqliteDatabase::open(&path, Some(config)).await;

   assert!(matches!(result, Err(Error::Sqlx(_))));
   assert!(!path.exists());
}

#[tokio::test]
async fn test_database_closed_error() {
   let db = SqliteDatabase::open(":memory:", None).await.unwrap();
   db.close().await.unwrap();

   let result = db.acquire_writer().await;
   assert!(matches!(result, Err(Error::DatabaseClosed)));

   let result = db.user_version().await;
   assert!(matches!(result, Err(Error::DatabaseClosed)));
}

#[tokio::test]
async fn test_matching_user_version_opens() {
   let temp_dir = TempDir::new().unwrap();
   let path = create_versioned_db(&temp_dir, 4).await;

   let config = SqliteDatabaseConfig {
      expected_user_version: Some(4),
      ..Default::default()
   };
   let db = SqliteDatabase::open(&path, Some(config)).await.unwrap();
   assert_eq!(db.user_version().await.unwrap(), 4);

   db.close().await.unwrap();
}

#[tokio::test]
async fn test_mismatched_user_version_fails_at_open() {
   let temp_dir = TempDir::new().unwrap();
   let path = create_versioned_db(&temp_dir, 2).await;

   let config = SqliteDatabaseConfig {
      expected_user_version: Some(3),
      ..Default::default()
   };
   let result = SqliteDatabase::open(&path, Some(config)).await;

   match result {
      Err(Error::SchemaVersionMismatch { expected, found }) => {
         assert_eq!(expected, 3);
         assert_eq!(found, 2);
      }
      other => panic!("expected SchemaVersionMismatch, got {:?}", other.map(|_| ())),
   }
}

#[tokio::test]
async fn test_reads_see_uncommitted_writes() {
   let db = SqliteDatabase::open(":memory:", None).await.unwrap();
   let mut conn = db.acquire_writer().await.unwrap();

   sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
      .execute(&mut *conn)
      .await
      .unwrap();
   sqlx::query("BEGIN").execute(&mut *conn).await.unwrap();
   sqlx::query("INSERT INTO t (id) VALUES (1)")
      .execute(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   // A fresh guard is the same connection, still inside the transaction
   let mut conn = db.acquire_writer().await.unwrap();
   let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
      .fetch_one(&mut *conn)
      .await
      .unwrap();
   assert_eq!(count, 1);

   sqlx::query("ROLLBACK").execute(&mut *conn).await.unwrap();
}

#[tokio::test]
async fn test_writer_is_exclusive() {
   let db = Arc::new(SqliteDatabase::open(":memory:", None).await.unwrap());
   let guard = db.acquire_writer().await.unwrap();

   let contender = {
      let db = Arc::clone(&db);
      tokio::spawn(async move { db.acquire_writer().await.map(|_| ()) })
   };

   tokio::time::sleep(Duration::from_millis(20)).await;
   assert!(!contender.is_finished(), "second guard must wait for the first");

   drop(guard);
   contender.await.unwrap().unwrap();
}

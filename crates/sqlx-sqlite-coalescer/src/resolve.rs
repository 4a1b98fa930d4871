//! Named insert/select statements derived from column introspection.
//!
//! The resolver turns a table or view name plus the column names of a row (or filter) into
//! SQL text. Introspection results and generated text are cached per handle until
//! [`StatementResolver::clear()`] is called.

use std::collections::HashMap;

use parking_lot::Mutex;
use sqlx::SqliteConnection;
use sqlx_sqlite_audit::{TableInfo, query_table_info, quote_ident};
use tracing::trace;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
   Insert,
   Select,
}

type StatementKey = (StatementKind, String, Vec<String>);

#[derive(Default)]
pub struct StatementResolver {
   tables: Mutex<HashMap<String, TableInfo>>,
   statements: Mutex<HashMap<StatementKey, String>>,
}

impl StatementResolver {
   pub fn new() -> Self {
      Self::default()
   }

   /// `INSERT INTO "table" ("c1", ...) VALUES (?, ...)`, or `DEFAULT VALUES` for no columns.
   pub async fn insert_sql(
      &self,
      conn: &mut SqliteConnection,
      table: &str,
      columns: &[String],
   ) -> Result<String> {
      self.resolve(conn, StatementKind::Insert, table, columns).await
   }

   /// `SELECT * FROM "table" WHERE "c1" IS ? AND ...`, unfiltered for no columns.
   ///
   /// `IS` makes a JSON `null` in the filter match SQL `NULL`.
   pub async fn select_sql(
      &self,
      conn: &mut SqliteConnection,
      table: &str,
      columns: &[String],
   ) -> Result<String> {
      self.resolve(conn, StatementKind::Select, table, columns).await
   }

   /// Forget cached introspection and statements, e.g. after DDL.
   pub fn clear(&self) {
      self.tables.lock().clear();
      self.statements.lock().clear();
   }

   async fn resolve(
      &self,
      conn: &mut SqliteConnection,
      kind: StatementKind,
      table: &str,
      columns: &[String],
   ) -> Result<String> {
      let key = (kind, table.to_string(), columns.to_vec());
      if let Some(sql) = self.statements.lock().get(&key) {
         return Ok(sql.clone());
      }

      let info = self.table_info(conn, table).await?;
      if let Some(column) = columns.iter().find(|c| !info.has_column(c)) {
         return Err(Error::UnknownColumn {
            table: table.to_string(),
            column: column.clone(),
         });
      }

      let sql = match kind {
         StatementKind::Insert => build_insert(table, columns),
         StatementKind::Select => build_select(table, columns),
      };
      trace!(table = %table, sql = %sql, "Resolved statement");

      self.statements.lock().insert(key, sql.clone());
      Ok(sql)
   }

   async fn table_info(&self, conn: &mut SqliteConnection, table: &str) -> Result<TableInfo> {
      if let Some(info) = self.tables.lock().get(table) {
         return Ok(info.clone());
      }

      let info = query_table_info(conn, table)
         .await?
         .ok_or_else(|| Error::UnknownTable(table.to_string()))?;

      self.tables.lock().insert(table.to_string(), info.clone());
      Ok(info)
   }
}

fn build_insert(table: &str, columns: &[String]) -> String {
   if columns.is_empty() {
      return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
   }

   let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
   let params = vec!["?"; columns.len()].join(", ");
   format!(
      "INSERT INTO {} ({}) VALUES ({})",
      quote_ident(table),
      names.join(", "),
      params
   )
}

fn build_select(table: &str, columns: &[String]) -> String {
   let mut sql = format!("SELECT * FROM {}", quote_ident(table));
   if !columns.is_empty() {
      let terms: Vec<String> = columns
         .iter()
         .map(|c| format!("{} IS ?", quote_ident(c)))
         .collect();
      sql.push_str(" WHERE ");
      sql.push_str(&terms.join(" AND "));
   }
   sql
}

#[cfg(test)]
mod tests {
   use super::*;
   use sqlx::Connection;

   fn cols(names: &[&str]) -> Vec<String> {
      names.iter().map(|s| s.to_string()).collect()
   }

   #[test]
   fn test_build_insert() {
      assert_eq!(
         build_insert("foo", &cols(&["bar", "baz"])),
         r#"INSERT INTO "foo" ("bar", "baz") VALUES (?, ?)"#
      );
      assert_eq!(build_insert("foo", &[]), r#"INSERT INTO "foo" DEFAULT VALUES"#);
   }

   #[test]
   fn test_build_select() {
      assert_eq!(build_select("foo", &[]), r#"SELECT * FROM "foo""#);
      assert_eq!(
         build_select("foo", &cols(&["bar", "baz"])),
         r#"SELECT * FROM "foo" WHERE "bar" IS ? AND "baz" IS ?"#
      );
   }

   #[tokio::test]
   async fn test_resolve_validates_and_caches() {
      let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
      sqlx::query("CREATE TABLE foo (bar INTEGER PRIMARY KEY, baz TEXT)")
         .execute(&mut conn)
         .await
         .unwrap();

      let resolver = StatementResolver::new();
      let sql = resolver
         .insert_sql(&mut conn, "foo", &cols(&["baz"]))
         .await
         .unwrap();
      assert_eq!(sql, r#"INSERT INTO "foo" ("baz") VALUES (?)"#);

      let err = resolver
         .select_sql(&mut conn, "foo", &cols(&["nope"]))
         .await
         .unwrap_err();
      assert!(matches!(err, Error::UnknownColumn { ref column, .. } if column == "nope"));

      let err = resolver.insert_sql(&mut conn, "missing", &[]).await.unwrap_err();
      assert!(matches!(err, Error::UnknownTable(ref t) if t == "missing"));

      // Cached info survives a schema change until cleared
      sqlx::query("ALTER TABLE foo ADD COLUMN qux TEXT")
         .execute(&mut conn)
         .await
         .unwrap();
      assert!(resolver.insert_sql(&mut conn, "foo", &cols(&["qux"])).await.is_err());
      resolver.clear();
      assert!(resolver.insert_sql(&mut conn, "foo", &cols(&["qux"])).await.is_ok());
   }
}

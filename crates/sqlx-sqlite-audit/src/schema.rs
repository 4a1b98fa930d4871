//! Column metadata for tables and views.

use std::collections::HashSet;

use sqlx::SqliteConnection;
use tracing::trace;

use crate::{Error, Result};

/// Name used as the key when a table declares no primary key.
pub const ROWID: &str = "rowid";

/// One column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
   pub name: String,
   /// Declared type, empty when none was declared.
   pub declared_type: String,
   pub not_null: bool,
   /// 1-based position within the primary key, `None` for non-key columns.
   pub pk_position: Option<u32>,
}

/// Columns of a table or view in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
   pub name: String,
   pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
   /// Returns true if a column with this name exists.
   pub fn has_column(&self, name: &str) -> bool {
      self.columns.iter().any(|c| c.name == name)
   }

   /// Column names in declaration order.
   pub fn column_names(&self) -> Vec<String> {
      self.columns.iter().map(|c| c.name.clone()).collect()
   }

   /// Primary key columns in key order (not declaration order).
   pub fn key_columns(&self) -> Vec<String> {
      let mut keys: Vec<&ColumnInfo> = self
         .columns
         .iter()
         .filter(|c| c.pk_position.is_some())
         .collect();
      keys.sort_by_key(|c| c.pk_position);
      keys.into_iter().map(|c| c.name.clone()).collect()
   }

   /// Splits the columns into `(keys, data)` for change tracking.
   ///
   /// Keys are the primary key columns in key order, or `rowid` when the table declares
   /// no primary key. Data is every other column in declaration order, minus `exclude`.
   ///
   /// # Errors
   ///
   /// Returns [`Error::KeyColumnExcluded`] if `exclude` names a key column.
   pub fn partition(&self, exclude: &HashSet<String>) -> Result<(Vec<String>, Vec<String>)> {
      let mut keys = self.key_columns();

      if let Some(column) = keys.iter().find(|k| exclude.contains(*k)) {
         return Err(Error::KeyColumnExcluded {
            table: self.name.clone(),
            column: column.clone(),
         });
      }

      if keys.is_empty() {
         keys.push(ROWID.to_string());
      }

      let data = self
         .columns
         .iter()
         .filter(|c| c.pk_position.is_none() && !exclude.contains(&c.name))
         .map(|c| c.name.clone())
         .collect();

      Ok((keys, data))
   }
}

/// Queries column metadata for `table`.
///
/// Works for tables and views in any attached schema. Returns `None` if no such object
/// exists.
pub async fn query_table_info(
   conn: &mut SqliteConnection,
   table: &str,
) -> Result<Option<TableInfo>> {
   let rows: Vec<(String, String, bool, i64)> = sqlx::query_as(
      "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?) ORDER BY cid",
   )
   .bind(table)
   .fetch_all(&mut *conn)
   .await?;

   if rows.is_empty() {
      return Ok(None);
   }

   let columns: Vec<ColumnInfo> = rows
      .into_iter()
      .map(|(name, declared_type, not_null, pk)| ColumnInfo {
         name,
         declared_type,
         not_null,
         pk_position: u32::try_from(pk).ok().filter(|p| *p > 0),
      })
      .collect();

   trace!(table = %table, columns = columns.len(), "Queried table info");

   Ok(Some(TableInfo {
      name: table.to_string(),
      columns,
   }))
}

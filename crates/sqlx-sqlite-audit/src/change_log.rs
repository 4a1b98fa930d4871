//! Typed readers for change log tables.

use serde_json::Value as JsonValue;
use sqlx::SqliteConnection;

use crate::change::{JsonChange, SqlChange};
use crate::trigger::quote_ident;
use crate::{Error, Result};

/// Reads JSON-mode change records with `id > after_id`, oldest first.
///
/// # Errors
///
/// Returns [`Error::InvalidChangeRecord`] if a `before`/`after` value is not valid JSON.
pub async fn read_json_changes(
   conn: &mut SqliteConnection,
   destination: &str,
   after_id: i64,
) -> Result<Vec<JsonChange>> {
   let sql = format!(
      "SELECT \"id\", \"table_name\", \"before\", \"after\", \"timestamp\" \
       FROM {} WHERE \"id\" > ? ORDER BY \"id\"",
      quote_ident(destination)
   );

   let rows: Vec<(i64, String, Option<String>, Option<String>, i64)> = sqlx::query_as(&sql)
      .bind(after_id)
      .fetch_all(&mut *conn)
      .await?;

   rows
      .into_iter()
      .map(|(id, table_name, before, after, timestamp)| {
         Ok(JsonChange {
            id,
            before: parse_object(id, before)?,
            after: parse_object(id, after)?,
            table_name,
            timestamp,
         })
      })
      .collect()
}

/// Reads SQL-replay change records with `id > after_id`, oldest first.
pub async fn read_sql_changes(
   conn: &mut SqliteConnection,
   destination: &str,
   after_id: i64,
) -> Result<Vec<SqlChange>> {
   let sql = format!(
      "SELECT \"id\", \"statement\", \"timestamp\" FROM {} WHERE \"id\" > ? ORDER BY \"id\"",
      quote_ident(destination)
   );

   let rows: Vec<(i64, String, i64)> = sqlx::query_as(&sql)
      .bind(after_id)
      .fetch_all(&mut *conn)
      .await?;

   Ok(rows
      .into_iter()
      .map(|(id, statement, timestamp)| SqlChange {
         id,
         statement,
         timestamp,
      })
      .collect())
}

fn parse_object(id: i64, text: Option<String>) -> Result<Option<JsonValue>> {
   text
      .map(|text| {
         serde_json::from_str(&text)
            .map_err(|e| Error::InvalidChangeRecord(format!("record {}: {}", id, e)))
      })
      .transpose()
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[test]
   fn test_parse_object() {
      assert_eq!(parse_object(1, None).unwrap(), None);
      assert_eq!(
         parse_object(1, Some(r#"{"bar":12}"#.into())).unwrap(),
         Some(json!({"bar": 12}))
      );
   }

   #[test]
   fn test_parse_object_rejects_garbage() {
      let err = parse_object(7, Some("{not json".into())).unwrap_err();
      assert!(err.to_string().contains("record 7"));
   }
}

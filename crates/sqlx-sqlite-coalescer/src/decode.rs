use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Row, TypeInfo, Value, ValueRef};
use time::PrimitiveDateTime;

use crate::Error;

/// A decoded result row: column name to JSON value, in select-list order.
pub type JsonRow = IndexMap<String, JsonValue>;

/// Decode every column of a row into JSON, keeping the select-list order.
pub fn decode_row(row: &SqliteRow) -> Result<JsonRow, Error> {
   let mut decoded = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let value = row.try_get_raw(i)?;
      decoded.insert(column.name().to_string(), to_json(value)?);
   }
   Ok(decoded)
}

/// Convert a SQLite value to a JSON value.
///
/// BLOB values become base64 strings since JSON has no binary type. Dates and times stay
/// in SQLite's textual form. Values that fail to decode as their reported type become
/// `null`.
pub fn to_json(value: SqliteValueRef) -> Result<JsonValue, Error> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let value = value.to_owned();
   let type_name = value.type_info().name().to_string();

   let result = match type_name.as_str() {
      "TEXT" | "DATE" | "TIME" => value
         .try_decode::<String>()
         .map(JsonValue::String)
         .unwrap_or(JsonValue::Null),

      "REAL" => value
         .try_decode::<f64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      "INTEGER" | "NUMERIC" => value
         .try_decode::<i64>()
         .map(JsonValue::from)
         .unwrap_or(JsonValue::Null),

      "BOOLEAN" => value
         .try_decode::<bool>()
         .map(JsonValue::Bool)
         .unwrap_or(JsonValue::Null),

      "DATETIME" => match value.try_decode::<PrimitiveDateTime>() {
         Ok(dt) => JsonValue::String(dt.to_string()),
         Err(_) => value
            .try_decode::<String>()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
      },

      "BLOB" => value
         .try_decode::<Vec<u8>>()
         .map(|blob| JsonValue::String(base64_encode(&blob)))
         .unwrap_or(JsonValue::Null),

      "NULL" => JsonValue::Null,

      other => match value.try_decode::<String>() {
         Ok(text) => JsonValue::String(text),
         Err(_) => {
            return Err(Error::UnsupportedDatatype(format!(
               "Unknown SQLite type: {}",
               other
            )));
         }
      },
   };

   Ok(result)
}

fn base64_encode(data: &[u8]) -> String {
   use base64::Engine;
   base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;
   use sqlx::{Connection, SqliteConnection};

   #[test]
   fn test_base64_encode() {
      assert_eq!(base64_encode(b"hello"), "aGVsbG8=");
      assert_eq!(base64_encode(&[0, 0, 0]), "AAAA");
      assert_eq!(base64_encode(&[]), "");
   }

   #[tokio::test]
   async fn test_decode_row_keeps_column_order_and_types() {
      let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
      let row = sqlx::query("SELECT 'a' AS z, 1 AS y, 1.5 AS x, NULL AS w, x'00ff' AS v")
         .fetch_one(&mut conn)
         .await
         .unwrap();

      let decoded = decode_row(&row).unwrap();
      let names: Vec<&str> = decoded.keys().map(String::as_str).collect();
      assert_eq!(names, vec!["z", "y", "x", "w", "v"]);
      assert_eq!(decoded["z"], json!("a"));
      assert_eq!(decoded["y"], json!(1));
      assert_eq!(decoded["x"], json!(1.5));
      assert_eq!(decoded["w"], JsonValue::Null);
      assert_eq!(decoded["v"], json!("AP8="));
   }
}

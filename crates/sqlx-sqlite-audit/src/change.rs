use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// DML event a change-tracking trigger fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
   Insert,
   Update,
   Delete,
}

impl ChangeOperation {
   /// All three events, in the order their triggers are generated.
   pub const ALL: [ChangeOperation; 3] = [
      ChangeOperation::Insert,
      ChangeOperation::Update,
      ChangeOperation::Delete,
   ];

   /// SQL keyword for the event.
   pub fn keyword(self) -> &'static str {
      match self {
         ChangeOperation::Insert => "INSERT",
         ChangeOperation::Update => "UPDATE",
         ChangeOperation::Delete => "DELETE",
      }
   }

   /// Lowercase name used in trigger names.
   pub fn label(self) -> &'static str {
      match self {
         ChangeOperation::Insert => "insert",
         ChangeOperation::Update => "update",
         ChangeOperation::Delete => "delete",
      }
   }
}

/// Shape of the rows a set of change-tracking triggers appends to the log table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
   /// `(id, table_name, before, after, timestamp)` with JSON objects of column values.
   #[default]
   Json,
   /// `(id, statement, timestamp)` with a literal SQL statement replaying the change.
   Sql,
}

impl CaptureMode {
   /// Lowercase name used in trigger names and logs.
   pub fn label(self) -> &'static str {
      match self {
         CaptureMode::Json => "json",
         CaptureMode::Sql => "sql",
      }
   }
}

/// One row of a JSON-mode change log.
///
/// `before` is `None` for inserts and `after` is `None` for deletes. For updates both are
/// present: `before` holds the key columns and every changed column, `after` holds only the
/// changed columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonChange {
   pub id: i64,
   pub table_name: String,
   pub before: Option<JsonValue>,
   pub after: Option<JsonValue>,
   /// Milliseconds since the Unix epoch, as seen by the engine.
   pub timestamp: i64,
}

impl JsonChange {
   /// Which event produced this record.
   pub fn operation(&self) -> ChangeOperation {
      match (&self.before, &self.after) {
         (None, _) => ChangeOperation::Insert,
         (Some(_), None) => ChangeOperation::Delete,
         (Some(_), Some(_)) => ChangeOperation::Update,
      }
   }
}

/// One row of a SQL-replay change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlChange {
   pub id: i64,
   /// Directly executable statement reconstructing the write.
   pub statement: String,
   /// Milliseconds since the Unix epoch, as seen by the engine.
   pub timestamp: i64,
}

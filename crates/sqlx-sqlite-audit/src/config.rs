use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::change::CaptureMode;

/// Schema the generated triggers are installed into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSchema {
   /// Triggers live in the connection's `temp` schema and vanish when it closes.
   #[default]
   Temp,
   /// Triggers are stored in the database file and fire for every connection.
   Persistent,
}

impl TriggerSchema {
   /// Schema name used to qualify trigger names in `DROP TRIGGER`.
   pub fn schema_name(self) -> &'static str {
      match self {
         TriggerSchema::Temp => "temp",
         TriggerSchema::Persistent => "main",
      }
   }
}

/// Options for installing change tracking on one table.
///
/// # Example
///
/// ```
/// use sqlx_sqlite_audit::{CaptureMode, TrackingOptions, TriggerSchema};
///
/// let options = TrackingOptions::new("changes")
///    .with_mode(CaptureMode::Sql)
///    .with_exclude_columns(["updated_at"])
///    .with_schema(TriggerSchema::Persistent);
/// assert!(options.exclude_columns.contains("updated_at"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingOptions {
   /// Log table the triggers append to. Owned by the caller's schema.
   pub destination: String,

   /// Row shape written to the log table.
   ///
   /// Default: [`CaptureMode::Json`].
   pub mode: CaptureMode,

   /// Non-key columns that never appear in a logged change, even when they change.
   pub exclude_columns: HashSet<String>,

   /// Where the triggers are installed.
   ///
   /// Default: [`TriggerSchema::Temp`].
   pub schema: TriggerSchema,
}

impl TrackingOptions {
   /// Creates options logging to `destination` with default mode and schema.
   pub fn new(destination: impl Into<String>) -> Self {
      Self {
         destination: destination.into(),
         mode: CaptureMode::default(),
         exclude_columns: HashSet::new(),
         schema: TriggerSchema::default(),
      }
   }

   /// Sets the capture mode.
   pub fn with_mode(mut self, mode: CaptureMode) -> Self {
      self.mode = mode;
      self
   }

   /// Sets the columns left out of every logged change.
   pub fn with_exclude_columns<I, S>(mut self, columns: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.exclude_columns = columns.into_iter().map(Into::into).collect();
      self
   }

   /// Sets the schema the triggers are installed into.
   pub fn with_schema(mut self, schema: TriggerSchema) -> Self {
      self.schema = schema;
      self
   }
}

//! Change-audit trigger generation.
//!
//! [`generate`] is a pure function from table metadata to trigger DDL. Table, column and
//! log-table names are schema metadata, not user input: they are quoted as identifiers and
//! spliced into the DDL text, since DDL cannot be parameterized.
//!
//! # Update deltas (JSON mode)
//!
//! For every column the update trigger compares `OLD` and `NEW` with `IS NOT`, so `NULL`
//! transitions count as changes:
//!
//! ```text
//!              │ key column        │ data column
//! ─────────────┼───────────────────┼──────────────────
//!  before      │ always            │ only if changed
//!  after       │ only if changed   │ only if changed
//! ```
//!
//! Every update appends exactly one row. When nothing tracked changed, `before` carries
//! only the keys and `after` is `{}`.

use std::collections::HashSet;

use crate::change::{CaptureMode, ChangeOperation};
use crate::config::TriggerSchema;

/// Engine-side wall clock in milliseconds since the Unix epoch.
const TIMESTAMP_MS: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

/// Input to [`generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
   pub table: String,
   /// Primary key columns in key order.
   pub key_columns: Vec<String>,
   /// Non-key columns in declaration order.
   pub data_columns: Vec<String>,
   pub destination: String,
   pub mode: CaptureMode,
   /// Data columns to leave out of every logged change.
   pub exclude_columns: HashSet<String>,
   pub schema: TriggerSchema,
}

impl TriggerSpec {
   pub fn new(
      table: impl Into<String>,
      key_columns: Vec<String>,
      data_columns: Vec<String>,
      destination: impl Into<String>,
   ) -> Self {
      Self {
         table: table.into(),
         key_columns,
         data_columns,
         destination: destination.into(),
         mode: CaptureMode::default(),
         exclude_columns: HashSet::new(),
         schema: TriggerSchema::default(),
      }
   }

   pub fn with_mode(mut self, mode: CaptureMode) -> Self {
      self.mode = mode;
      self
   }

   pub fn with_schema(mut self, schema: TriggerSchema) -> Self {
      self.schema = schema;
      self
   }

   pub fn with_excluded<I, S>(mut self, columns: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.exclude_columns = columns.into_iter().map(Into::into).collect();
      self
   }

   fn tracked_data(&self) -> Vec<&str> {
      self
         .data_columns
         .iter()
         .filter(|c| !self.exclude_columns.contains(*c))
         .map(String::as_str)
         .collect()
   }

   fn keys(&self) -> Vec<&str> {
      self.key_columns.iter().map(String::as_str).collect()
   }
}

/// Quotes an identifier for SQLite, doubling embedded `"`.
pub fn quote_ident(name: &str) -> String {
   format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for SQLite, doubling embedded `'`.
pub fn quote_literal(value: &str) -> String {
   format!("'{}'", value.replace('\'', "''"))
}

/// Deterministic (unquoted) name of the trigger for one table, mode and event.
pub fn trigger_name(table: &str, mode: CaptureMode, operation: ChangeOperation) -> String {
   format!("{}_{}_{}_changes", table, mode.label(), operation.label())
}

/// Generates the DDL for the insert, update and delete triggers described by `spec`.
///
/// Triggers use `CREATE ... IF NOT EXISTS`, so executing the same output twice is a no-op.
/// Generating for a different mode yields differently named, independent triggers.
pub fn generate(spec: &TriggerSpec) -> String {
   ChangeOperation::ALL
      .iter()
      .map(|&operation| {
         let body = match spec.mode {
            CaptureMode::Json => json_body(spec, operation),
            CaptureMode::Sql => sql_body(spec, operation),
         };
         create_trigger(spec, operation, &body)
      })
      .collect::<Vec<_>>()
      .join("\n")
}

/// Generates `DROP TRIGGER IF EXISTS` statements for one table and mode.
pub fn drop_triggers(table: &str, mode: CaptureMode, schema: TriggerSchema) -> String {
   ChangeOperation::ALL
      .iter()
      .map(|&operation| {
         format!(
            "DROP TRIGGER IF EXISTS {}.{};",
            quote_ident(schema.schema_name()),
            quote_ident(&trigger_name(table, mode, operation))
         )
      })
      .collect::<Vec<_>>()
      .join("\n")
}

fn create_trigger(spec: &TriggerSpec, operation: ChangeOperation, body: &str) -> String {
   let temp = match spec.schema {
      TriggerSchema::Temp => "TEMP ",
      TriggerSchema::Persistent => "",
   };

   format!(
      "CREATE {}TRIGGER IF NOT EXISTS {} AFTER {} ON {}\nBEGIN\n   {};\nEND;",
      temp,
      quote_ident(&trigger_name(&spec.table, spec.mode, operation)),
      operation.keyword(),
      quote_ident(&spec.table),
      body
   )
}

fn column_ref(row: &str, column: &str) -> String {
   format!("{}.{}", row, quote_ident(column))
}

fn changed(column: &str) -> String {
   format!(
      "{} IS NOT {}",
      column_ref("OLD", column),
      column_ref("NEW", column)
   )
}

// ============================================================================
// JSON mode
// ============================================================================

fn json_body(spec: &TriggerSpec, operation: ChangeOperation) -> String {
   let keys = spec.keys();
   let data = spec.tracked_data();

   let (before, after) = match operation {
      ChangeOperation::Insert => ("NULL".to_string(), full_object("NEW", &keys, &data)),
      ChangeOperation::Delete => (full_object("OLD", &keys, &data), "NULL".to_string()),
      ChangeOperation::Update => {
         let before = keys
            .iter()
            .map(|k| delta_member("OLD", k, None))
            .chain(data.iter().map(|c| delta_member("OLD", c, Some(changed(c)))));
         let after = keys
            .iter()
            .chain(data.iter())
            .map(|c| delta_member("NEW", c, Some(changed(c))));
         (delta_object(before.collect()), delta_object(after.collect()))
      }
   };

   format!(
      "INSERT INTO {} ({}, {}, {}, {}) VALUES ({}, {}, {}, {})",
      quote_ident(&spec.destination),
      quote_ident("table_name"),
      quote_ident("before"),
      quote_ident("after"),
      quote_ident("timestamp"),
      quote_literal(&spec.table),
      before,
      after,
      TIMESTAMP_MS
   )
}

/// `json_object` over every key and data column of `row`.
fn full_object(row: &str, keys: &[&str], data: &[&str]) -> String {
   let members: Vec<String> = keys
      .iter()
      .chain(data.iter())
      .map(|c| format!("{}, {}", quote_literal(c), column_ref(row, c)))
      .collect();
   format!("json_object({})", members.join(", "))
}

/// One `(k, v)` row of a delta object, present only when `condition` holds.
fn delta_member(row: &str, column: &str, condition: Option<String>) -> String {
   let select = format!(
      "SELECT {} AS k, {} AS v",
      quote_literal(column),
      column_ref(row, column)
   );
   match condition {
      Some(condition) => format!("{} WHERE {}", select, condition),
      None => select,
   }
}

/// Aggregates delta rows into one JSON object; `{}` when no row qualifies.
fn delta_object(members: Vec<String>) -> String {
   if members.is_empty() {
      return "json_object()".to_string();
   }
   format!(
      "(SELECT json_group_object(k, v) FROM ({}))",
      members.join(" UNION ALL ")
   )
}

// ============================================================================
// SQL-replay mode
// ============================================================================

/// Concatenation of SQL string literals and `quote(...)` expressions.
#[derive(Default)]
struct ReplayText {
   parts: Vec<ReplayPart>,
}

enum ReplayPart {
   Literal(String),
   Value(String),
}

impl ReplayText {
   fn text(&mut self, text: &str) -> &mut Self {
      match self.parts.last_mut() {
         Some(ReplayPart::Literal(prev)) => prev.push_str(text),
         _ => self.parts.push(ReplayPart::Literal(text.to_string())),
      }
      self
   }

   fn value(&mut self, row: &str, column: &str) -> &mut Self {
      self
         .parts
         .push(ReplayPart::Value(format!("quote({})", column_ref(row, column))));
      self
   }

   /// `"a" = quote(ROW."a")` pairs joined by `separator`.
   fn assignments(&mut self, row: &str, columns: &[&str], separator: &str) -> &mut Self {
      for (i, column) in columns.iter().enumerate() {
         if i > 0 {
            self.text(separator);
         }
         self.text(&format!("{} = ", quote_ident(column)));
         self.value(row, column);
      }
      self
   }

   fn render(&self) -> String {
      self
         .parts
         .iter()
         .map(|part| match part {
            ReplayPart::Literal(text) => quote_literal(text),
            ReplayPart::Value(expr) => expr.clone(),
         })
         .collect::<Vec<_>>()
         .join(" || ")
   }
}

fn sql_body(spec: &TriggerSpec, operation: ChangeOperation) -> String {
   let keys = spec.keys();
   let data = spec.tracked_data();
   let table = quote_ident(&spec.table);
   let mut statement = ReplayText::default();

   match operation {
      ChangeOperation::Insert => {
         let columns: Vec<&str> = keys.iter().chain(data.iter()).copied().collect();
         let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
         statement.text(&format!("INSERT INTO {} ({}) VALUES (", table, names.join(", ")));
         for (i, column) in columns.iter().enumerate() {
            if i > 0 {
               statement.text(", ");
            }
            statement.value("NEW", column);
         }
         statement.text(")");
      }
      ChangeOperation::Update => {
         // Rows are matched on the new key values: keys are assumed immutable
         let assigned = if data.is_empty() { &keys } else { &data };
         statement
            .text(&format!("UPDATE {} SET ", table))
            .assignments("NEW", assigned, ", ")
            .text(" WHERE ")
            .assignments("NEW", &keys, " AND ");
      }
      ChangeOperation::Delete => {
         statement
            .text(&format!("DELETE FROM {} WHERE ", table))
            .assignments("OLD", &keys, " AND ");
      }
   }

   format!(
      "INSERT INTO {} ({}, {}) VALUES ({}, {})",
      quote_ident(&spec.destination),
      quote_ident("statement"),
      quote_ident("timestamp"),
      statement.render(),
      TIMESTAMP_MS
   )
}

#[cfg(test)]
mod tests {
   use super::*;

   fn foo_spec() -> TriggerSpec {
      TriggerSpec::new("foo", vec!["bar".into()], vec!["baz".into()], "changes")
   }

   #[test]
   fn test_quote_ident_doubles_quotes() {
      assert_eq!(quote_ident("plain"), "\"plain\"");
      assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
   }

   #[test]
   fn test_quote_literal_doubles_quotes() {
      assert_eq!(quote_literal("it's"), "'it''s'");
   }

   #[test]
   fn test_trigger_names_are_deterministic() {
      assert_eq!(
         trigger_name("foo", CaptureMode::Json, ChangeOperation::Update),
         "foo_json_update_changes"
      );
      assert_eq!(generate(&foo_spec()), generate(&foo_spec()));
   }

   #[test]
   fn test_json_triggers_cover_all_events() {
      let ddl = generate(&foo_spec());
      assert_eq!(ddl.matches("CREATE TEMP TRIGGER IF NOT EXISTS").count(), 3);
      assert!(ddl.contains("AFTER INSERT ON \"foo\""));
      assert!(ddl.contains("AFTER UPDATE ON \"foo\""));
      assert!(ddl.contains("AFTER DELETE ON \"foo\""));
      assert!(ddl.contains("json_object('bar', NEW.\"bar\", 'baz', NEW.\"baz\")"));
      assert!(ddl.contains("json_object('bar', OLD.\"bar\", 'baz', OLD.\"baz\")"));
   }

   #[test]
   fn test_json_update_always_keeps_keys_in_before() {
      let body = json_body(&foo_spec(), ChangeOperation::Update);
      assert!(body.contains("SELECT 'bar' AS k, OLD.\"bar\" AS v UNION ALL"));
      assert!(body.contains(
         "SELECT 'baz' AS k, OLD.\"baz\" AS v WHERE OLD.\"baz\" IS NOT NEW.\"baz\""
      ));
      assert!(body.contains(
         "SELECT 'bar' AS k, NEW.\"bar\" AS v WHERE OLD.\"bar\" IS NOT NEW.\"bar\""
      ));
   }

   #[test]
   fn test_excluded_columns_never_referenced() {
      let spec = TriggerSpec::new(
         "foo",
         vec!["bar".into()],
         vec!["baz".into(), "secret".into()],
         "changes",
      )
      .with_excluded(["secret"]);

      for mode in [CaptureMode::Json, CaptureMode::Sql] {
         let ddl = generate(&spec.clone().with_mode(mode));
         assert!(!ddl.contains("secret"), "{:?} DDL mentions excluded column", mode);
      }
   }

   #[test]
   fn test_persistent_schema_omits_temp() {
      let ddl = generate(&foo_spec().with_schema(TriggerSchema::Persistent));
      assert!(!ddl.contains("TEMP"));
      assert_eq!(ddl.matches("CREATE TRIGGER IF NOT EXISTS").count(), 3);
   }

   #[test]
   fn test_sql_update_matches_on_keys() {
      let body = sql_body(&foo_spec(), ChangeOperation::Update);
      assert!(body.contains(
         "'UPDATE \"foo\" SET \"baz\" = ' || quote(NEW.\"baz\") || ' WHERE \"bar\" = ' || quote(NEW.\"bar\")"
      ));
   }

   #[test]
   fn test_sql_delete_uses_old_keys() {
      let body = sql_body(&foo_spec(), ChangeOperation::Delete);
      assert!(body.contains("'DELETE FROM \"foo\" WHERE \"bar\" = ' || quote(OLD.\"bar\")"));
   }

   #[test]
   fn test_sql_insert_lists_keys_then_data() {
      let body = sql_body(&foo_spec(), ChangeOperation::Insert);
      assert!(body.contains(
         "'INSERT INTO \"foo\" (\"bar\", \"baz\") VALUES (' || quote(NEW.\"bar\") || ', ' || quote(NEW.\"baz\") || ')'"
      ));
   }

   #[test]
   fn test_embedded_quotes_survive_nesting() {
      let spec = TriggerSpec::new("o'brien", vec!["id".into()], vec![], "log");
      let ddl = generate(&spec.with_mode(CaptureMode::Sql));
      // Identifier inside a string literal: the single quote is doubled
      assert!(ddl.contains("'INSERT INTO \"o''brien\""));
   }

   #[test]
   fn test_drop_triggers_qualifies_schema() {
      let sql = drop_triggers("foo", CaptureMode::Sql, TriggerSchema::Temp);
      assert_eq!(sql.lines().count(), 3);
      assert!(sql.contains("DROP TRIGGER IF EXISTS \"temp\".\"foo_sql_insert_changes\";"));
   }
}

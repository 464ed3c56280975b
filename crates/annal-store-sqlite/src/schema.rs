//! SQL schema generation for declared models.
//!
//! The schema here is declared at runtime, so DDL is generated from model
//! descriptors rather than shipped as a fixed script. Every statement is
//! `IF NOT EXISTS`-idempotent.

use annal_core::schema::{ColumnType, FieldDef, ModelDef, OnDelete, snake_case};

/// Connection-level pragmas, run once at open.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

/// `CREATE TABLE` statement for one model.
pub fn create_table_sql(model: &ModelDef) -> String {
  let columns: Vec<String> = model.fields.iter().map(column_sql).collect();
  format!(
    "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
    model.table,
    columns.join(",\n    ")
  )
}

fn column_sql(field: &FieldDef) -> String {
  let mut sql = format!("{} {}", field.column_name(), affinity(&field.column));

  if field.primary_key && field.auto_increment {
    sql.push_str(" PRIMARY KEY AUTOINCREMENT");
  } else if field.primary_key {
    sql.push_str(" PRIMARY KEY");
  }
  if !field.nullable && !field.primary_key {
    sql.push_str(" NOT NULL");
  }
  if field.unique && !field.primary_key {
    sql.push_str(" UNIQUE");
  }

  if let ColumnType::ForeignKey { target, on_delete } = &field.column {
    // Referencing the table by name alone binds to its primary key, which
    // lets dependents declare before their targets exist.
    sql.push_str(&format!(" REFERENCES {}", snake_case(target)));
    sql.push_str(match on_delete {
      OnDelete::Cascade => " ON DELETE CASCADE",
      OnDelete::SetNull => " ON DELETE SET NULL",
    });
  }

  sql
}

fn affinity(column: &ColumnType) -> &'static str {
  match column {
    ColumnType::Integer | ColumnType::Boolean | ColumnType::ForeignKey { .. } => {
      "INTEGER"
    }
    ColumnType::Float => "REAL",
    ColumnType::Text
    | ColumnType::Date
    | ColumnType::Time
    | ColumnType::DateTime => "TEXT",
  }
}

/// Secondary-index statements for one model.
pub fn create_index_sql(model: &ModelDef) -> Vec<String> {
  model
    .fields
    .iter()
    .filter(|f| f.indexed && !f.primary_key)
    .map(|f| {
      format!(
        "CREATE INDEX IF NOT EXISTS {table}_{column}_idx ON {table}({column})",
        table = model.table,
        column = f.column_name()
      )
    })
    .collect()
}

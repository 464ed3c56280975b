//! Shadow-type synthesis — the derived historical record type.

use serde::{Deserialize, Serialize};

use crate::{
  schema::{FieldDef, ModelDef},
  value::Record,
};

// ─── Operation marker ────────────────────────────────────────────────────────

/// Which lifecycle event a snapshot row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryType {
  Created,
  Changed,
  Deleted,
}

impl HistoryType {
  /// The single-character marker stored in the `history_type` column.
  pub fn code(self) -> &'static str {
    match self {
      Self::Created => "+",
      Self::Changed => "~",
      Self::Deleted => "-",
    }
  }

  pub fn parse(code: &str) -> Option<Self> {
    match code {
      "+" => Some(Self::Created),
      "~" => Some(Self::Changed),
      "-" => Some(Self::Deleted),
      _ => None,
    }
  }
}

// ─── Bookkeeping columns ─────────────────────────────────────────────────────

/// The shadow type's own identity — monotonically increasing, independent of
/// the tracked type's key.
pub const HISTORY_ID: &str = "history_id";
/// Capture timestamp, stamped by the snapshot writer.
pub const HISTORY_DATE: &str = "history_date";
/// Operation marker (`+` / `~` / `-`).
pub const HISTORY_TYPE: &str = "history_type";

// ─── Shadow model ────────────────────────────────────────────────────────────

/// The synthesized historical record type for one tracked model.
///
/// The tracked model's full descriptor travels here, at the type level —
/// shadow rows never duplicate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowModel {
  pub model:     ModelDef,
  pub tracked:   ModelDef,
  /// Default retrieval order: this column, descending (newest first).
  pub order_by:  String,
  /// The column backing "latest" lookups.
  pub latest_by: String,
}

/// Assemble the shadow model for `tracked` from its transformed field list.
pub fn synthesize(tracked: &ModelDef, transformed: Vec<FieldDef>) -> ShadowModel {
  let name = format!("Historical{}", tracked.name);
  let mut model = ModelDef::new(&name).field(FieldDef::auto_id(HISTORY_ID));
  for field in transformed {
    model = model.field(field);
  }
  let model = model
    .field(FieldDef::datetime(HISTORY_DATE).indexed())
    .field(FieldDef::text(HISTORY_TYPE));

  ShadowModel {
    model,
    tracked:   tracked.clone(),
    order_by:  HISTORY_ID.to_owned(),
    latest_by: HISTORY_ID.to_owned(),
  }
}

impl ShadowModel {
  /// The shadow field holding one tracked field's copy. Converted foreign
  /// keys live under their `<name>_id` column name; everything else keeps
  /// the tracked name.
  pub fn shadow_field_name(&self, tracked_field: &FieldDef) -> String {
    if self.model.field_named(&tracked_field.name).is_some() {
      tracked_field.name.clone()
    } else {
      tracked_field.column_name()
    }
  }

  /// Reconstruct a point-in-time view of the tracked instance from one
  /// shadow row, dropping the bookkeeping columns. Computed, never stored.
  pub fn historical_object(&self, row: &Record) -> Record {
    let mut object = Record::new(&self.tracked);
    for field in &self.tracked.fields {
      let source = self.shadow_field_name(field);
      object.set(&field.name, row.get(&source).clone());
    }
    object
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    registry::SchemaCatalog,
    schema::ColumnType,
    transform::{KeyPolicyMap, transform_fields},
    value::Value,
  };

  fn shadow_for(model: &ModelDef, catalog: &SchemaCatalog) -> ShadowModel {
    let fields =
      transform_fields(model, &KeyPolicyMap::new(), catalog).unwrap();
    synthesize(model, fields)
  }

  #[test]
  fn shadow_model_shape() {
    let model = ModelDef::new("Widget")
      .with_auto_id()
      .field(FieldDef::integer("size"));
    let shadow = shadow_for(&model, &SchemaCatalog::default());

    assert_eq!(shadow.model.name, "HistoricalWidget");
    assert_eq!(shadow.model.table, "historical_widget");
    assert_eq!(shadow.order_by, HISTORY_ID);

    let names: Vec<&str> =
      shadow.model.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["history_id", "id", "size", "history_date", "history_type"]);

    // The shadow identity is the only key.
    let pk = shadow.model.primary_key().unwrap();
    assert_eq!(pk.name, HISTORY_ID);
    assert!(pk.auto_increment);
  }

  #[test]
  fn historical_object_drops_bookkeeping() {
    let model = ModelDef::new("Widget")
      .with_auto_id()
      .field(FieldDef::integer("size"));
    let shadow = shadow_for(&model, &SchemaCatalog::default());

    let mut row = Record::new(&shadow.model);
    row.set("history_id", 7);
    row.set("id", 3);
    row.set("size", 42);
    row.set(HISTORY_TYPE, "~");

    let object = shadow.historical_object(&row);
    assert_eq!(object.model, "Widget");
    assert_eq!(object.get("id"), &Value::Integer(3));
    assert_eq!(object.get("size"), &Value::Integer(42));
    assert!(!object.values.contains_key(HISTORY_ID));
    assert!(!object.values.contains_key(HISTORY_TYPE));
  }

  #[test]
  fn historical_object_reads_converted_key_columns() {
    let mut catalog = SchemaCatalog::default();
    catalog
      .insert(ModelDef::new("Parent").with_auto_id())
      .unwrap();
    let model = ModelDef::new("Child")
      .with_auto_id()
      .field(FieldDef::foreign_key("parent", "Parent"));
    let shadow = shadow_for(&model, &catalog);

    assert_eq!(
      shadow.model.field_named("parent_id").map(|f| &f.column),
      Some(&ColumnType::Integer)
    );

    let mut row = Record::new(&shadow.model);
    row.set("id", 1);
    row.set("parent_id", 9);

    let object = shadow.historical_object(&row);
    assert_eq!(object.get("parent"), &Value::Integer(9));
  }

  #[test]
  fn marker_codes_round_trip() {
    for kind in [HistoryType::Created, HistoryType::Changed, HistoryType::Deleted] {
      assert_eq!(HistoryType::parse(kind.code()), Some(kind));
    }
    assert_eq!(HistoryType::parse("x"), None);
  }
}

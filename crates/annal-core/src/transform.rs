//! The field transformer — derives a shadow type's field set from its
//! tracked type's.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  registry::SchemaCatalog,
  schema::{AutoFill, ColumnType, FieldDef, ModelDef},
};

// ─── Key policies ────────────────────────────────────────────────────────────

/// Per-relation policy deciding what a foreign key becomes in the shadow
/// type.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
  /// Collapse the relation to a plain copy of the target's primary key.
  /// Deleting the target leaves shadow rows untouched.
  #[default]
  Convert,
  /// Keep a live relational link in the shadow row. Deleting the target
  /// cascades into the shadow table.
  Preserve,
}

/// Foreign-key field name → conversion policy. Fields not listed default to
/// [`KeyPolicy::Convert`].
pub type KeyPolicyMap = BTreeMap<String, KeyPolicy>;

// ─── Transformation ──────────────────────────────────────────────────────────

/// Derive the shadow field set from the tracked model's fields, in declared
/// order. Pure function of its inputs; `catalog` only resolves the key type
/// of `Convert` targets (all targets are declared by the time finalization
/// runs this).
pub fn transform_fields(
  model: &ModelDef,
  policies: &KeyPolicyMap,
  catalog: &SchemaCatalog,
) -> Result<Vec<FieldDef>> {
  // Policy entries must name declared foreign-key fields; anything else is
  // a configuration error, surfaced before any schema is synthesized.
  for name in policies.keys() {
    match model.field_named(name) {
      Some(field) if field.column.is_foreign_key() => {}
      _ => {
        return Err(Error::InvalidKeyPolicy {
          model: model.name.clone(),
          field: name.clone(),
        });
      }
    }
  }

  let mut out = Vec::with_capacity(model.fields.len());
  for field in &model.fields {
    let mut field = field.clone();

    if let ColumnType::ForeignKey { target, .. } = field.column.clone() {
      field = match policies.get(&field.name).copied().unwrap_or_default() {
        KeyPolicy::Convert => convert_key(&field, &target, catalog)?,
        KeyPolicy::Preserve => preserve_key(field, model),
      };
    }

    if field.auto_increment {
      // The shadow type defines its own identity column.
      field.column = ColumnType::Integer;
      field.auto_increment = false;
    }

    if field.column.is_temporal() {
      // Snapshots must hold the exact captured value.
      field.auto_fill = AutoFill::Never;
    }

    if field.primary_key || field.unique {
      // A shadow table holds many rows per logical entity; keep these
      // columns fast to look up, not unique.
      field.primary_key = false;
      field.unique = false;
      field.indexed = true;
    }

    out.push(field);
  }
  Ok(out)
}

/// Replace a foreign key with a plain field mirroring the target's primary
/// key, stored under the same `<name>_id` column the live table uses.
fn convert_key(
  field: &FieldDef,
  target: &str,
  catalog: &SchemaCatalog,
) -> Result<FieldDef> {
  let target_model = catalog
    .get(target)
    .ok_or_else(|| Error::UnknownModel(target.to_owned()))?;
  let pk = target_model
    .primary_key()
    .ok_or_else(|| Error::MissingPrimaryKey(target.to_owned()))?;

  Ok(FieldDef {
    name:           field.column_name(),
    column:         pk.column.clone(),
    nullable:       field.nullable,
    unique:         false,
    // Copied as-is; the identity and uniqueness rules below strip both and
    // leave the column indexed, exactly as for any other copied key.
    primary_key:    pk.primary_key,
    auto_increment: pk.auto_increment,
    indexed:        false,
    auto_fill:      AutoFill::Never,
    related_name:   None,
  })
}

/// Keep a live foreign key, renaming its reverse relation so it cannot
/// collide with the tracked type's own.
fn preserve_key(mut field: FieldDef, model: &ModelDef) -> FieldDef {
  let base = field
    .related_name
    .clone()
    .unwrap_or_else(|| model.name.to_lowercase());
  field.related_name = Some(format!("{base}_historical"));
  field
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::OnDelete;

  fn catalog_with(models: Vec<ModelDef>) -> SchemaCatalog {
    let mut catalog = SchemaCatalog::default();
    for model in models {
      catalog.insert(model).expect("fixture model");
    }
    catalog
  }

  fn parent() -> ModelDef {
    ModelDef::new("Parent").with_auto_id().field(FieldDef::text("label"))
  }

  #[test]
  fn identity_fields_lose_auto_increment() {
    let model = ModelDef::new("Thing").with_auto_id();
    let fields =
      transform_fields(&model, &KeyPolicyMap::new(), &catalog_with(vec![]))
        .unwrap();

    let id = &fields[0];
    assert_eq!(id.name, "id");
    assert_eq!(id.column, ColumnType::Integer);
    assert!(!id.auto_increment);
    assert!(!id.primary_key);
    assert!(id.indexed);
  }

  #[test]
  fn auto_fill_behavior_is_stripped() {
    let model = ModelDef::new("Thing").with_auto_id().field(
      FieldDef::datetime("touched").auto_fill(AutoFill::OnEverySave),
    );
    let fields =
      transform_fields(&model, &KeyPolicyMap::new(), &catalog_with(vec![]))
        .unwrap();
    assert_eq!(fields[1].auto_fill, AutoFill::Never);
  }

  #[test]
  fn unique_fields_become_plain_indexed_fields() {
    let model =
      ModelDef::new("Thing").with_auto_id().field(FieldDef::text("slug").unique());
    let fields =
      transform_fields(&model, &KeyPolicyMap::new(), &catalog_with(vec![]))
        .unwrap();
    assert!(!fields[1].unique);
    assert!(fields[1].indexed);
  }

  #[test]
  fn converted_key_copies_target_key_type() {
    let model = ModelDef::new("Child")
      .with_auto_id()
      .field(FieldDef::foreign_key("parent", "Parent").nullable());
    let fields = transform_fields(
      &model,
      &KeyPolicyMap::new(),
      &catalog_with(vec![parent()]),
    )
    .unwrap();

    let key = &fields[1];
    assert_eq!(key.name, "parent_id");
    assert_eq!(key.column, ColumnType::Integer);
    assert!(key.nullable);
    assert!(!key.column.is_foreign_key());
    assert!(key.indexed);
  }

  #[test]
  fn preserved_key_rewrites_reverse_relation() {
    let model = ModelDef::new("Child").with_auto_id().field(
      FieldDef::foreign_key("parent", "Parent").related_name("rel_p"),
    );
    let policies =
      KeyPolicyMap::from([("parent".to_owned(), KeyPolicy::Preserve)]);
    let fields =
      transform_fields(&model, &policies, &catalog_with(vec![parent()]))
        .unwrap();

    let key = &fields[1];
    assert!(key.column.is_foreign_key());
    assert_eq!(key.related_name.as_deref(), Some("rel_p_historical"));
    assert_eq!(key.fk_on_delete(), Some(OnDelete::Cascade));
  }

  #[test]
  fn preserved_key_defaults_reverse_name_to_source_model() {
    let model = ModelDef::new("Child")
      .with_auto_id()
      .field(FieldDef::foreign_key("parent", "Parent"));
    let policies =
      KeyPolicyMap::from([("parent".to_owned(), KeyPolicy::Preserve)]);
    let fields =
      transform_fields(&model, &policies, &catalog_with(vec![parent()]))
        .unwrap();
    assert_eq!(fields[1].related_name.as_deref(), Some("child_historical"));
  }

  #[test]
  fn policy_on_non_key_field_is_a_configuration_error() {
    let model = ModelDef::new("Thing").with_auto_id();
    let policies = KeyPolicyMap::from([("id".to_owned(), KeyPolicy::Preserve)]);
    let err =
      transform_fields(&model, &policies, &catalog_with(vec![])).unwrap_err();
    assert!(matches!(err, Error::InvalidKeyPolicy { .. }));
  }
}

//! Snapshot capture — one new shadow row per lifecycle event.

use std::{collections::BTreeMap, rc::Rc};

use chrono::Utc;
use tracing::debug;

use crate::{
  Error, Result,
  schema::ModelDef,
  shadow::{HISTORY_DATE, HISTORY_TYPE, HistoryType, ShadowModel},
  signals::LifecycleObserver,
  store::Store,
  transform::{KeyPolicy, KeyPolicyMap},
  value::{Record, Value},
};

/// Materializes a tracked instance's current state into shadow rows.
pub struct SnapshotWriter {
  shadow:   Rc<ShadowModel>,
  policies: KeyPolicyMap,
  /// Foreign-key target descriptors, captured at finalization time (by which
  /// point every target is declared) so PRESERVEd keys can be dereferenced.
  targets:  BTreeMap<String, ModelDef>,
}

impl SnapshotWriter {
  pub fn new(
    shadow: Rc<ShadowModel>,
    policies: KeyPolicyMap,
    targets: BTreeMap<String, ModelDef>,
  ) -> Self {
    Self { shadow, policies, targets }
  }

  /// Copy the record's current field values, in declared order, into one new
  /// shadow row tagged with `kind` and the capture timestamp.
  ///
  /// A PRESERVEd foreign key is dereferenced first; a missing target aborts
  /// the capture with [`Error::Integrity`] before anything is written.
  pub fn capture(
    &self,
    store: &dyn Store,
    record: &Record,
    kind: HistoryType,
  ) -> Result<i64> {
    let mut row = Record::new(&self.shadow.model);

    for field in &self.shadow.tracked.fields {
      let value = record.get(&field.name).clone();

      if let Some(target) = field.fk_target() {
        match self.policies.get(&field.name).copied().unwrap_or_default() {
          KeyPolicy::Convert => {}
          KeyPolicy::Preserve if value.is_null() => {}
          KeyPolicy::Preserve => {
            let target_model = self
              .targets
              .get(target)
              .ok_or_else(|| Error::UnknownModel(target.to_owned()))?;
            if !store.row_exists(target_model, &value)? {
              return Err(Error::Integrity {
                model:  self.shadow.tracked.name.clone(),
                field:  field.name.clone(),
                target: target.to_owned(),
              });
            }
          }
        }
      }

      row.set(&self.shadow.shadow_field_name(field), value);
    }

    row.set(HISTORY_DATE, Value::DateTime(Utc::now()));
    row.set(HISTORY_TYPE, Value::Text(kind.code().to_owned()));

    store.insert_row(&self.shadow.model, &row)
  }
}

impl LifecycleObserver for SnapshotWriter {
  fn post_save(
    &self,
    store: &dyn Store,
    record: &Record,
    kind: HistoryType,
  ) -> Result<()> {
    self.capture(store, record, kind).map(|_| ())
  }

  fn post_delete(&self, store: &dyn Store, record: &Record) -> Result<()> {
    // A cascading delete removes a PRESERVEd target before its dependents
    // reach this handler; a snapshot holding a dangling reference would be
    // meaningless, so that one condition is dropped here — and only here.
    match self.capture(store, record, HistoryType::Deleted) {
      Ok(_) => Ok(()),
      Err(Error::Integrity { .. }) => {
        debug!(
          model = %record.model,
          "skipped deletion snapshot for cascade-removed target"
        );
        Ok(())
      }
      Err(err) => Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, collections::BTreeSet};

  use super::*;
  use crate::{
    registry::SchemaCatalog,
    schema::FieldDef,
    shadow::synthesize,
    transform::transform_fields,
  };

  struct MockStore {
    rows:    RefCell<Vec<Record>>,
    missing: BTreeSet<String>,
  }

  impl MockStore {
    fn new() -> Self {
      Self { rows: RefCell::new(Vec::new()), missing: BTreeSet::new() }
    }

    fn without(model: &str) -> Self {
      let mut store = Self::new();
      store.missing.insert(model.to_owned());
      store
    }
  }

  impl Store for MockStore {
    fn insert_row(&self, _model: &ModelDef, record: &Record) -> Result<i64> {
      let mut rows = self.rows.borrow_mut();
      rows.push(record.clone());
      Ok(rows.len() as i64)
    }

    fn row_exists(&self, model: &ModelDef, _pk: &Value) -> Result<bool> {
      Ok(!self.missing.contains(&model.name))
    }
  }

  fn parent() -> ModelDef { ModelDef::new("Parent").with_auto_id() }

  fn writer(policy: KeyPolicy) -> SnapshotWriter {
    let mut catalog = SchemaCatalog::default();
    catalog.insert(parent()).unwrap();

    let model = ModelDef::new("Child")
      .with_auto_id()
      .field(FieldDef::integer("size"))
      .field(FieldDef::foreign_key("parent", "Parent"));
    let policies = KeyPolicyMap::from([("parent".to_owned(), policy)]);
    let fields = transform_fields(&model, &policies, &catalog).unwrap();
    let shadow = Rc::new(synthesize(&model, fields));

    let targets = BTreeMap::from([("Parent".to_owned(), parent())]);
    SnapshotWriter::new(shadow, policies, targets)
  }

  fn child_record(writer: &SnapshotWriter) -> Record {
    Record::new(&writer.shadow.tracked)
      .with("id", 1)
      .with("size", 10)
      .with("parent", 5)
  }

  #[test]
  fn capture_copies_values_and_marker() {
    let writer = writer(KeyPolicy::Convert);
    let store = MockStore::new();

    writer
      .capture(&store, &child_record(&writer), HistoryType::Created)
      .unwrap();

    let rows = store.rows.borrow();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("size"), &Value::Integer(10));
    assert_eq!(rows[0].get("parent_id"), &Value::Integer(5));
    assert_eq!(rows[0].get(HISTORY_TYPE), &Value::Text("+".to_owned()));
    assert!(matches!(rows[0].get(HISTORY_DATE), Value::DateTime(_)));
  }

  #[test]
  fn preserved_key_missing_target_aborts_capture() {
    let writer = writer(KeyPolicy::Preserve);
    let store = MockStore::without("Parent");

    let err = writer
      .capture(&store, &child_record(&writer), HistoryType::Changed)
      .unwrap_err();
    assert!(matches!(err, Error::Integrity { .. }));
    assert!(store.rows.borrow().is_empty());
  }

  #[test]
  fn converted_key_never_dereferences() {
    let writer = writer(KeyPolicy::Convert);
    let store = MockStore::without("Parent");

    writer
      .capture(&store, &child_record(&writer), HistoryType::Deleted)
      .unwrap();
    assert_eq!(store.rows.borrow().len(), 1);
  }

  #[test]
  fn post_delete_swallows_integrity_only() {
    let writer = writer(KeyPolicy::Preserve);
    let store = MockStore::without("Parent");
    let record = child_record(&writer);

    // The deletion-path handler drops the condition and writes nothing.
    writer.post_delete(&store, &record).unwrap();
    assert!(store.rows.borrow().is_empty());

    // Every other capture site propagates it.
    let err = writer
      .post_save(&store, &record, HistoryType::Changed)
      .unwrap_err();
    assert!(matches!(err, Error::Integrity { .. }));
  }

  #[test]
  fn null_preserved_key_skips_dereference() {
    let writer = writer(KeyPolicy::Preserve);
    let store = MockStore::without("Parent");

    let mut record = child_record(&writer);
    record.set("parent", Value::Null);

    writer.capture(&store, &record, HistoryType::Changed).unwrap();
    assert_eq!(store.rows.borrow().len(), 1);
  }
}

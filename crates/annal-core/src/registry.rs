//! The tracking registry — declaration bookkeeping, dependency-deferred
//! finalization, and the retrofit source.
//!
//! One registry per host session replaces any notion of global mutable
//! tracking state. It is written only during schema declaration (write-once
//! per model), read-only afterwards.

use std::{
  collections::{BTreeMap, BTreeSet},
  rc::Rc,
};

use tracing::debug;

use crate::{
  Error, Result,
  capture::SnapshotWriter,
  relation::RelationDescriptor,
  schema::ModelDef,
  shadow::{ShadowModel, synthesize},
  signals::SignalHub,
  transform::{KeyPolicy, KeyPolicyMap, transform_fields},
};

// ─── Declaration ─────────────────────────────────────────────────────────────

/// A history-tracking declaration for one model.
///
/// The value is consumed at declaration time; the hub-owned observers it
/// gives rise to outlive it (see [`crate::signals`]).
#[derive(Debug, Clone)]
pub struct HistoricalRecords {
  attribute:      String,
  policies:       KeyPolicyMap,
  date_accessors: bool,
}

impl HistoricalRecords {
  /// Track under the conventional `history` attribute.
  pub fn new() -> Self { Self::named("history") }

  /// Track under a caller-chosen attribute name.
  pub fn named(attribute: &str) -> Self {
    Self {
      attribute:      attribute.to_owned(),
      policies:       KeyPolicyMap::new(),
      date_accessors: false,
    }
  }

  /// Set the conversion policy for one foreign-key field.
  pub fn key_policy(mut self, field: &str, policy: KeyPolicy) -> Self {
    self.policies.insert(field.to_owned(), policy);
    self
  }

  /// Expose `created_date` / `last_modified_date` accessors on the tracked
  /// type.
  pub fn with_date_accessors(mut self) -> Self {
    self.date_accessors = true;
    self
  }

  pub fn attribute(&self) -> &str { &self.attribute }

  pub fn policies(&self) -> &KeyPolicyMap { &self.policies }

  pub fn date_accessors(&self) -> bool { self.date_accessors }
}

impl Default for HistoricalRecords {
  fn default() -> Self { Self::new() }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// All models declared so far, by type name. Shadow models join the catalog
/// when their tracking finalizes, so they are queryable like any other type.
#[derive(Debug, Default, Clone)]
pub struct SchemaCatalog {
  models: BTreeMap<String, ModelDef>,
}

impl SchemaCatalog {
  pub fn get(&self, name: &str) -> Option<&ModelDef> { self.models.get(name) }

  pub fn contains(&self, name: &str) -> bool { self.models.contains_key(name) }

  pub fn insert(&mut self, model: ModelDef) -> Result<()> {
    if self.models.contains_key(&model.name) {
      return Err(Error::DuplicateModel(model.name));
    }
    self.models.insert(model.name.clone(), model);
    Ok(())
  }

  pub fn iter(&self) -> impl Iterator<Item = &ModelDef> {
    self.models.values()
  }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A finalized tracked type: its shadow model plus declaration metadata.
#[derive(Debug, Clone)]
pub struct TrackingEntry {
  pub tracked:        String,
  pub shadow:         Rc<ShadowModel>,
  pub attribute:      String,
  pub policies:       KeyPolicyMap,
  pub date_accessors: bool,
}

/// A tracking declaration parked until its foreign-key targets declare.
#[derive(Debug)]
struct PendingTracking {
  model:       String,
  declaration: HistoricalRecords,
}

/// Newly finalized tracking, handed back to the host so it can create the
/// shadow table and connect lifecycle hooks.
#[derive(Debug, Clone)]
pub struct FinalizedTracking {
  pub tracked: String,
  pub shadow:  Rc<ShadowModel>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct HistoryRegistry {
  catalog:   SchemaCatalog,
  pending:   Vec<PendingTracking>,
  finalized: BTreeMap<String, TrackingEntry>,
  connected: BTreeSet<String>,
}

impl HistoryRegistry {
  pub fn new() -> Self { Self::default() }

  pub fn catalog(&self) -> &SchemaCatalog { &self.catalog }

  pub fn model(&self, name: &str) -> Option<&ModelDef> {
    self.catalog.get(name)
  }

  pub fn entry(&self, model: &str) -> Option<&TrackingEntry> {
    self.finalized.get(model)
  }

  pub fn entries(&self) -> impl Iterator<Item = &TrackingEntry> {
    self.finalized.values()
  }

  /// Declare a model. Every declaration doubles as a resolution
  /// notification: any parked tracking whose dependencies are now all
  /// declared finalizes in the same call.
  pub fn declare(&mut self, model: ModelDef) -> Result<Vec<FinalizedTracking>> {
    if model.primary_key().is_none() {
      return Err(Error::MissingPrimaryKey(model.name));
    }
    debug!(model = %model.name, "model declared");
    self.catalog.insert(model)?;
    self.sweep()
  }

  /// Attach history tracking to an already-declared model.
  pub fn track(
    &mut self,
    model: &str,
    declaration: HistoricalRecords,
  ) -> Result<Vec<FinalizedTracking>> {
    let def = self
      .catalog
      .get(model)
      .ok_or_else(|| Error::UnknownModel(model.to_owned()))?;
    self.validate_declaration(def, &declaration)?;

    self.pending.push(PendingTracking {
      model: model.to_owned(),
      declaration,
    });
    self.sweep()
  }

  fn validate_declaration(
    &self,
    model: &ModelDef,
    declaration: &HistoricalRecords,
  ) -> Result<()> {
    if self.finalized.contains_key(&model.name)
      || self.pending.iter().any(|p| p.model == model.name)
    {
      return Err(Error::DuplicateTracking(model.name.clone()));
    }

    if model.field_named(declaration.attribute()).is_some() {
      return Err(Error::AttributeCollision {
        model:     model.name.clone(),
        attribute: declaration.attribute().to_owned(),
      });
    }

    for field in declaration.policies().keys() {
      match model.field_named(field) {
        Some(f) if f.column.is_foreign_key() => {}
        _ => {
          return Err(Error::InvalidKeyPolicy {
            model: model.name.clone(),
            field: field.clone(),
          });
        }
      }
    }

    Ok(())
  }

  /// Finalize every parked declaration whose targets are all declared.
  fn sweep(&mut self) -> Result<Vec<FinalizedTracking>> {
    let mut done = Vec::new();
    loop {
      let Some(pos) =
        self.pending.iter().position(|p| self.targets_declared(&p.model))
      else {
        break;
      };
      let pending = self.pending.remove(pos);
      done.push(self.finalize(pending)?);
    }
    Ok(done)
  }

  fn targets_declared(&self, model: &str) -> bool {
    let Some(def) = self.catalog.get(model) else { return false };
    def
      .foreign_keys()
      .filter_map(|f| f.fk_target())
      .all(|target| self.catalog.contains(target))
  }

  /// Transform, synthesize, and register the shadow model — exactly once per
  /// tracked type.
  fn finalize(&mut self, pending: PendingTracking) -> Result<FinalizedTracking> {
    let model = self
      .catalog
      .get(&pending.model)
      .cloned()
      .ok_or_else(|| Error::UnknownModel(pending.model.clone()))?;

    let fields =
      transform_fields(&model, pending.declaration.policies(), &self.catalog)?;
    let shadow = Rc::new(synthesize(&model, fields));
    self.catalog.insert(shadow.model.clone())?;
    debug!(
      model = %model.name,
      shadow = %shadow.model.name,
      "history tracking finalized"
    );

    self.finalized.insert(model.name.clone(), TrackingEntry {
      tracked:        model.name.clone(),
      shadow:         Rc::clone(&shadow),
      attribute:      pending.declaration.attribute().to_owned(),
      policies:       pending.declaration.policies().clone(),
      date_accessors: pending.declaration.date_accessors(),
    });

    Ok(FinalizedTracking { tracked: model.name, shadow })
  }

  /// Connect a snapshot observer for every finalized-but-unconnected entry:
  /// exactly one subscription pair per tracked type, no matter how often
  /// declaration-time code paths re-run.
  pub fn connect_hooks(&mut self, hub: &mut SignalHub) {
    for (name, entry) in &self.finalized {
      if !self.connected.insert(name.clone()) {
        continue;
      }

      let targets: BTreeMap<String, ModelDef> = entry
        .shadow
        .tracked
        .foreign_keys()
        .filter_map(|f| f.fk_target())
        .filter_map(|t| self.catalog.get(t).map(|m| (t.to_owned(), m.clone())))
        .collect();

      let writer = SnapshotWriter::new(
        Rc::clone(&entry.shadow),
        entry.policies.clone(),
        targets,
      );
      hub.connect(&entry.tracked, Rc::new(writer));
      debug!(model = %entry.tracked, "lifecycle hooks connected");
    }
  }

  /// The synthetic relation entry retrofitted onto `model`'s lookup index,
  /// keyed by the tracking attribute. Present only once finalization has
  /// completed — consulting relation metadata earlier is unsafe.
  pub fn synthetic_relation(
    &self,
    model: &str,
  ) -> Option<(String, RelationDescriptor)> {
    let entry = self.finalized.get(model)?;
    let pk = entry.shadow.tracked.primary_key()?;
    Some((entry.attribute.clone(), RelationDescriptor {
      source:        model.to_owned(),
      target:        entry.shadow.model.name.clone(),
      source_column: pk.column_name(),
      target_column: pk.column_name(),
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::FieldDef;

  fn plain(name: &str) -> ModelDef {
    ModelDef::new(name).with_auto_id().field(FieldDef::integer("n"))
  }

  #[test]
  fn zero_dependency_tracking_finalizes_immediately() {
    let mut registry = HistoryRegistry::new();
    registry.declare(plain("Solo")).unwrap();
    let done = registry.track("Solo", HistoricalRecords::new()).unwrap();

    assert_eq!(done.len(), 1);
    assert_eq!(done[0].shadow.model.name, "HistoricalSolo");
    assert!(registry.entry("Solo").is_some());
  }

  #[test]
  fn finalization_defers_until_targets_declare() {
    let mut registry = HistoryRegistry::new();

    let child = ModelDef::new("Child")
      .with_auto_id()
      .field(FieldDef::foreign_key("a", "TargetA"))
      .field(FieldDef::foreign_key("b", "TargetB"));
    registry.declare(child).unwrap();
    assert!(registry.track("Child", HistoricalRecords::new()).unwrap().is_empty());

    assert!(registry.declare(plain("TargetA")).unwrap().is_empty());
    assert!(registry.entry("Child").is_none());

    let done = registry.declare(plain("TargetB")).unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].tracked, "Child");
    assert!(registry.entry("Child").is_some());
  }

  #[test]
  fn duplicate_tracking_is_a_configuration_error() {
    let mut registry = HistoryRegistry::new();
    registry.declare(plain("Solo")).unwrap();
    registry.track("Solo", HistoricalRecords::new()).unwrap();

    let err =
      registry.track("Solo", HistoricalRecords::named("other")).unwrap_err();
    assert!(matches!(err, Error::DuplicateTracking(_)));
  }

  #[test]
  fn duplicate_model_is_a_configuration_error() {
    let mut registry = HistoryRegistry::new();
    registry.declare(plain("Solo")).unwrap();
    let err = registry.declare(plain("Solo")).unwrap_err();
    assert!(matches!(err, Error::DuplicateModel(_)));
  }

  #[test]
  fn attribute_collision_is_a_configuration_error() {
    let mut registry = HistoryRegistry::new();
    let model = plain("Solo").field(FieldDef::text("history"));
    registry.declare(model).unwrap();

    let err = registry.track("Solo", HistoricalRecords::new()).unwrap_err();
    assert!(matches!(err, Error::AttributeCollision { .. }));
  }

  #[test]
  fn hooks_connect_exactly_once() {
    let mut registry = HistoryRegistry::new();
    registry.declare(plain("Solo")).unwrap();
    registry.track("Solo", HistoricalRecords::new()).unwrap();

    let mut hub = SignalHub::new();
    registry.connect_hooks(&mut hub);
    registry.connect_hooks(&mut hub);
    assert_eq!(hub.observer_count("Solo"), 1);
  }

  #[test]
  fn synthetic_relation_appears_only_after_finalization() {
    let mut registry = HistoryRegistry::new();
    let child = ModelDef::new("Child")
      .with_auto_id()
      .field(FieldDef::foreign_key("a", "TargetA"));
    registry.declare(child).unwrap();
    registry.track("Child", HistoricalRecords::named("versions")).unwrap();
    assert!(registry.synthetic_relation("Child").is_none());

    registry.declare(plain("TargetA")).unwrap();
    let (name, descriptor) = registry.synthetic_relation("Child").unwrap();
    assert_eq!(name, "versions");
    assert_eq!(descriptor.target, "HistoricalChild");
    assert_eq!(descriptor.source_column, "id");
    assert_eq!(descriptor.target_column, "id");
  }
}

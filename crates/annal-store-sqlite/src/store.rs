//! [`Database`] — the SQLite host for declared models and their history.
//!
//! The database owns the schema catalog, the tracking registry, and the
//! lifecycle signal hub. Declaring a model creates its table; declaring
//! tracking parks a finalizer that fires once every foreign-key target is
//! declared, creating the shadow table and connecting snapshot hooks.

use std::{
  cell::RefCell,
  collections::{BTreeMap, BTreeSet},
  path::Path,
  rc::Rc,
};

use chrono::{DateTime, Timelike as _, Utc};
use rusqlite::OptionalExtension as _;
use tracing::debug;

use annal_core::{
  registry::{FinalizedTracking, HistoricalRecords, HistoryRegistry},
  relation::{RelationDescriptor, RelationIndex},
  schema::{AutoFill, ColumnType, FieldDef, ModelDef, OnDelete},
  shadow::HistoryType,
  signals::SignalHub,
  store::Store,
  value::{Record, Value},
};

use crate::{
  Error, Result,
  encode::{decode_row, encode_value},
  query::Query,
  schema::{PRAGMAS, create_index_sql, create_table_sql},
};

// ─── Database ────────────────────────────────────────────────────────────────

/// A schema-declaring, history-tracking store backed by a single SQLite
/// file. Single-threaded by design; concurrent access is the engine's
/// problem, not this layer's.
#[derive(Debug)]
pub struct Database {
  conn:      rusqlite::Connection,
  registry:  HistoryRegistry,
  signals:   SignalHub,
  /// Lazily rebuilt per-model lookup indexes, cleared on every declaration.
  relations: RefCell<BTreeMap<String, Rc<RelationIndex>>>,
}

impl Database {
  /// Open (or create) a database at `path`.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::from_conn(rusqlite::Connection::open(path)?)
  }

  /// Open an in-memory database — useful for testing.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_conn(rusqlite::Connection::open_in_memory()?)
  }

  fn from_conn(conn: rusqlite::Connection) -> Result<Self> {
    conn.execute_batch(PRAGMAS)?;
    Ok(Self {
      conn,
      registry: HistoryRegistry::new(),
      signals: SignalHub::new(),
      relations: RefCell::new(BTreeMap::new()),
    })
  }

  // ── Schema declaration ─────────────────────────────────────────────────

  /// Declare a model without history tracking.
  pub fn declare(&mut self, model: ModelDef) -> Result<()> {
    let finalized = self.registry.declare(model.clone())?;
    self.create_tables(&model)?;
    self.absorb(finalized)
  }

  /// Declare a model and attach a history-tracking declaration to it.
  pub fn declare_tracked(
    &mut self,
    model: ModelDef,
    declaration: HistoricalRecords,
  ) -> Result<()> {
    let name = model.name.clone();
    self.declare(model)?;
    self.track(&name, declaration)
  }

  /// Attach history tracking to an already-declared model.
  pub fn track(
    &mut self,
    model: &str,
    declaration: HistoricalRecords,
  ) -> Result<()> {
    let finalized = self.registry.track(model, declaration)?;
    self.absorb(finalized)
  }

  /// Create shadow tables and connect hooks for newly finalized tracking.
  fn absorb(&mut self, finalized: Vec<FinalizedTracking>) -> Result<()> {
    for tracking in &finalized {
      self.create_tables(&tracking.shadow.model)?;
      debug!(
        model = %tracking.tracked,
        shadow = %tracking.shadow.model.name,
        "shadow table ready"
      );
    }
    self.registry.connect_hooks(&mut self.signals);
    self.relations.borrow_mut().clear();
    Ok(())
  }

  fn create_tables(&self, model: &ModelDef) -> Result<()> {
    self.conn.execute(&create_table_sql(model), [])?;
    for index in create_index_sql(model) {
      self.conn.execute(&index, [])?;
    }
    Ok(())
  }

  // ── Records ────────────────────────────────────────────────────────────

  /// Insert or update `record` by primary key, applying auto-fill timestamp
  /// behavior, then emit the post-save notification.
  pub fn save(&self, record: &mut Record) -> Result<()> {
    let model = self.model(&record.model)?.clone();
    let pk_field = primary_key(&model)?.clone();

    let pk_value = record.get(&pk_field.name).clone();
    let creating =
      pk_value.is_null() || !self.exists_inner(&model, &pk_value)?;

    apply_auto_fill(&model, record, creating, Utc::now());

    if creating {
      let id = self.insert_inner(&model, record)?;
      if record.get(&pk_field.name).is_null() && pk_field.auto_increment {
        record.set(&pk_field.name, Value::Integer(id));
      }
    } else {
      self.update_inner(&model, record, &pk_field, &pk_value)?;
    }

    let kind =
      if creating { HistoryType::Created } else { HistoryType::Changed };
    self.signals.emit_post_save(self, record, kind)?;
    Ok(())
  }

  /// Delete `record`'s row.
  ///
  /// Engine-level cascades remove dependent rows, remove PRESERVEd shadow
  /// rows, and apply SET NULL. Post-delete notifications fire for the root
  /// first and then for each collected cascade dependent — so a dependent's
  /// snapshot capture observes the root already gone, which is exactly the
  /// condition the post-delete handler is allowed to drop.
  pub fn delete(&self, record: &Record) -> Result<()> {
    let model = self.model(&record.model)?.clone();
    let pk_field = primary_key(&model)?.clone();
    let pk_value = record.get(&pk_field.name).clone();

    let mut dependents = Vec::new();
    let mut seen = BTreeSet::new();
    seen.insert((model.name.clone(), format!("{pk_value:?}")));
    self.collect_dependents(&model, &pk_value, &mut dependents, &mut seen)?;

    let sql = format!(
      "DELETE FROM {} WHERE {} = ?1",
      model.table,
      pk_field.column_name()
    );
    self.conn.execute(&sql, [encode_value(&pk_value)])?;

    self.signals.emit_post_delete(self, record)?;
    for dependent in &dependents {
      self.signals.emit_post_delete(self, dependent)?;
    }
    Ok(())
  }

  /// Rows that deleting `(model, pk)` would remove by cascade, collected
  /// before the delete so their notifications can still fire.
  fn collect_dependents(
    &self,
    model: &ModelDef,
    pk: &Value,
    out: &mut Vec<Record>,
    seen: &mut BTreeSet<(String, String)>,
  ) -> Result<()> {
    let dependents: Vec<ModelDef> =
      self.registry.catalog().iter().cloned().collect();

    for dep_model in &dependents {
      for field in dep_model.foreign_keys() {
        if field.fk_target() != Some(model.name.as_str()) {
          continue;
        }
        if field.fk_on_delete() != Some(OnDelete::Cascade) {
          continue;
        }

        for row in self.select_where(dep_model, &field.column_name(), pk)? {
          let dep_pk = row.pk(dep_model);
          if !seen.insert((dep_model.name.clone(), format!("{dep_pk:?}"))) {
            continue;
          }
          self.collect_dependents(dep_model, &dep_pk, out, seen)?;
          out.push(row);
        }
      }
    }
    Ok(())
  }

  /// Fetch one row by primary key. `None` if missing.
  pub fn get(
    &self,
    model: &str,
    pk: impl Into<Value>,
  ) -> Result<Option<Record>> {
    let model = self.model(model)?.clone();
    let pk_field = primary_key(&model)?;
    let rows =
      self.select_where(&model, &pk_field.column_name(), &pk.into())?;
    Ok(rows.into_iter().next())
  }

  fn select_where(
    &self,
    model: &ModelDef,
    column: &str,
    value: &Value,
  ) -> Result<Vec<Record>> {
    let columns: Vec<String> =
      model.fields.iter().map(FieldDef::column_name).collect();
    let sql = format!(
      "SELECT {} FROM {} WHERE {} = ?1",
      columns.join(", "),
      model.table,
      column
    );

    let mut stmt = self.conn.prepare(&sql)?;
    let raws = stmt
      .query_map([encode_value(value)], |row| {
        let mut raw = Vec::with_capacity(model.fields.len());
        for i in 0..model.fields.len() {
          raw.push(row.get::<_, rusqlite::types::Value>(i)?);
        }
        Ok(raw)
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    raws.into_iter().map(|raw| decode_row(model, raw)).collect()
  }

  // ── Lookups ────────────────────────────────────────────────────────────

  pub fn model(&self, name: &str) -> Result<&ModelDef> {
    self
      .registry
      .model(name)
      .ok_or_else(|| Error::UnknownModel(name.to_owned()))
  }

  pub fn registry(&self) -> &HistoryRegistry { &self.registry }

  /// A filterable view over one declared model.
  pub fn query(&self, model: &str) -> Query<'_> { Query::new(self, model) }

  pub(crate) fn conn(&self) -> &rusqlite::Connection { &self.conn }

  /// The name→relation lookup index for `model`, built on demand.
  ///
  /// Rebuilds are deterministic and register-if-absent, so a rebuild never
  /// clobbers an earlier correct entry; synthetic history entries appear
  /// only once tracking finalization has completed.
  pub(crate) fn relation_index(&self, model: &str) -> Result<Rc<RelationIndex>> {
    if let Some(index) = self.relations.borrow().get(model) {
      return Ok(Rc::clone(index));
    }
    let index = Rc::new(self.build_relation_index(model)?);
    self
      .relations
      .borrow_mut()
      .insert(model.to_owned(), Rc::clone(&index));
    Ok(index)
  }

  fn build_relation_index(&self, model: &str) -> Result<RelationIndex> {
    let model = self.model(model)?;
    let mut index = RelationIndex::new();

    // The retrofit entry first: the tracking attribute is validated against
    // field names at declaration time, so it must win the lookup key.
    if let Some((name, descriptor)) =
      self.registry.synthetic_relation(&model.name)
    {
      index.register(&name, descriptor);
    }

    // Forward entries: this model's own foreign keys.
    for field in model.foreign_keys() {
      let Some(target) = field.fk_target() else { continue };
      let Some(target_model) = self.registry.model(target) else { continue };
      let Some(target_pk) = target_model.primary_key() else { continue };
      index.register(&field.name, RelationDescriptor {
        source:        model.name.clone(),
        target:        target_model.name.clone(),
        source_column: field.column_name(),
        target_column: target_pk.column_name(),
      });
    }

    // Reverse entries: every declared foreign key pointing at `model`.
    let Some(pk) = model.primary_key() else { return Ok(index) };
    for source in self.registry.catalog().iter() {
      for field in source.foreign_keys() {
        if field.fk_target() != Some(model.name.as_str()) {
          continue;
        }
        let name = field
          .related_name
          .clone()
          .unwrap_or_else(|| format!("{}_set", source.name.to_lowercase()));
        index.register(&name, RelationDescriptor {
          source:        model.name.clone(),
          target:        source.name.clone(),
          source_column: pk.column_name(),
          target_column: field.column_name(),
        });
      }
    }

    Ok(index)
  }

  // ── Row primitives ─────────────────────────────────────────────────────

  fn insert_inner(&self, model: &ModelDef, record: &Record) -> Result<i64> {
    let mut columns = Vec::new();
    let mut params: Vec<rusqlite::types::Value> = Vec::new();

    for field in &model.fields {
      let value = record.get(&field.name);
      if field.auto_increment && value.is_null() {
        continue; // the engine assigns it
      }
      columns.push(field.column_name());
      params.push(encode_value(value));
    }

    let placeholders: Vec<String> =
      (1..=params.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
      "INSERT INTO {} ({}) VALUES ({})",
      model.table,
      columns.join(", "),
      placeholders.join(", ")
    );
    self.conn.execute(&sql, rusqlite::params_from_iter(params))?;
    Ok(self.conn.last_insert_rowid())
  }

  fn update_inner(
    &self,
    model: &ModelDef,
    record: &Record,
    pk_field: &FieldDef,
    pk_value: &Value,
  ) -> Result<()> {
    let mut sets = Vec::new();
    let mut params: Vec<rusqlite::types::Value> = Vec::new();

    for field in &model.fields {
      if field.name == pk_field.name {
        continue;
      }
      sets.push(format!("{} = ?{}", field.column_name(), params.len() + 1));
      params.push(encode_value(record.get(&field.name)));
    }
    if sets.is_empty() {
      return Ok(());
    }

    params.push(encode_value(pk_value));
    let sql = format!(
      "UPDATE {} SET {} WHERE {} = ?{}",
      model.table,
      sets.join(", "),
      pk_field.column_name(),
      params.len()
    );
    self.conn.execute(&sql, rusqlite::params_from_iter(params))?;
    Ok(())
  }

  fn exists_inner(&self, model: &ModelDef, pk: &Value) -> Result<bool> {
    let pk_field = primary_key(model)?;
    let sql = format!(
      "SELECT 1 FROM {} WHERE {} = ?1",
      model.table,
      pk_field.column_name()
    );
    Ok(
      self
        .conn
        .query_row(&sql, [encode_value(pk)], |_| Ok(true))
        .optional()?
        .unwrap_or(false),
    )
  }
}

// ─── Store contract ──────────────────────────────────────────────────────────

impl Store for Database {
  fn insert_row(
    &self,
    model: &ModelDef,
    record: &Record,
  ) -> annal_core::Result<i64> {
    self
      .insert_inner(model, record)
      .map_err(|e| annal_core::Error::Store(Box::new(e)))
  }

  fn row_exists(
    &self,
    model: &ModelDef,
    pk: &Value,
  ) -> annal_core::Result<bool> {
    self
      .exists_inner(model, pk)
      .map_err(|e| annal_core::Error::Store(Box::new(e)))
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn primary_key(model: &ModelDef) -> Result<&FieldDef> {
  model
    .primary_key()
    .ok_or_else(|| annal_core::Error::MissingPrimaryKey(model.name.clone()).into())
}

/// Stamp auto-fill date/time fields, truncated to the microsecond precision
/// the storage encoding keeps, so in-memory and round-tripped values agree.
fn apply_auto_fill(
  model: &ModelDef,
  record: &mut Record,
  creating: bool,
  now: DateTime<Utc>,
) {
  let now = truncate_to_micros(now);

  for field in &model.fields {
    let fill = match field.auto_fill {
      AutoFill::Never => continue,
      AutoFill::OnCreate => creating,
      AutoFill::OnEverySave => true,
    };
    if !fill {
      continue;
    }

    let value = match field.column {
      ColumnType::Date => Value::Date(now.date_naive()),
      ColumnType::Time => Value::Time(now.time()),
      ColumnType::DateTime => Value::DateTime(now),
      _ => continue,
    };
    record.set(&field.name, value);
  }
}

fn truncate_to_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
  dt.with_nanosecond(dt.nanosecond() / 1_000 * 1_000).unwrap_or(dt)
}

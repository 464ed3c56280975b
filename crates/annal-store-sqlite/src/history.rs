//! The history manager — read-side conveniences over a tracked model's
//! shadow rows.

use chrono::{DateTime, Utc};

use annal_core::{
  registry::TrackingEntry,
  shadow::{HISTORY_DATE, HISTORY_TYPE, HistoryType},
  value::{Record, Value},
};

use crate::{
  Error, Result,
  query::{Agg, Op, Query},
  store::Database,
};

// ─── History ─────────────────────────────────────────────────────────────────

/// Read access to one tracked model's history, optionally scoped to a
/// single instance by primary key. Rows come back newest first.
#[derive(Debug)]
pub struct History<'a> {
  db:    &'a Database,
  entry: &'a TrackingEntry,
  pk:    Option<Value>,
}

impl Database {
  /// The history view for a tracked model. Errors if `model` is not under
  /// tracking (or its tracking has not finalized yet).
  pub fn history(&self, model: &str) -> Result<History<'_>> {
    let entry = self
      .registry()
      .entry(model)
      .ok_or_else(|| Error::NotTracked(model.to_owned()))?;
    Ok(History { db: self, entry, pk: None })
  }

  /// Earliest capture date for a tracked instance. Available only when the
  /// tracking declaration opted in with `with_date_accessors`.
  pub fn created_date(
    &self,
    model: &str,
    pk: impl Into<Value>,
  ) -> Result<Option<DateTime<Utc>>> {
    self.date_accessor(model, pk)?.created_date()
  }

  /// Latest capture date for a tracked instance; same opt-in as
  /// [`Database::created_date`].
  pub fn last_modified_date(
    &self,
    model: &str,
    pk: impl Into<Value>,
  ) -> Result<Option<DateTime<Utc>>> {
    self.date_accessor(model, pk)?.last_modified_date()
  }

  fn date_accessor(
    &self,
    model: &str,
    pk: impl Into<Value>,
  ) -> Result<History<'_>> {
    let history = self.history(model)?;
    if !history.entry.date_accessors {
      return Err(Error::AccessorsDisabled(model.to_owned()));
    }
    Ok(history.for_instance(pk))
  }
}

impl<'a> History<'a> {
  /// Scope the view to one instance of the tracked model.
  pub fn for_instance(mut self, pk: impl Into<Value>) -> Self {
    self.pk = Some(pk.into());
    self
  }

  /// The tracked model's descriptor — every shadow row of this type shares
  /// this one back-reference.
  pub fn tracked(&self) -> &annal_core::schema::ModelDef {
    &self.entry.shadow.tracked
  }

  fn key_field(&self) -> Result<String> {
    self
      .entry
      .shadow
      .tracked
      .primary_key()
      .map(|f| f.name.clone())
      .ok_or_else(|| {
        annal_core::Error::MissingPrimaryKey(self.entry.tracked.clone()).into()
      })
  }

  fn base_query(&self) -> Result<Query<'a>> {
    let mut query = self.db.query(&self.entry.shadow.model.name);
    if let Some(pk) = &self.pk {
      query = query.filter(&self.key_field()?, Op::Eq, pk.clone());
    }
    Ok(query)
  }

  fn require_instance(&self) -> Result<&Value> {
    self.pk.as_ref().ok_or(Error::InstanceRequired)
  }

  fn no_history(&self, pk: &Value) -> Error {
    Error::NoHistory {
      model: self.entry.tracked.clone(),
      pk:    format!("{pk:?}"),
    }
  }

  // ── Reads ──────────────────────────────────────────────────────────────

  /// Shadow rows in the current scope, newest first.
  pub fn rows(&self) -> Result<Vec<Record>> {
    self.base_query()?.order_desc(&self.entry.shadow.order_by).all()
  }

  pub fn count(&self) -> Result<i64> { self.base_query()?.count() }

  /// Aggregate over one shadow field within the current scope.
  pub fn aggregate(&self, field: &str, agg: Agg) -> Result<Value> {
    self.base_query()?.aggregate(field, agg)
  }

  /// The most recent snapshot of the scoped instance, reconstructed as the
  /// tracked type.
  pub fn most_recent(&self) -> Result<Record> {
    let pk = self.require_instance()?.clone();
    let mut rows = self
      .base_query()?
      .order_desc(&self.entry.shadow.latest_by)
      .limit(1)
      .all()?;
    let row = rows.pop().ok_or_else(|| self.no_history(&pk))?;
    Ok(self.entry.shadow.historical_object(&row))
  }

  /// The scoped instance as it existed at `at`. A deletion marker at that
  /// point is an error unless `restore` is set.
  pub fn as_of(&self, at: DateTime<Utc>, restore: bool) -> Result<Record> {
    let pk = self.require_instance()?.clone();
    let mut rows = self
      .base_query()?
      .filter(HISTORY_DATE, Op::Lte, Value::DateTime(at))
      .order_desc(&self.entry.shadow.latest_by)
      .limit(1)
      .all()?;
    let row = rows.pop().ok_or_else(|| self.no_history(&pk))?;

    let deleted = matches!(
      row.get(HISTORY_TYPE),
      Value::Text(code) if HistoryType::parse(code) == Some(HistoryType::Deleted)
    );
    if deleted && !restore {
      return Err(Error::AlreadyDeleted {
        model: self.entry.tracked.clone(),
        pk:    format!("{pk:?}"),
      });
    }
    Ok(self.entry.shadow.historical_object(&row))
  }

  /// Earliest capture timestamp for the scoped instance.
  pub fn created_date(&self) -> Result<Option<DateTime<Utc>>> {
    self.require_instance()?;
    self.date_aggregate(Agg::Min)
  }

  /// Latest capture timestamp for the scoped instance.
  pub fn last_modified_date(&self) -> Result<Option<DateTime<Utc>>> {
    self.require_instance()?;
    self.date_aggregate(Agg::Max)
  }

  fn date_aggregate(&self, agg: Agg) -> Result<Option<DateTime<Utc>>> {
    match self.aggregate(HISTORY_DATE, agg)? {
      Value::Null => Ok(None),
      Value::DateTime(dt) => Ok(Some(dt)),
      other => Err(Error::Decode {
        column: HISTORY_DATE.to_owned(),
        got:    format!("{other:?}"),
      }),
    }
  }

  /// The live row for `pk` if it exists, otherwise the most recent snapshot
  /// view.
  pub fn get_or_restore(&self, pk: impl Into<Value>) -> Result<Record> {
    let pk = pk.into();
    if let Some(live) = self.db.get(&self.entry.tracked, pk.clone())? {
      return Ok(live);
    }
    History { db: self.db, entry: self.entry, pk: Some(pk) }.most_recent()
  }
}

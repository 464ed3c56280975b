//! Runtime values and record envelopes.
//!
//! A [`Record`] is deliberately loosely typed — one row of a declared model,
//! interpreted through the model's field descriptors. The schema here is
//! data, not Rust types, so rows cannot be static structs.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::ModelDef;

// ─── Value ───────────────────────────────────────────────────────────────────

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
  Null,
  Integer(i64),
  Float(f64),
  Boolean(bool),
  Text(String),
  Date(NaiveDate),
  Time(NaiveTime),
  DateTime(DateTime<Utc>),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Self::Integer(v) => Some(*v),
      _ => None,
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self { Self::Integer(i64::from(v)) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self { Self::Boolean(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<NaiveDate> for Value {
  fn from(v: NaiveDate) -> Self { Self::Date(v) }
}

impl From<NaiveTime> for Value {
  fn from(v: NaiveTime) -> Self { Self::Time(v) }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self { Self::DateTime(v) }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One row of a declared model, keyed by field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub model:  String,
  pub values: BTreeMap<String, Value>,
}

impl Record {
  /// A blank record with every declared field set to `Null`.
  pub fn new(model: &ModelDef) -> Self {
    let values = model
      .fields
      .iter()
      .map(|f| (f.name.clone(), Value::Null))
      .collect();
    Self { model: model.name.clone(), values }
  }

  /// The value of `field`, or `Null` if unset.
  pub fn get(&self, field: &str) -> &Value {
    self.values.get(field).unwrap_or(&Value::Null)
  }

  pub fn set(&mut self, field: &str, value: impl Into<Value>) {
    self.values.insert(field.to_owned(), value.into());
  }

  /// Builder-flavored [`Record::set`] for fixture construction.
  pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
    self.set(field, value);
    self
  }

  /// The value of the model's primary-key field.
  pub fn pk(&self, model: &ModelDef) -> Value {
    model
      .primary_key()
      .map(|f| self.get(&f.name).clone())
      .unwrap_or(Value::Null)
  }
}

//! The narrow store contract the snapshot writer drives.
//!
//! The host persistence layer implements this on its database handle; the
//! core only ever inserts shadow rows and dereferences foreign-key targets.
//! Deletes, cascades, and queries stay host-side.

use crate::{
  Result,
  schema::ModelDef,
  value::{Record, Value},
};

pub trait Store {
  /// Insert one row for `model`; returns the generated integer identity
  /// (the shadow identifier, for shadow tables).
  fn insert_row(&self, model: &ModelDef, record: &Record) -> Result<i64>;

  /// Whether a row of `model` with the given primary-key value exists.
  fn row_exists(&self, model: &ModelDef, pk: &Value) -> Result<bool>;
}

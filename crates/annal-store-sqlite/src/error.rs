//! Error type for `annal-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] annal_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("cannot decode column {column:?} from {got}")]
  Decode { column: String, got: String },

  #[error("unknown model: {0:?}")]
  UnknownModel(String),

  #[error("model {0:?} is not under history tracking")]
  NotTracked(String),

  #[error("cannot resolve lookup path {0:?}")]
  BadLookup(String),

  /// The queried instance has no historical record.
  #[error("{model}(pk={pk}) has no historical record")]
  NoHistory { model: String, pk: String },

  #[error("{model}(pk={pk}) had already been deleted")]
  AlreadyDeleted { model: String, pk: String },

  #[error("an instance-scoped history view is required")]
  InstanceRequired,

  #[error("date accessors are not enabled for {0:?}")]
  AccessorsDisabled(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

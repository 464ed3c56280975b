//! Error types for `annal-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  // ── Configuration errors — fatal at schema-declaration time ──────────────
  #[error("model {0:?} is already declared")]
  DuplicateModel(String),

  #[error("model {0:?} cannot have more than one history declaration")]
  DuplicateTracking(String),

  #[error("history attribute {attribute:?} collides with a field on {model:?}")]
  AttributeCollision { model: String, attribute: String },

  #[error("key policy for {model}.{field} does not name a foreign-key field")]
  InvalidKeyPolicy { model: String, field: String },

  #[error("model {0:?} has no primary-key field")]
  MissingPrimaryKey(String),

  #[error("unknown model: {0:?}")]
  UnknownModel(String),

  // ── Runtime conditions ────────────────────────────────────────────────────
  /// A PRESERVEd foreign-key target was absent at capture time. Recoverable
  /// only at the post-delete capture site; a genuine error anywhere else.
  #[error("historical integrity violation: {model}.{field} references a missing {target} row")]
  Integrity {
    model:  String,
    field:  String,
    target: String,
  },

  /// Store-level failure, passed through unchanged.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

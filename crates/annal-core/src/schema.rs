//! Model and field descriptors — the schema layer that history tracking
//! consumes and synthesizes.
//!
//! A [`ModelDef`] is declared once at schema-definition time as an ordered
//! field list; declared order is significant (snapshots copy fields in this
//! order). Descriptors are plain data: synthesis is an explicit
//! transformation from one descriptor list to another, never reflection.

use serde::{Deserialize, Serialize};

// ─── Cascade behavior ────────────────────────────────────────────────────────

/// What the store does to dependent rows when a foreign-key target is
/// deleted.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
  #[default]
  Cascade,
  SetNull,
}

// ─── Auto-fill ───────────────────────────────────────────────────────────────

/// Automatic timestamp behavior for date/time fields.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AutoFill {
  #[default]
  Never,
  /// Set once when the row is first created, then left untouched.
  OnCreate,
  /// Refreshed on every save.
  OnEverySave,
}

// ─── Column types ────────────────────────────────────────────────────────────

/// The semantic type of a field's column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
  Integer,
  Float,
  Boolean,
  Text,
  Date,
  Time,
  DateTime,
  /// A relational link to another declared model, by type name. The target
  /// may be declared later than the field that references it.
  ForeignKey { target: String, on_delete: OnDelete },
}

impl ColumnType {
  pub fn is_foreign_key(&self) -> bool {
    matches!(self, Self::ForeignKey { .. })
  }

  pub fn is_temporal(&self) -> bool {
    matches!(self, Self::Date | Self::Time | Self::DateTime)
  }
}

// ─── Fields ──────────────────────────────────────────────────────────────────

/// One declared field of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
  pub name:           String,
  pub column:         ColumnType,
  pub nullable:       bool,
  pub unique:         bool,
  pub primary_key:    bool,
  pub auto_increment: bool,
  pub indexed:        bool,
  pub auto_fill:      AutoFill,
  /// Reverse-relation name exposed on a foreign key's target model.
  pub related_name:   Option<String>,
}

impl FieldDef {
  fn with_column(name: &str, column: ColumnType) -> Self {
    Self {
      name: name.to_owned(),
      column,
      nullable: false,
      unique: false,
      primary_key: false,
      auto_increment: false,
      indexed: false,
      auto_fill: AutoFill::Never,
      related_name: None,
    }
  }

  pub fn integer(name: &str) -> Self {
    Self::with_column(name, ColumnType::Integer)
  }

  pub fn float(name: &str) -> Self {
    Self::with_column(name, ColumnType::Float)
  }

  pub fn boolean(name: &str) -> Self {
    Self::with_column(name, ColumnType::Boolean)
  }

  pub fn text(name: &str) -> Self { Self::with_column(name, ColumnType::Text) }

  pub fn date(name: &str) -> Self { Self::with_column(name, ColumnType::Date) }

  pub fn time(name: &str) -> Self { Self::with_column(name, ColumnType::Time) }

  pub fn datetime(name: &str) -> Self {
    Self::with_column(name, ColumnType::DateTime)
  }

  /// A foreign key to `target`, cascading on delete unless overridden with
  /// [`FieldDef::on_delete`].
  pub fn foreign_key(name: &str, target: &str) -> Self {
    Self::with_column(name, ColumnType::ForeignKey {
      target:    target.to_owned(),
      on_delete: OnDelete::Cascade,
    })
  }

  /// The conventional auto-increment integer identity field.
  pub fn auto_id(name: &str) -> Self {
    let mut field = Self::with_column(name, ColumnType::Integer);
    field.primary_key = true;
    field.auto_increment = true;
    field
  }

  // ── Builder modifiers ──────────────────────────────────────────────────

  pub fn nullable(mut self) -> Self {
    self.nullable = true;
    self
  }

  pub fn unique(mut self) -> Self {
    self.unique = true;
    self
  }

  pub fn indexed(mut self) -> Self {
    self.indexed = true;
    self
  }

  pub fn auto_fill(mut self, fill: AutoFill) -> Self {
    self.auto_fill = fill;
    self
  }

  /// Override the cascade behavior of a foreign-key field. No effect on
  /// other column types.
  pub fn on_delete(mut self, behavior: OnDelete) -> Self {
    if let ColumnType::ForeignKey { on_delete, .. } = &mut self.column {
      *on_delete = behavior;
    }
    self
  }

  pub fn related_name(mut self, name: &str) -> Self {
    self.related_name = Some(name.to_owned());
    self
  }

  // ── Accessors ──────────────────────────────────────────────────────────

  /// The SQL column this field is stored under. Foreign keys use the
  /// `<name>_id` attribute-name convention.
  pub fn column_name(&self) -> String {
    if self.column.is_foreign_key() {
      format!("{}_id", self.name)
    } else {
      self.name.clone()
    }
  }

  /// Foreign-key target type name, if this field is a relation.
  pub fn fk_target(&self) -> Option<&str> {
    match &self.column {
      ColumnType::ForeignKey { target, .. } => Some(target),
      _ => None,
    }
  }

  pub fn fk_on_delete(&self) -> Option<OnDelete> {
    match &self.column {
      ColumnType::ForeignKey { on_delete, .. } => Some(*on_delete),
      _ => None,
    }
  }
}

// ─── Models ──────────────────────────────────────────────────────────────────

/// A declared record type: a named, ordered field list plus the derived
/// storage table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
  pub name:   String,
  pub table:  String,
  pub fields: Vec<FieldDef>,
}

impl ModelDef {
  pub fn new(name: &str) -> Self {
    Self {
      name:   name.to_owned(),
      table:  snake_case(name),
      fields: Vec::new(),
    }
  }

  /// Append a field, builder-style.
  pub fn field(mut self, field: FieldDef) -> Self {
    self.fields.push(field);
    self
  }

  /// Shorthand for the conventional `id` auto-increment primary key.
  pub fn with_auto_id(self) -> Self { self.field(FieldDef::auto_id("id")) }

  pub fn field_named(&self, name: &str) -> Option<&FieldDef> {
    self.fields.iter().find(|f| f.name == name)
  }

  pub fn primary_key(&self) -> Option<&FieldDef> {
    self.fields.iter().find(|f| f.primary_key)
  }

  pub fn foreign_keys(&self) -> impl Iterator<Item = &FieldDef> {
    self.fields.iter().filter(|f| f.column.is_foreign_key())
  }
}

/// Derive the storage table name from a type name
/// (`"VersionedModel"` → `"versioned_model"`).
pub fn snake_case(name: &str) -> String {
  let mut out = String::with_capacity(name.len() + 4);
  for (i, ch) in name.chars().enumerate() {
    if ch.is_ascii_uppercase() {
      if i > 0 {
        out.push('_');
      }
      out.push(ch.to_ascii_lowercase());
    } else {
      out.push(ch);
    }
  }
  out
}

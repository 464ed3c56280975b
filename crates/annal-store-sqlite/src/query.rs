//! Filter, count, and aggregate over declared models, traversing indexed
//! relations — including the retrofitted history relation — through
//! `__`-separated lookup paths.

use annal_core::{
  schema::{FieldDef, ModelDef},
  value::{Record, Value},
};
use rusqlite::types::Value as SqlValue;

use crate::{
  Error, Result,
  encode::{decode_row, decode_value, encode_value},
  store::Database,
};

// ─── Operators & aggregates ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Eq,
  Ne,
  Lt,
  Lte,
  Gt,
  Gte,
}

impl Op {
  fn sql(self) -> &'static str {
    match self {
      Self::Eq => "=",
      Self::Ne => "!=",
      Self::Lt => "<",
      Self::Lte => "<=",
      Self::Gt => ">",
      Self::Gte => ">=",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agg {
  Count,
  Sum,
  Min,
  Max,
}

impl Agg {
  fn sql(self) -> &'static str {
    match self {
      Self::Count => "COUNT",
      Self::Sum => "SUM",
      Self::Min => "MIN",
      Self::Max => "MAX",
    }
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// A filterable view over one declared model.
///
/// Lookup paths are `__`-separated: a leading segment naming an indexed
/// relation (reverse or retrofitted) joins through it, and the final segment
/// names a field on the joined model. A bare relation name is valid for
/// aggregation (`Count` over the relation's rows).
pub struct Query<'a> {
  db:      &'a Database,
  model:   String,
  filters: Vec<(String, Op, Value)>,
  order:   Option<String>,
  limit:   Option<usize>,
}

struct Join {
  name:   String,
  alias:  String,
  target: String,
  clause: String,
}

impl<'a> Query<'a> {
  pub(crate) fn new(db: &'a Database, model: &str) -> Self {
    Self {
      db,
      model: model.to_owned(),
      filters: Vec::new(),
      order: None,
      limit: None,
    }
  }

  pub fn filter(mut self, path: &str, op: Op, value: impl Into<Value>) -> Self {
    self.filters.push((path.to_owned(), op, value.into()));
    self
  }

  /// Order results by a field of the queried model, newest-value first.
  pub fn order_desc(mut self, field: &str) -> Self {
    self.order = Some(field.to_owned());
    self
  }

  pub fn limit(mut self, n: usize) -> Self {
    self.limit = Some(n);
    self
  }

  // ── Execution ──────────────────────────────────────────────────────────

  /// All matching rows of the queried model. Joined lookups select
  /// `DISTINCT` root rows, so a multi-row relation never duplicates them.
  pub fn all(self) -> Result<Vec<Record>> {
    let model = self.db.model(&self.model)?.clone();
    let (joins, wheres, params) = self.compile(&model)?;

    let columns: Vec<String> = model
      .fields
      .iter()
      .map(|f| format!("t0.{}", f.column_name()))
      .collect();
    let mut select = columns.join(", ");
    if !joins.is_empty() {
      select = format!("DISTINCT {select}");
    }

    let mut sql = assemble(&model, &select, &joins, &wheres);
    if let Some(order) = &self.order {
      let field = model
        .field_named(order)
        .ok_or_else(|| Error::BadLookup(order.clone()))?;
      sql.push_str(&format!(" ORDER BY t0.{} DESC", field.column_name()));
    }
    if let Some(limit) = self.limit {
      sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = self.db.conn().prepare(&sql)?;
    let raws = stmt
      .query_map(rusqlite::params_from_iter(params), |row| {
        let mut raw = Vec::with_capacity(model.fields.len());
        for i in 0..model.fields.len() {
          raw.push(row.get::<_, SqlValue>(i)?);
        }
        Ok(raw)
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    raws.into_iter().map(|raw| decode_row(&model, raw)).collect()
  }

  /// Count matching root rows (distinct under joins).
  pub fn count(self) -> Result<i64> {
    let model = self.db.model(&self.model)?.clone();
    let (joins, wheres, params) = self.compile(&model)?;

    let expr = if joins.is_empty() {
      "COUNT(*)".to_owned()
    } else {
      let pk = model.primary_key().ok_or_else(|| {
        Error::Core(annal_core::Error::MissingPrimaryKey(model.name.clone()))
      })?;
      format!("COUNT(DISTINCT t0.{})", pk.column_name())
    };

    let sql = assemble(&model, &expr, &joins, &wheres);
    Ok(self.db.conn().query_row(
      &sql,
      rusqlite::params_from_iter(params),
      |row| row.get(0),
    )?)
  }

  /// Aggregate over a field or relation path. `Count` over a bare relation
  /// counts its rows; `Min`/`Max` over a field decode back to that field's
  /// value type.
  pub fn aggregate(self, path: &str, agg: Agg) -> Result<Value> {
    let model = self.db.model(&self.model)?.clone();
    let (mut joins, wheres, params) = self.compile(&model)?;
    let (column, field) = self.resolve(&model, path, &mut joins, true)?;

    let expr = format!("{}({})", agg.sql(), column);
    let sql = assemble(&model, &expr, &joins, &wheres);
    let raw: SqlValue = self.db.conn().query_row(
      &sql,
      rusqlite::params_from_iter(params),
      |row| row.get(0),
    )?;

    if matches!(raw, SqlValue::Null) {
      return Ok(Value::Null);
    }
    match (agg, field) {
      (Agg::Min | Agg::Max, Some(field)) => decode_value(&field, raw),
      _ => match raw {
        SqlValue::Integer(v) => Ok(Value::Integer(v)),
        SqlValue::Real(v) => Ok(Value::Float(v)),
        other => Err(Error::Decode {
          column: path.to_owned(),
          got:    format!("{other:?}"),
        }),
      },
    }
  }

  // ── Compilation ────────────────────────────────────────────────────────

  fn compile(
    &self,
    model: &ModelDef,
  ) -> Result<(Vec<Join>, Vec<String>, Vec<SqlValue>)> {
    let mut joins = Vec::new();
    let mut wheres = Vec::new();
    let mut params = Vec::new();

    for (path, op, value) in &self.filters {
      let (column, _) = self.resolve(model, path, &mut joins, false)?;
      params.push(encode_value(value));
      wheres.push(format!("{column} {} ?{}", op.sql(), params.len()));
    }

    Ok((joins, wheres, params))
  }

  /// Resolve a lookup path to a SQL column expression, adding joins as
  /// needed. Returns the field descriptor when the path ends on a field.
  fn resolve(
    &self,
    model: &ModelDef,
    path: &str,
    joins: &mut Vec<Join>,
    allow_bare_relation: bool,
  ) -> Result<(String, Option<FieldDef>)> {
    match path.split_once("__") {
      None => {
        if let Some(field) = model.field_named(path) {
          Ok((format!("t0.{}", field.column_name()), Some(field.clone())))
        } else if allow_bare_relation {
          let (alias, related) = self.join(model, path, joins)?;
          let pk = related
            .primary_key()
            .ok_or_else(|| Error::BadLookup(path.to_owned()))?;
          Ok((format!("{alias}.{}", pk.column_name()), None))
        } else {
          Err(Error::BadLookup(path.to_owned()))
        }
      }
      Some((head, rest)) => {
        let (alias, related) = self.join(model, head, joins)?;
        let field = related
          .field_named(rest)
          .ok_or_else(|| Error::BadLookup(path.to_owned()))?
          .clone();
        Ok((format!("{alias}.{}", field.column_name()), Some(field)))
      }
    }
  }

  fn join(
    &self,
    model: &ModelDef,
    name: &str,
    joins: &mut Vec<Join>,
  ) -> Result<(String, ModelDef)> {
    if let Some(existing) = joins.iter().find(|j| j.name == name) {
      let related = self.db.model(&existing.target)?.clone();
      return Ok((existing.alias.clone(), related));
    }

    let index = self.db.relation_index(&model.name)?;
    let rel = index
      .get(name)
      .ok_or_else(|| Error::BadLookup(name.to_owned()))?;
    let related = self.db.model(&rel.target)?.clone();

    let alias = format!("t{}", joins.len() + 1);
    let clause = format!(
      "JOIN {} {} ON {}.{} = t0.{}",
      related.table, alias, alias, rel.target_column, rel.source_column
    );
    joins.push(Join {
      name: name.to_owned(),
      alias: alias.clone(),
      target: rel.target.clone(),
      clause,
    });
    Ok((alias, related))
  }
}

fn assemble(
  model: &ModelDef,
  select: &str,
  joins: &[Join],
  wheres: &[String],
) -> String {
  let mut sql = format!("SELECT {select} FROM {} t0", model.table);
  for join in joins {
    sql.push(' ');
    sql.push_str(&join.clause);
  }
  if !wheres.is_empty() {
    sql.push_str(" WHERE ");
    sql.push_str(&wheres.join(" AND "));
  }
  sql
}

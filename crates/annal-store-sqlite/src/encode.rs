//! Conversions between core values and their SQLite representations.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed microsecond
//! width, dates as `%Y-%m-%d`, and times as `%H:%M:%S%.6f`, so lexicographic
//! TEXT ordering agrees with chronological ordering. Booleans are stored as
//! 0/1 integers.

use annal_core::{
  schema::{ColumnType, FieldDef, ModelDef},
  value::{Record, Value},
};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;

use crate::{Error, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.6f";

// ─── Temporal encodings ──────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format(DATE_FORMAT).to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, DATE_FORMAT)
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_time(t: NaiveTime) -> String { t.format(TIME_FORMAT).to_string() }

pub fn decode_time(s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// Encode one value for binding into a SQL statement.
pub fn encode_value(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Integer(v) => SqlValue::Integer(*v),
    Value::Float(v) => SqlValue::Real(*v),
    Value::Boolean(v) => SqlValue::Integer(i64::from(*v)),
    Value::Text(v) => SqlValue::Text(v.clone()),
    Value::Date(v) => SqlValue::Text(encode_date(*v)),
    Value::Time(v) => SqlValue::Text(encode_time(*v)),
    Value::DateTime(v) => SqlValue::Text(encode_dt(*v)),
  }
}

/// Decode one raw column according to the field that owns it.
pub fn decode_value(field: &FieldDef, raw: SqlValue) -> Result<Value> {
  if matches!(raw, SqlValue::Null) {
    return Ok(Value::Null);
  }

  let mismatch = |got: &SqlValue| Error::Decode {
    column: field.name.clone(),
    got:    format!("{got:?}"),
  };

  Ok(match &field.column {
    ColumnType::Integer | ColumnType::ForeignKey { .. } => match raw {
      SqlValue::Integer(v) => Value::Integer(v),
      other => return Err(mismatch(&other)),
    },
    ColumnType::Boolean => match raw {
      SqlValue::Integer(v) => Value::Boolean(v != 0),
      other => return Err(mismatch(&other)),
    },
    ColumnType::Float => match raw {
      SqlValue::Real(v) => Value::Float(v),
      SqlValue::Integer(v) => Value::Float(v as f64),
      other => return Err(mismatch(&other)),
    },
    ColumnType::Text => match raw {
      SqlValue::Text(v) => Value::Text(v),
      other => return Err(mismatch(&other)),
    },
    ColumnType::Date => match raw {
      SqlValue::Text(v) => Value::Date(decode_date(&v)?),
      other => return Err(mismatch(&other)),
    },
    ColumnType::Time => match raw {
      SqlValue::Text(v) => Value::Time(decode_time(&v)?),
      other => return Err(mismatch(&other)),
    },
    ColumnType::DateTime => match raw {
      SqlValue::Text(v) => Value::DateTime(decode_dt(&v)?),
      other => return Err(mismatch(&other)),
    },
  })
}

/// Decode one full row, read in `model` field order.
pub fn decode_row(model: &ModelDef, raw: Vec<SqlValue>) -> Result<Record> {
  let mut record = Record::new(model);
  for (field, value) in model.fields.iter().zip(raw) {
    record.set(&field.name, decode_value(field, value)?);
  }
  Ok(record)
}

use std::collections::HashMap;
use std::fmt;

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::driver::{Cursor, Resource};
use crate::error::Result;
use crate::wire::WireType;

pub type DateTime = chrono::DateTime<FixedOffset>;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DbValue {
    String(String),
    Blob(Vec<u8>),
    Bool(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime),
    /// Row set produced by the driver inside a column or an output parameter.
    Cursor(RowSet),
    /// Materialized nested row set.
    Rows(Vec<Record>),
    Null,
}

impl DbValue {
    /// Kind of the value, `None` for SQL NULL.
    pub fn kind(&self) -> Option<ValueKind> {
        let kind = match self {
            DbValue::String(_) => ValueKind::String,
            DbValue::Blob(_) => ValueKind::Blob,
            DbValue::Bool(_) => ValueKind::Bool,
            DbValue::TinyInt(_) => ValueKind::TinyInt,
            DbValue::SmallInt(_) => ValueKind::SmallInt,
            DbValue::Int(_) => ValueKind::Int,
            DbValue::BigInt(_) => ValueKind::BigInt,
            DbValue::Float(_) => ValueKind::Float,
            DbValue::Double(_) => ValueKind::Double,
            DbValue::Decimal(_) => ValueKind::Decimal,
            DbValue::Date(_) => ValueKind::Date,
            DbValue::Time(_) => ValueKind::Time,
            DbValue::DateTime(_) => ValueKind::DateTime,
            DbValue::Cursor(_) => ValueKind::Cursor,
            DbValue::Rows(_) => ValueKind::Rows,
            DbValue::Null => return None,
        };
        Some(kind)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    pub fn to_bool(&self) -> bool {
        match self {
            DbValue::Bool(value) => *value,
            value => value.to_i64().is_some_and(|v| v != 0),
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            DbValue::TinyInt(value) => Some(*value as i64),
            DbValue::SmallInt(value) => Some(*value as i64),
            DbValue::Int(value) => Some(*value as i64),
            DbValue::BigInt(value) => Some(*value),
            DbValue::Bool(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime> {
        match self {
            DbValue::DateTime(value) => Some(*value),
            DbValue::String(value) => value.parse().ok(),
            _ => None,
        }
    }

    /// Parses a command line literal: `null`, `true`/`false`, integers,
    /// floating point numbers, everything else is a string.
    pub fn parse_literal(s: &str) -> Self {
        if s.eq_ignore_ascii_case("null") {
            DbValue::Null
        } else if s == "true" || s == "false" {
            DbValue::Bool(s == "true")
        } else if let Ok(i) = s.parse::<i64>() {
            DbValue::BigInt(i)
        } else if let Ok(d) = s.parse::<f64>() {
            DbValue::Double(d)
        } else {
            DbValue::String(s.to_string())
        }
    }
}

impl From<i8> for DbValue {
    fn from(value: i8) -> Self {
        DbValue::TinyInt(value)
    }
}

impl From<i16> for DbValue {
    fn from(value: i16) -> Self {
        DbValue::SmallInt(value)
    }
}

impl From<i32> for DbValue {
    fn from(value: i32) -> Self {
        DbValue::Int(value)
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        DbValue::BigInt(value)
    }
}

impl From<f32> for DbValue {
    fn from(value: f32) -> Self {
        DbValue::Float(value)
    }
}

impl From<f64> for DbValue {
    fn from(value: f64) -> Self {
        DbValue::Double(value)
    }
}

impl From<Decimal> for DbValue {
    fn from(value: Decimal) -> Self {
        DbValue::Decimal(value)
    }
}

impl From<&[u8]> for DbValue {
    fn from(value: &[u8]) -> Self {
        DbValue::Blob(value.to_vec())
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(value: Vec<u8>) -> Self {
        DbValue::Blob(value)
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        DbValue::String(value.to_string())
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        DbValue::String(value)
    }
}

impl From<bool> for DbValue {
    fn from(value: bool) -> Self {
        DbValue::Bool(value)
    }
}

impl From<()> for DbValue {
    fn from(_value: ()) -> Self {
        DbValue::Null
    }
}

impl From<NaiveDate> for DbValue {
    fn from(value: NaiveDate) -> Self {
        DbValue::Date(value)
    }
}

impl From<NaiveTime> for DbValue {
    fn from(value: NaiveTime) -> Self {
        DbValue::Time(value)
    }
}

impl From<DateTime> for DbValue {
    fn from(value: DateTime) -> Self {
        DbValue::DateTime(value)
    }
}

impl From<RowSet> for DbValue {
    fn from(value: RowSet) -> Self {
        DbValue::Cursor(value)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(DbValue::Null, Into::into)
    }
}

/// Value kinds used as keys of the wire type map and the converter table.
///
/// Every concrete kind corresponds to one [`DbValue`] variant. `Integer`,
/// `Number`, `Temporal` and `Any` are capability kinds which never describe a
/// value directly but include other kinds, see [`ValueKind::includes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Blob,
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Cursor,
    Rows,
    Integer,
    Number,
    Temporal,
    Any,
}

impl ValueKind {
    pub fn is_capability(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Number | ValueKind::Temporal | ValueKind::Any)
    }

    /// True when a value of `kind` is an instance of `self`.
    pub fn includes(self, kind: ValueKind) -> bool {
        if self == kind {
            return true;
        }
        match self {
            ValueKind::Any => true,
            ValueKind::Integer => matches!(
                kind,
                ValueKind::TinyInt | ValueKind::SmallInt | ValueKind::Int | ValueKind::BigInt
            ),
            ValueKind::Number => {
                ValueKind::Integer.includes(kind)
                    || matches!(kind, ValueKind::Integer | ValueKind::Float | ValueKind::Double | ValueKind::Decimal)
            }
            ValueKind::Temporal => matches!(kind, ValueKind::Date | ValueKind::Time | ValueKind::DateTime),
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Blob => "blob",
            ValueKind::Bool => "bool",
            ValueKind::TinyInt => "tiny_int",
            ValueKind::SmallInt => "small_int",
            ValueKind::Int => "int",
            ValueKind::BigInt => "big_int",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::Decimal => "decimal",
            ValueKind::Date => "date",
            ValueKind::Time => "time",
            ValueKind::DateTime => "date_time",
            ValueKind::Cursor => "cursor",
            ValueKind::Rows => "rows",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Temporal => "temporal",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

pub type Record = HashMap<String, DbValue>;

/// Call argument. Output parameters get their value from the database after
/// the call returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    value: DbValue,
    out: bool,
    out_type: Option<WireType>,
}

impl Parameter {
    pub fn input(value: impl Into<DbValue>) -> Self {
        Self { value: value.into(), out: false, out_type: None }
    }

    /// Output parameter registered with [`WireType::Other`].
    pub fn output() -> Self {
        Self { value: DbValue::Null, out: true, out_type: None }
    }

    pub fn output_as(wire_type: WireType) -> Self {
        Self { value: DbValue::Null, out: true, out_type: Some(wire_type) }
    }

    pub fn is_out(&self) -> bool {
        self.out
    }

    pub fn out_type(&self) -> Option<WireType> {
        self.out_type
    }

    pub fn value(&self) -> &DbValue {
        &self.value
    }

    pub fn set_value(&mut self, value: DbValue) {
        self.value = value;
    }

    pub fn into_value(self) -> DbValue {
        self.value
    }
}

impl From<DbValue> for Parameter {
    fn from(value: DbValue) -> Self {
        Parameter::input(value)
    }
}

/// Fully fetched rows together with their column names. Used as the cursor
/// of drivers that fetch eagerly and as the payload of nested cursors.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DbValue>>,
    #[serde(skip)]
    position: usize,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<DbValue>>) -> Self {
        Self { columns, rows, position: 0 }
    }
}

impl Resource for RowSet {
    fn close(&mut self) -> Result<()> {
        self.position = self.rows.len();
        Ok(())
    }
}

impl Cursor for RowSet {
    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn next_row(&mut self) -> Result<Option<Vec<DbValue>>> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }
}

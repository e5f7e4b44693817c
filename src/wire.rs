use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sql::ValueKind;

/// Protocol type tag used when binding a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireType {
    Varchar,
    Numeric,
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    VarBinary,
    Date,
    Time,
    Timestamp,
    RefCursor,
    Null,
    /// Unspecified, the driver infers the type from the value.
    Other,
}

impl WireType {
    /// Standard SQL type code.
    pub fn code(self) -> i32 {
        match self {
            WireType::Varchar => 12,
            WireType::Numeric => 2,
            WireType::Bit => -7,
            WireType::TinyInt => -6,
            WireType::SmallInt => 5,
            WireType::Integer => 4,
            WireType::BigInt => -5,
            WireType::Real => 7,
            WireType::Double => 8,
            WireType::VarBinary => -3,
            WireType::Date => 91,
            WireType::Time => 92,
            WireType::Timestamp => 93,
            WireType::RefCursor => 2012,
            WireType::Null => 0,
            WireType::Other => 1111,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Varchar => "VARCHAR",
            WireType::Numeric => "NUMERIC",
            WireType::Bit => "BIT",
            WireType::TinyInt => "TINYINT",
            WireType::SmallInt => "SMALLINT",
            WireType::Integer => "INTEGER",
            WireType::BigInt => "BIGINT",
            WireType::Real => "REAL",
            WireType::Double => "DOUBLE",
            WireType::VarBinary => "VARBINARY",
            WireType::Date => "DATE",
            WireType::Time => "TIME",
            WireType::Timestamp => "TIMESTAMP",
            WireType::RefCursor => "REF_CURSOR",
            WireType::Null => "NULL",
            WireType::Other => "OTHER",
        };
        f.write_str(name)
    }
}

pub const DEFAULT_WIRE_TYPES: &[(ValueKind, WireType)] = &[
    (ValueKind::String, WireType::Varchar),
    (ValueKind::Decimal, WireType::Numeric),
    (ValueKind::Bool, WireType::Bit),
    (ValueKind::TinyInt, WireType::TinyInt),
    (ValueKind::SmallInt, WireType::SmallInt),
    (ValueKind::Int, WireType::Integer),
    (ValueKind::BigInt, WireType::BigInt),
    (ValueKind::Float, WireType::Real),
    (ValueKind::Double, WireType::Double),
    (ValueKind::Blob, WireType::VarBinary),
    (ValueKind::Date, WireType::Date),
    (ValueKind::Time, WireType::Time),
    (ValueKind::DateTime, WireType::Timestamp),
];

/// Value kind to wire type lookup. Only exact kinds are looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct WireTypeMap {
    types: HashMap<ValueKind, WireType>,
}

impl WireTypeMap {
    pub fn empty() -> Self {
        Self { types: HashMap::new() }
    }

    pub fn get(&self, kind: ValueKind) -> Option<WireType> {
        self.types.get(&kind).copied()
    }

    /// Adds or overrides one entry, returning the previous wire type.
    pub fn put(&mut self, kind: ValueKind, wire_type: WireType) -> Option<WireType> {
        self.types.insert(kind, wire_type)
    }

    pub fn remove(&mut self, kind: ValueKind) -> Option<WireType> {
        self.types.remove(&kind)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueKind, WireType)> + '_ {
        self.types.iter().map(|(k, v)| (*k, *v))
    }
}

impl Default for WireTypeMap {
    fn default() -> Self {
        DEFAULT_WIRE_TYPES.iter().copied().collect()
    }
}

impl FromIterator<(ValueKind, WireType)> for WireTypeMap {
    fn from_iter<I: IntoIterator<Item = (ValueKind, WireType)>>(iter: I) -> Self {
        Self { types: iter.into_iter().collect() }
    }
}

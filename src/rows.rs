//! Materialization of cursors into records and per-kind value converters.

use std::fmt;
use std::sync::Arc;

use log::*;

use crate::driver::Cursor;
use crate::error::Result;
use crate::sql::{DbValue, Record, ValueKind};

/// Transforms a decoded value. The second argument is the column name.
pub type Converter = Arc<dyn Fn(DbValue, &str) -> DbValue + Send + Sync>;

/// Ordered value kind to converter table.
///
/// Lookup prefers an entry for the exact kind of the value; otherwise the
/// first capability entry (in insertion order) including the kind wins.
#[derive(Clone)]
pub struct ConverterTable {
    entries: Vec<(ValueKind, Converter)>,
}

impl ConverterTable {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds a converter or replaces the one registered for `kind` in place.
    pub fn put<F>(&mut self, kind: ValueKind, converter: F) -> &mut Self
    where
        F: Fn(DbValue, &str) -> DbValue + Send + Sync + 'static,
    {
        self.put_arc(kind, Arc::new(converter))
    }

    pub fn put_arc(&mut self, kind: ValueKind, converter: Converter) -> &mut Self {
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = converter,
            None => self.entries.push((kind, converter)),
        }
        self
    }

    pub fn get(&self, kind: ValueKind) -> Option<&Converter> {
        self.entries.iter().find(|(k, _)| *k == kind).map(|(_, c)| c)
    }

    pub fn remove(&mut self, kind: ValueKind) -> Option<Converter> {
        let pos = self.entries.iter().position(|(k, _)| *k == kind)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ValueKind> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, kind: ValueKind) -> Option<&Converter> {
        self.get(kind).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.is_capability() && k.includes(kind))
                .map(|(_, c)| c)
        })
    }

    /// Runs the matching converter once, values without one pass through.
    pub fn apply(&self, value: DbValue, column_name: &str) -> DbValue {
        let Some(kind) = value.kind() else {
            return value;
        };
        match self.find(kind) {
            Some(converter) => converter(value, column_name),
            None => value,
        }
    }
}

impl Default for ConverterTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.put(ValueKind::Cursor, convert_nested_cursor);
        table
    }
}

impl fmt::Debug for ConverterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

fn convert_nested_cursor(value: DbValue, column_name: &str) -> DbValue {
    match value {
        DbValue::Cursor(mut rows) => match convert_rows(&mut rows, None) {
            Ok(records) => DbValue::Rows(records),
            Err(err) => {
                error!("Cannot materialize nested cursor in column {column_name}: {err}");
                DbValue::Rows(Vec::new())
            }
        },
        value => value,
    }
}

/// Reads all remaining rows of `cursor` into records.
pub fn convert_rows(cursor: &mut dyn Cursor, converters: Option<&ConverterTable>) -> Result<Vec<Record>> {
    let columns = cursor.column_names();
    let mut records = Vec::new();
    while let Some(row) = cursor.next_row()? {
        let mut record = Record::with_capacity(columns.len());
        for (name, value) in columns.iter().zip(row) {
            let value = match converters {
                Some(converters) => converters.apply(value, name),
                None => value,
            };
            record.insert(name.clone(), value);
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::sql::RowSet;

    fn users() -> RowSet {
        RowSet::new(
            vec!["id".into(), "name".into(), "email".into()],
            vec![
                vec![DbValue::BigInt(1), "John".into(), "john@test.com".into()],
                vec![DbValue::BigInt(2), "Jane".into(), DbValue::Null],
            ],
        )
    }

    #[test]
    fn test_rows_to_records() {
        let records = convert_rows(&mut users(), Some(&ConverterTable::default())).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some(&DbValue::from("John")));
        assert_eq!(records[1].get("id"), Some(&DbValue::BigInt(2)));
        assert_eq!(records[1].get("email"), Some(&DbValue::Null));
    }

    #[test]
    fn test_no_rows() {
        let mut rs = RowSet::new(vec!["id".into()], vec![]);
        let records = convert_rows(&mut rs, None).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_converter_applied_once_per_matching_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut table = ConverterTable::empty();
        table.put(ValueKind::String, move |value, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            match value {
                DbValue::String(s) => DbValue::String(s.to_uppercase()),
                v => v,
            }
        });
        let records = convert_rows(&mut users(), Some(&table)).unwrap();
        // three non-null strings, the NULL email is never converted
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(records[0].get("name"), Some(&DbValue::from("JOHN")));
        assert_eq!(records[0].get("email"), Some(&DbValue::from("JOHN@TEST.COM")));
        assert_eq!(records[0].get("id"), Some(&DbValue::BigInt(1)));
        assert_eq!(records[1].get("email"), Some(&DbValue::Null));
    }

    #[test]
    fn test_converter_receives_column_name() {
        let mut table = ConverterTable::empty();
        table.put(ValueKind::BigInt, |_, column| DbValue::from(column));
        let records = convert_rows(&mut users(), Some(&table)).unwrap();
        assert_eq!(records[1].get("id"), Some(&DbValue::from("id")));
    }

    #[test]
    fn test_exact_match_wins_over_capability() {
        let mut table = ConverterTable::empty();
        table.put(ValueKind::Number, |_, _| DbValue::from("number"));
        table.put(ValueKind::BigInt, |_, _| DbValue::from("big_int"));
        assert_eq!(table.apply(DbValue::BigInt(5), "c"), DbValue::from("big_int"));
        assert_eq!(table.apply(DbValue::Int(5), "c"), DbValue::from("number"));
    }

    #[test]
    fn test_first_capability_in_insertion_order() {
        let mut table = ConverterTable::empty();
        table.put(ValueKind::Integer, |_, _| DbValue::from("integer"));
        table.put(ValueKind::Number, |_, _| DbValue::from("number"));
        table.put(ValueKind::Any, |_, _| DbValue::from("any"));
        assert_eq!(table.apply(DbValue::SmallInt(1), "c"), DbValue::from("integer"));
        assert_eq!(table.apply(DbValue::Double(1.0), "c"), DbValue::from("number"));
        assert_eq!(table.apply(DbValue::from("s"), "c"), DbValue::from("any"));
    }

    #[test]
    fn test_unmatched_value_passes_through() {
        let mut table = ConverterTable::empty();
        table.put(ValueKind::Temporal, |_, _| DbValue::Null);
        table.put(ValueKind::Blob, |_, _| DbValue::Null);
        assert_eq!(table.apply(DbValue::Double(2.5), "c"), DbValue::Double(2.5));
        assert_eq!(table.apply(DbValue::Null, "c"), DbValue::Null);
    }

    #[test]
    fn test_put_replaces_in_place() {
        let mut table = ConverterTable::empty();
        table.put(ValueKind::Integer, |_, _| DbValue::from("first"));
        table.put(ValueKind::Any, |_, _| DbValue::from("any"));
        table.put(ValueKind::Integer, |_, _| DbValue::from("second"));
        assert_eq!(table.len(), 2);
        assert_eq!(table.kinds().collect::<Vec<_>>(), vec![ValueKind::Integer, ValueKind::Any]);
        assert_eq!(table.apply(DbValue::Int(1), "c"), DbValue::from("second"));
        assert!(table.remove(ValueKind::Any).is_some());
        assert!(table.get(ValueKind::Any).is_none());
    }

    #[test]
    fn test_nested_cursor_is_materialized() {
        let nested = RowSet::new(
            vec!["line".into()],
            vec![vec![DbValue::Int(1)], vec![DbValue::Int(2)]],
        );
        let mut rs = RowSet::new(
            vec!["order".into(), "lines".into()],
            vec![vec![DbValue::Int(10), DbValue::Cursor(nested)]],
        );
        let records = convert_rows(&mut rs, Some(&ConverterTable::default())).unwrap();
        let Some(DbValue::Rows(lines)) = records[0].get("lines") else {
            panic!("expected materialized rows, got {:?}", records[0].get("lines"));
        };
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].get("line"), Some(&DbValue::Int(2)));
    }

    #[test]
    fn test_duplicate_column_names_overwrite() {
        let mut rs = RowSet::new(
            vec!["v".into(), "v".into()],
            vec![vec![DbValue::Int(1), DbValue::Int(2)]],
        );
        let records = convert_rows(&mut rs, None).unwrap();
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[0].get("v"), Some(&DbValue::Int(2)));
    }
}

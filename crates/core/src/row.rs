//! Row: one retrieved record
//!
//! A row maps field labels to values. A value may be absent (`None`) when the
//! service reported the field without content. Row identity is positional
//! within whatever sequence holds it; rows carry no key of their own.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Ordered mapping from field label to optional value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    fields: BTreeMap<String, Option<String>>,
}

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a field, `None` if the field is missing or has no value
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    /// Whether the field is present, with or without a value
    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Set a field value, returning the previous one
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.fields
            .insert(field.into(), Some(value.into()))
            .flatten()
    }

    /// Record a field with no value
    pub fn insert_absent(&mut self, field: impl Into<String>) {
        self.fields.insert(field.into(), None);
    }

    /// Replace the value of an existing field in place
    pub fn value_mut(&mut self, field: &str) -> Option<&mut String> {
        self.fields.get_mut(field).and_then(|v| v.as_mut())
    }

    /// Copy every valued field of `other` into this row.
    ///
    /// Fields without a value in `other` are skipped so they never clobber a
    /// value already present here. Returns the number of fields written.
    pub fn merge_from(&mut self, other: &Row) -> usize {
        let mut merged = 0;
        for (field, value) in &other.fields {
            if let Some(value) = value {
                self.fields.insert(field.clone(), Some(value.clone()));
                merged += 1;
            }
        }
        merged
    }

    /// Field labels in order
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Field/value pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the row has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Union of field labels across all rows: the column header set of a result.
pub fn column_names<'a>(rows: impl IntoIterator<Item = &'a Row>) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    for row in rows {
        for field in row.fields() {
            if !columns.contains(field) {
                columns.insert(field.to_string());
            }
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_values_read_as_none() {
        let mut row = Row::new();
        row.insert_absent("MP.MP");
        assert!(row.contains_field("MP.MP"));
        assert_eq!(row.get("MP.MP"), None);
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_merge_skips_absent_values() {
        let mut source: Row = [("id", "7"), ("name", "benzene")].into_iter().collect();
        let mut other: Row = [("id", "7"), ("structure", "mol")].into_iter().collect();
        other.insert_absent("name");

        let merged = source.merge_from(&other);

        assert_eq!(merged, 2);
        assert_eq!(source.get("name"), Some("benzene"));
        assert_eq!(source.get("structure"), Some("mol"));
    }

    #[test]
    fn test_column_names_is_union() {
        let a: Row = [("a", "1"), ("b", "2")].into_iter().collect();
        let b: Row = [("b", "3"), ("c", "4")].into_iter().collect();

        let columns = column_names([&a, &b]);
        let columns: Vec<_> = columns.into_iter().collect();
        assert_eq!(columns, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_row_bincode_roundtrip() {
        let mut row: Row = [("IDE.XRN", "1234")].into_iter().collect();
        row.insert_absent("IDE.CN");

        let bytes = bincode::serialize(&row).unwrap();
        let back: Row = bincode::deserialize(&bytes).unwrap();
        assert_eq!(row, back);
    }
}

//! Immutable consolidated dataset
//!
//! A [Dataset] is built once by the [SourceLoader](crate::loader::SourceLoader) and never
//! modified afterwards. It is shared between concurrent queries behind an `Arc`.

use std::collections::{BTreeSet, HashMap};

use crate::types::{ColumnKind, Value};

/// A column that is present in at least one source of the dataset
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Column name as it appears in the sources
    pub name: String,
    /// Kind of the values in the column
    pub kind: ColumnKind,
}

impl Column {
    /// Return a new Column object.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One consolidated row
///
/// Values are positional and aligned with [Dataset::columns]. A `None` cell is null, either
/// because the source had no value or because the column was absent from the row's source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    values: Box<[Option<Value>]>,
}

impl Record {
    /// Return a new Record object.
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self {
            values: values.into_boxed_slice(),
        }
    }

    /// Returns the value at column position `index`, or `None` if null.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Number of cells in the record.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the record has no cells.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An ordered, immutable sequence of records plus the columns actually present
#[derive(Debug, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    records: Vec<Record>,
}

impl Dataset {
    /// Return a new Dataset object.
    ///
    /// # Arguments
    ///
    /// * `columns`: Columns present in the dataset, in record order
    /// * `records`: Records whose cells are aligned with `columns`
    pub fn new(columns: Vec<Column>, records: Vec<Record>) -> Self {
        debug_assert!(records.iter().all(|r| r.len() == columns.len()));
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, column)| (column.name.clone(), i))
            .collect();
        Self {
            columns,
            index,
            records,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the position and description of a column by name.
    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        self.index.get(name).map(|&i| (i, &self.columns[i]))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the value of the cell at (`row`, `column`), or `None` if null.
    pub fn value(&self, row: usize, column: usize) -> Option<&Value> {
        self.records.get(row).and_then(|record| record.get(column))
    }

    /// Returns a cell by column name. Intended for inspection, not hot loops.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let (column, _) = self.column(name)?;
        self.value(row, column)
    }

    /// Returns the sorted, de-duplicated, non-null keys of a column.
    pub fn distinct_values(&self, column: usize) -> BTreeSet<String> {
        self.records
            .iter()
            .filter_map(|record| record.get(column))
            .map(|value| value.key().into_owned())
            .collect()
    }
}

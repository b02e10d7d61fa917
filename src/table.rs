//! Keyed, immutable tables and the inner-join merge between them.
//!
//! A `Table` is an ordered list of rows over named columns. A subset of the
//! columns forms the composite key, which must be unique. Every operation
//! returns a new table.

use crate::error::AssignError;
use crate::types::{CompositeKey, Field, KeyPart};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    key: Vec<usize>,
    rows: Vec<Vec<Field>>,
    keys: Vec<CompositeKey>,
    index: HashMap<CompositeKey, usize>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.key == other.key && self.rows == other.rows
    }
}

impl Table {
    pub fn new(name: &str, columns: Vec<String>, key_columns: &[&str]) -> Result<Self, AssignError> {
        let key = key_columns
            .iter()
            .map(|k| {
                columns.iter().position(|c| c == k).ok_or_else(|| AssignError::MissingColumn {
                    table: name.to_string(),
                    column: k.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if key.is_empty() {
            return Err(AssignError::InvalidKey(format!("table '{}' declares no key columns", name)));
        }
        Ok(Self {
            name: name.to_string(),
            columns,
            key,
            rows: Vec::new(),
            keys: Vec::new(),
            index: HashMap::new(),
        })
    }

    /// Builds a table from rows, failing on the first duplicate key.
    pub fn from_rows(
        name: &str,
        columns: Vec<String>,
        key_columns: &[&str],
        rows: impl IntoIterator<Item = Vec<Field>>,
    ) -> Result<Self, AssignError> {
        let mut table = Self::new(name, columns, key_columns)?;
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    pub(crate) fn push(&mut self, row: Vec<Field>) -> Result<(), AssignError> {
        if row.len() != self.columns.len() {
            return Err(AssignError::RowArity {
                table: self.name.clone(),
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        let key = self.key_for(&row)?;
        if self.index.contains_key(&key) {
            return Err(AssignError::KeyCollision {
                table: self.name.clone(),
                key: key.to_string(),
            });
        }
        self.index.insert(key.clone(), self.rows.len());
        self.keys.push(key);
        self.rows.push(row);
        Ok(())
    }

    fn key_for(&self, row: &[Field]) -> Result<CompositeKey, AssignError> {
        let parts = self
            .key
            .iter()
            .map(|&i| KeyPart::try_from(&row[i]))
            .collect::<Result<Vec<_>, _>>()?;
        CompositeKey::new(parts)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn key_columns(&self) -> Vec<&str> {
        self.key.iter().map(|&i| self.columns[i].as_str()).collect()
    }

    pub fn is_key_column(&self, index: usize) -> bool {
        self.key.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Field>] {
        &self.rows
    }

    pub fn column_index(&self, column: &str) -> Result<usize, AssignError> {
        self.columns.iter().position(|c| c == column).ok_or_else(|| AssignError::MissingColumn {
            table: self.name.clone(),
            column: column.to_string(),
        })
    }

    pub fn key_at(&self, row: usize) -> &CompositeKey {
        &self.keys[row]
    }

    pub fn keys(&self) -> &[CompositeKey] {
        &self.keys
    }

    pub fn get(&self, key: &CompositeKey) -> Option<&[Field]> {
        self.index.get(key).map(|&i| self.rows[i].as_slice())
    }

    /// Keeps rows matching `keep`, preserving order.
    pub fn filter(&self, name: &str, mut keep: impl FnMut(&[Field]) -> bool) -> Result<Table, AssignError> {
        let key_columns = self.key_columns();
        Table::from_rows(
            name,
            self.columns.clone(),
            &key_columns,
            self.rows.iter().filter(|r| keep(r)).cloned(),
        )
    }

    /// Projects onto `columns` in the given order, re-keying on `key_columns`.
    pub fn select(&self, name: &str, columns: &[&str], key_columns: &[&str]) -> Result<Table, AssignError> {
        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>, _>>()?;
        Table::from_rows(
            name,
            columns.iter().map(|c| c.to_string()).collect(),
            key_columns,
            self.rows.iter().map(|r| indices.iter().map(|&i| r[i].clone()).collect()),
        )
    }

    /// Appends columns computed per row. `values` must yield one row of
    /// `new_columns.len()` fields per existing row, in row order.
    pub fn with_columns(
        &self,
        name: &str,
        new_columns: &[String],
        values: Vec<Vec<Field>>,
    ) -> Result<Table, AssignError> {
        if values.len() != self.rows.len() {
            return Err(AssignError::RowArity {
                table: name.to_string(),
                expected: self.rows.len(),
                got: values.len(),
            });
        }
        let mut columns = self.columns.clone();
        for column in new_columns {
            let column = self.unique_column_name(&columns, column);
            columns.push(column);
        }
        let key_columns = self.key_columns();
        Table::from_rows(
            name,
            columns,
            &key_columns,
            self.rows.iter().zip(values).map(|(row, extra)| {
                let mut row = row.clone();
                row.extend(extra);
                row
            }),
        )
    }

    fn unique_column_name(&self, taken: &[String], column: &str) -> String {
        let mut candidate = column.to_string();
        while taken.contains(&candidate) {
            candidate.push_str("_right");
        }
        candidate
    }

    /// Inner join on the composite key. Both tables must be keyed on the same
    /// column names; rows whose key is missing on either side are dropped.
    /// Output keeps left row order, then appends the right table's non-key
    /// columns.
    pub fn merge(&self, right: &Table, name: &str) -> Result<Table, AssignError> {
        let left_key = self.key_columns();
        let right_key = right.key_columns();
        if left_key != right_key {
            return Err(AssignError::KeyMismatch {
                left: self.name.clone(),
                right: right.name.clone(),
                left_key: left_key.iter().map(|s| s.to_string()).collect(),
                right_key: right_key.iter().map(|s| s.to_string()).collect(),
            });
        }

        let right_extra: Vec<usize> = (0..right.columns.len()).filter(|i| !right.is_key_column(*i)).collect();
        let mut columns = self.columns.clone();
        for &i in &right_extra {
            let column = self.unique_column_name(&columns, &right.columns[i]);
            columns.push(column);
        }

        let mut merged = Table::new(name, columns, &left_key)?;
        for (i, row) in self.rows.iter().enumerate() {
            let Some(other) = right.get(self.key_at(i)) else {
                continue;
            };
            let mut row = row.clone();
            row.extend(right_extra.iter().map(|&j| other[j].clone()));
            merged.push(row)?;
        }
        Ok(merged)
    }
}

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::value::{ScalarKind, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Typed storage of one column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColumnData {
    Int(Vec<i64>),
    Double(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            ColumnData::Int(_) => ScalarKind::Int,
            ColumnData::Double(_) => ScalarKind::Double,
            ColumnData::Text(_) => ScalarKind::Text,
        }
    }
}

/// A named column with a null marker per row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
    nulls: Vec<bool>,
}

impl Column {
    /// Creates a column without null values
    pub fn new(name: &str, data: ColumnData) -> Self {
        let nulls = vec![false; data.len()];
        Self {
            name: name.to_string(),
            data,
            nulls,
        }
    }

    pub fn from_ints(name: &str, values: Vec<i64>) -> Self {
        Self::new(name, ColumnData::Int(values))
    }

    pub fn from_doubles(name: &str, values: Vec<f64>) -> Self {
        Self::new(name, ColumnData::Double(values))
    }

    pub fn from_texts(name: &str, values: Vec<&str>) -> Self {
        Self::new(
            name,
            ColumnData::Text(values.into_iter().map(str::to_string).collect()),
        )
    }

    /// Creates an integer column where `None` marks a null row
    pub fn from_nullable_ints(name: &str, values: Vec<Option<i64>>) -> Self {
        let nulls = values.iter().map(Option::is_none).collect();
        let data = ColumnData::Int(values.into_iter().map(|v| v.unwrap_or_default()).collect());
        Self {
            name: name.to_string(),
            data,
            nulls,
        }
    }

    /// Creates a double column where `None` marks a null row
    pub fn from_nullable_doubles(name: &str, values: Vec<Option<f64>>) -> Self {
        let nulls = values.iter().map(Option::is_none).collect();
        let data =
            ColumnData::Double(values.into_iter().map(|v| v.unwrap_or_default()).collect());
        Self {
            name: name.to_string(),
            data,
            nulls,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> ScalarKind {
        self.data.kind()
    }

    #[inline]
    pub fn is_null(&self, row: usize) -> bool {
        self.nulls[row]
    }

    /// Materializes the value at `row`, `None` for null
    pub fn value(&self, row: usize) -> Option<Value> {
        if self.is_null(row) {
            return None;
        }
        Some(match &self.data {
            ColumnData::Int(v) => Value::Int(v[row]),
            ColumnData::Double(v) => Value::Double(v[row]),
            ColumnData::Text(v) => Value::Text(v[row].clone()),
        })
    }

    /// Compares the cell at `row` with another column's cell without
    /// materializing values. `None` when either side is null or the kinds
    /// do not compare.
    #[inline]
    pub fn compare_cells(&self, row: usize, other: &Column, other_row: usize) -> Option<Ordering> {
        if self.is_null(row) || other.is_null(other_row) {
            return None;
        }
        match (&self.data, &other.data) {
            (ColumnData::Int(a), ColumnData::Int(b)) => Some(a[row].cmp(&b[other_row])),
            (ColumnData::Double(a), ColumnData::Double(b)) => a[row].partial_cmp(&b[other_row]),
            (ColumnData::Int(a), ColumnData::Double(b)) => (a[row] as f64).partial_cmp(&b[other_row]),
            (ColumnData::Double(a), ColumnData::Int(b)) => a[row].partial_cmp(&(b[other_row] as f64)),
            (ColumnData::Text(a), ColumnData::Text(b)) => {
                Some(a[row].as_str().cmp(b[other_row].as_str()))
            }
            _ => None,
        }
    }

    /// Compares the cell at `row` with a constant
    #[inline]
    pub fn compare_value(&self, row: usize, value: &Value) -> Option<Ordering> {
        if self.is_null(row) {
            return None;
        }
        match (&self.data, value) {
            (ColumnData::Int(a), Value::Int(b)) => Some(a[row].cmp(b)),
            (ColumnData::Int(a), Value::Double(b)) => (a[row] as f64).partial_cmp(b),
            (ColumnData::Double(a), Value::Double(b)) => a[row].partial_cmp(b),
            (ColumnData::Double(a), Value::Int(b)) => a[row].partial_cmp(&(*b as f64)),
            (ColumnData::Text(a), Value::Text(b)) => Some(a[row].as_str().cmp(b.as_str())),
            _ => None,
        }
    }
}

/// A named table whose columns all share one cardinality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    columns: Vec<Column>,
    cardinality: usize,
}

impl Table {
    pub fn new(name: &str, columns: Vec<Column>) -> Result<Self, String> {
        let cardinality = columns.first().map(Column::len).unwrap_or(0);
        if let Some(column) = columns.iter().find(|c| c.len() != cardinality) {
            return Err(format!(
                "Column '{}' of table '{}' has {} rows, expected {}",
                column.name,
                name,
                column.len(),
                cardinality
            ));
        }
        Ok(Self {
            name: name.to_string(),
            columns,
            cardinality,
        })
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

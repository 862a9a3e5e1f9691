/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use shared::{Column, ColumnData, ScalarKind, Value};
use std::hash::Hash;

/// A scalar kind that can key a value index
pub trait IndexKey: Eq + Hash + Clone + Send + Sync + 'static {
    const KIND: ScalarKind;

    /// Keys of every row, `None` for nulls and unindexable cells.
    /// Returns `None` when the column holds another kind.
    fn column_keys(column: &Column) -> Option<Vec<Option<Self>>>;

    /// Key equal to a predicate constant, if the constant can match this kind
    fn from_value(value: &Value) -> Option<Self>;
}

impl IndexKey for i64 {
    const KIND: ScalarKind = ScalarKind::Int;

    fn column_keys(column: &Column) -> Option<Vec<Option<Self>>> {
        match &column.data {
            ColumnData::Int(values) => Some(
                values
                    .iter()
                    .enumerate()
                    .map(|(row, v)| (!column.is_null(row)).then_some(*v))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            // Only integral doubles can equal an integer cell
            Value::Double(d) if d.fract() == 0.0 && d.abs() < i64::MAX as f64 => Some(*d as i64),
            _ => None,
        }
    }
}

/// Hashable double: `-0.0` and `0.0` share a key, NaN has none
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DoubleKey(u64);

impl DoubleKey {
    #[inline]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_nan() {
            None
        } else if value == 0.0 {
            Some(DoubleKey(0))
        } else {
            Some(DoubleKey(value.to_bits()))
        }
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl IndexKey for DoubleKey {
    const KIND: ScalarKind = ScalarKind::Double;

    fn column_keys(column: &Column) -> Option<Vec<Option<Self>>> {
        match &column.data {
            ColumnData::Double(values) => Some(
                values
                    .iter()
                    .enumerate()
                    .map(|(row, v)| if column.is_null(row) { None } else { DoubleKey::new(*v) })
                    .collect(),
            ),
            _ => None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Double(v) => DoubleKey::new(*v),
            Value::Int(v) => DoubleKey::new(*v as f64),
            Value::Text(_) => None,
        }
    }
}

impl IndexKey for String {
    const KIND: ScalarKind = ScalarKind::Text;

    fn column_keys(column: &Column) -> Option<Vec<Option<Self>>> {
        match &column.data {
            ColumnData::Text(values) => Some(
                values
                    .iter()
                    .enumerate()
                    .map(|(row, v)| (!column.is_null(row)).then(|| v.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::key::{DoubleKey, IndexKey};
use crate::error::IndexError;
use rustc_hash::FxHashMap;
use shared::{Column, ColumnData, ScalarKind, Value};

/// Outcome of a next-row lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLookup {
    Found(u32),
    Exhausted,
}

impl RowLookup {
    pub fn row(self) -> Option<u32> {
        match self {
            RowLookup::Found(row) => Some(row),
            RowLookup::Exhausted => None,
        }
    }

    /// Row index with the table cardinality standing for "no row"
    #[inline]
    pub fn or_cardinality(self, cardinality: u32) -> u32 {
        match self {
            RowLookup::Found(row) => row,
            RowLookup::Exhausted => cardinality,
        }
    }
}

const NO_RUN: u32 = u32::MAX;

/// Caller-owned memory of the last (run, position) a lookup ended on.
/// Ascending scans over one value resume from there instead of searching
/// the whole run again.
#[derive(Debug, Clone, Copy)]
pub struct LookupCursor {
    run: u32,
    position: u32,
}

impl Default for LookupCursor {
    fn default() -> Self {
        Self {
            run: NO_RUN,
            position: 0,
        }
    }
}

/// Maps each distinct value to a run `[count, row_1..row_count]` inside one
/// flat position array. Rows inside a run ascend; every non-null row is
/// stored exactly once.
#[derive(Debug, Clone)]
pub struct ValueIndex<K: IndexKey> {
    offsets: FxHashMap<K, u32>,
    positions: Vec<u32>,
    /// 1-based position of each row within its run, 0 for unindexed rows
    run_positions: Vec<u32>,
    nr_indexed: usize,
}

impl<K: IndexKey> ValueIndex<K> {
    /// Builds the index from one key per row (`None` for nulls)
    pub fn build(name: &str, keys: Vec<Option<K>>) -> Result<Self, IndexError> {
        if keys.len() >= u32::MAX as usize {
            return Err(IndexError::TooManyRows {
                column: name.to_string(),
                rows: keys.len(),
            });
        }

        // Count occurrences per value
        let mut counts: FxHashMap<K, u32> = FxHashMap::default();
        for key in keys.iter().flatten() {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
        let nr_indexed: usize = counts.values().map(|&c| c as usize).sum();

        // Runs are laid out in order of first occurrence
        let mut offsets: FxHashMap<K, u32> = FxHashMap::default();
        offsets.reserve(counts.len());
        let mut positions = vec![0u32; nr_indexed + counts.len()];
        let mut run_positions = vec![0u32; keys.len()];
        let mut next_offset = 0u32;

        for (row, key) in keys.into_iter().enumerate() {
            let Some(key) = key else { continue };
            let existing = offsets.get(&key).copied();
            let offset = match existing {
                Some(offset) => offset,
                None => {
                    let offset = next_offset;
                    next_offset += counts.get(&key).copied().unwrap_or(0) + 1;
                    offsets.insert(key, offset);
                    offset
                }
            };
            let slot = offset as usize;
            positions[slot] += 1;
            let position = positions[slot];
            positions[slot + position as usize] = row as u32;
            run_positions[row] = position;
        }

        let index = Self {
            offsets,
            positions,
            run_positions,
            nr_indexed,
        };
        index.verify(name)?;
        Ok(index)
    }

    /// Checks the layout invariants: runs ascend, every indexed row sits at
    /// its recorded run position, and the run sizes add up.
    fn verify(&self, name: &str) -> Result<(), IndexError> {
        let mut found = 0usize;
        for &offset in self.offsets.values() {
            let run = self.run(offset);
            for (i, &row) in run.iter().enumerate() {
                if i > 0 && run[i - 1] >= row {
                    return Err(IndexError::Unordered {
                        column: name.to_string(),
                        row,
                    });
                }
                if self.run_positions.get(row as usize).copied() != Some(i as u32 + 1) {
                    return Err(IndexError::Misplaced {
                        column: name.to_string(),
                        row,
                    });
                }
            }
            found += run.len();
        }
        if found != self.nr_indexed {
            return Err(IndexError::RowCountMismatch {
                column: name.to_string(),
                expected: self.nr_indexed,
                found,
            });
        }
        Ok(())
    }

    #[inline]
    fn run(&self, offset: u32) -> &[u32] {
        let start = offset as usize;
        let count = self.positions[start] as usize;
        &self.positions[start + 1..start + 1 + count]
    }

    /// Number of rows of the indexed column
    pub fn cardinality(&self) -> usize {
        self.run_positions.len()
    }

    /// Number of non-null rows
    pub fn nr_indexed(&self) -> usize {
        self.nr_indexed
    }

    pub fn nr_distinct(&self) -> usize {
        self.offsets.len()
    }

    /// Occurrences of `key`, 0 if absent
    pub fn count(&self, key: &K) -> usize {
        self.offsets
            .get(key)
            .map_or(0, |&offset| self.positions[offset as usize] as usize)
    }

    /// First row holding `key` that is strictly greater than `after`
    pub fn next_row(&self, key: &K, after: i64) -> RowLookup {
        let Some(&offset) = self.offsets.get(key) else {
            return RowLookup::Exhausted;
        };
        let run = self.run(offset);
        let idx = run.partition_point(|&r| r as i64 <= after);
        match run.get(idx) {
            Some(&row) => RowLookup::Found(row),
            None => RowLookup::Exhausted,
        }
    }

    /// Same as [`next_row`](Self::next_row), resuming from the cursor when
    /// the previous lookup hit the same run at or before `after`
    pub fn next_row_cached(&self, key: &K, after: i64, cursor: &mut LookupCursor) -> RowLookup {
        let Some(&offset) = self.offsets.get(key) else {
            *cursor = LookupCursor::default();
            return RowLookup::Exhausted;
        };
        let run = self.run(offset);
        let cached = cursor.run == offset
            && run
                .get(cursor.position as usize)
                .map_or(false, |&r| r as i64 <= after);

        let idx = if cached {
            let start = cursor.position as usize;
            match run.get(start + 1) {
                // Common case of an ascending scan: the very next slot
                Some(&next) if next as i64 > after => start + 1,
                _ => start + run[start..].partition_point(|&r| r as i64 <= after),
            }
        } else {
            run.partition_point(|&r| r as i64 <= after)
        };

        cursor.run = offset;
        match run.get(idx) {
            Some(&row) => {
                cursor.position = idx as u32;
                RowLookup::Found(row)
            }
            None => {
                cursor.position = run.len().saturating_sub(1) as u32;
                RowLookup::Exhausted
            }
        }
    }

    /// First row holding `key` greater than `after` among the run positions
    /// assigned round-robin to `worker`
    pub fn next_row_in_partition(
        &self,
        key: &K,
        after: i64,
        worker: usize,
        nr_workers: usize,
    ) -> RowLookup {
        if worker >= nr_workers {
            return RowLookup::Exhausted;
        }
        let Some(&offset) = self.offsets.get(key) else {
            return RowLookup::Exhausted;
        };
        let run = self.run(offset);
        let idx = run.partition_point(|&r| r as i64 <= after);
        let aligned = idx + (worker + nr_workers - idx % nr_workers) % nr_workers;
        match run.get(aligned) {
            Some(&row) => RowLookup::Found(row),
            None => RowLookup::Exhausted,
        }
    }

    /// Worker a row is assigned to for partitioned lookups
    pub fn worker_of_row(&self, row: u32, nr_workers: usize) -> Option<usize> {
        match self.run_positions.get(row as usize) {
            Some(&position) if position > 0 && nr_workers > 0 => {
                Some((position as usize - 1) % nr_workers)
            }
            _ => None,
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $index:ident => $body:expr) => {
        match $self {
            ColumnIndex::Int($index) => $body,
            ColumnIndex::Double($index) => $body,
            ColumnIndex::Text($index) => $body,
        }
    };
}

/// A value index over a column of any scalar kind
#[derive(Debug, Clone)]
pub enum ColumnIndex {
    Int(ValueIndex<i64>),
    Double(ValueIndex<DoubleKey>),
    Text(ValueIndex<String>),
}

fn build_typed<K: IndexKey>(column: &Column) -> Result<ValueIndex<K>, IndexError> {
    let keys = K::column_keys(column).unwrap_or_else(|| vec![None; column.len()]);
    ValueIndex::build(&column.name, keys)
}

impl ColumnIndex {
    pub fn build(column: &Column) -> Result<Self, IndexError> {
        Ok(match column.kind() {
            ScalarKind::Int => ColumnIndex::Int(build_typed(column)?),
            ScalarKind::Double => ColumnIndex::Double(build_typed(column)?),
            ScalarKind::Text => ColumnIndex::Text(build_typed(column)?),
        })
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            ColumnIndex::Int(_) => ScalarKind::Int,
            ColumnIndex::Double(_) => ScalarKind::Double,
            ColumnIndex::Text(_) => ScalarKind::Text,
        }
    }

    pub fn cardinality(&self) -> usize {
        dispatch!(self, index => index.cardinality())
    }

    pub fn nr_distinct(&self) -> usize {
        dispatch!(self, index => index.nr_distinct())
    }

    /// Whether a constant can be looked up in this index
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ColumnIndex::Int(_) => i64::from_value(value).is_some(),
            ColumnIndex::Double(_) => DoubleKey::from_value(value).is_some(),
            ColumnIndex::Text(_) => String::from_value(value).is_some(),
        }
    }

    /// Next row after `after` whose value equals the cell `source[row]`.
    /// Null cells and cells of another kind match nothing.
    #[inline]
    pub fn lookup_cell(
        &self,
        source: &Column,
        row: usize,
        after: i64,
        cursor: &mut LookupCursor,
    ) -> RowLookup {
        if source.is_null(row) {
            return RowLookup::Exhausted;
        }
        match (self, &source.data) {
            (ColumnIndex::Int(index), ColumnData::Int(values)) => {
                index.next_row_cached(&values[row], after, cursor)
            }
            (ColumnIndex::Double(index), ColumnData::Double(values)) => {
                match DoubleKey::new(values[row]) {
                    Some(key) => index.next_row_cached(&key, after, cursor),
                    None => RowLookup::Exhausted,
                }
            }
            (ColumnIndex::Text(index), ColumnData::Text(values)) => {
                index.next_row_cached(&values[row], after, cursor)
            }
            _ => RowLookup::Exhausted,
        }
    }

    /// Next row after `after` holding a constant
    pub fn lookup_value(&self, value: &Value, after: i64, cursor: &mut LookupCursor) -> RowLookup {
        match self {
            ColumnIndex::Int(index) => i64::from_value(value)
                .map_or(RowLookup::Exhausted, |key| index.next_row_cached(&key, after, cursor)),
            ColumnIndex::Double(index) => DoubleKey::from_value(value)
                .map_or(RowLookup::Exhausted, |key| index.next_row_cached(&key, after, cursor)),
            ColumnIndex::Text(index) => String::from_value(value)
                .map_or(RowLookup::Exhausted, |key| index.next_row_cached(&key, after, cursor)),
        }
    }

    /// Partitioned variant of [`lookup_value`](Self::lookup_value)
    pub fn lookup_value_in_partition(
        &self,
        value: &Value,
        after: i64,
        worker: usize,
        nr_workers: usize,
    ) -> RowLookup {
        match self {
            ColumnIndex::Int(index) => i64::from_value(value).map_or(RowLookup::Exhausted, |key| {
                index.next_row_in_partition(&key, after, worker, nr_workers)
            }),
            ColumnIndex::Double(index) => DoubleKey::from_value(value)
                .map_or(RowLookup::Exhausted, |key| {
                    index.next_row_in_partition(&key, after, worker, nr_workers)
                }),
            ColumnIndex::Text(index) => String::from_value(value)
                .map_or(RowLookup::Exhausted, |key| {
                    index.next_row_in_partition(&key, after, worker, nr_workers)
                }),
        }
    }

    /// Occurrences of a constant, 0 if absent or of another kind
    pub fn count_value(&self, value: &Value) -> usize {
        match self {
            ColumnIndex::Int(index) => i64::from_value(value).map_or(0, |key| index.count(&key)),
            ColumnIndex::Double(index) => {
                DoubleKey::from_value(value).map_or(0, |key| index.count(&key))
            }
            ColumnIndex::Text(index) => String::from_value(value).map_or(0, |key| index.count(&key)),
        }
    }

    pub fn worker_of_row(&self, row: u32, nr_workers: usize) -> Option<usize> {
        dispatch!(self, index => index.worker_of_row(row, nr_workers))
    }
}

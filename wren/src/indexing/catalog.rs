/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::value_index::ColumnIndex;
use crate::error::IndexError;
use log::debug;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use shared::{ColumnRef, JoinQuery, PredicateKind, Table};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Holds the value indexes of a query's columns, keyed by column reference.
/// Immutable once built and shared read-only between workers.
#[derive(Debug, Clone, Default)]
pub struct IndexCatalog {
    indexes: FxHashMap<ColumnRef, Arc<ColumnIndex>>,
}

impl IndexCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the requested column indexes in parallel
    pub fn build(tables: &[Arc<Table>], columns: &[ColumnRef]) -> Result<Self, IndexError> {
        let built: Vec<(ColumnRef, Arc<ColumnIndex>)> = columns
            .par_iter()
            .filter_map(|&column_ref| {
                let column = tables.get(column_ref.table)?.column(column_ref.column)?;
                Some(ColumnIndex::build(column).map(|index| (column_ref, Arc::new(index))))
            })
            .collect::<Result<_, _>>()?;

        debug!("Built {} value indexes", built.len());
        Ok(Self {
            indexes: built.into_iter().collect(),
        })
    }

    /// Indexes every column that an equality predicate of the query could
    /// lookup: both sides of equi-joins and the column of constant equalities.
    pub fn for_query(query: &JoinQuery) -> Result<Self, IndexError> {
        let mut columns = BTreeSet::new();
        for predicate in query.predicates() {
            match predicate.kind() {
                PredicateKind::EquiJoin { left, right } => {
                    columns.insert(*left);
                    columns.insert(*right);
                }
                PredicateKind::ConstantEquality { column, .. } => {
                    columns.insert(*column);
                }
                PredicateKind::Residual => {}
            }
        }
        let columns: Vec<ColumnRef> = columns.into_iter().collect();
        Self::build(query.tables(), &columns)
    }

    /// Registers an index built elsewhere
    pub fn insert(&mut self, column: ColumnRef, index: Arc<ColumnIndex>) {
        self.indexes.insert(column, index);
    }

    pub fn get(&self, column: ColumnRef) -> Option<&Arc<ColumnIndex>> {
        self.indexes.get(&column)
    }

    pub fn contains(&self, column: ColumnRef) -> bool {
        self.indexes.contains_key(&column)
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Column, CompareOp, Value};

    fn create_test_query() -> JoinQuery {
        let a = Table::new(
            "a",
            vec![
                Column::from_ints("id", vec![1, 2, 2]),
                Column::from_texts("tag", vec!["x", "y", "x"]),
            ],
        )
        .unwrap();
        let b = Table::new("b", vec![Column::from_ints("id", vec![2, 2, 3])]).unwrap();
        let mut query = JoinQuery::new(vec![Arc::new(a), Arc::new(b)]);
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        query
            .add_constant_filter(ColumnRef::new(0, 1), CompareOp::Eq, Value::from("x"))
            .unwrap();
        query
            .add_constant_filter(ColumnRef::new(1, 0), CompareOp::Lt, Value::Int(3))
            .unwrap();
        query
    }

    #[test]
    fn test_indexes_equality_columns_only() {
        let catalog = IndexCatalog::for_query(&create_test_query()).unwrap();
        assert_eq!(catalog.len(), 3);
        assert!(catalog.contains(ColumnRef::new(0, 0)));
        assert!(catalog.contains(ColumnRef::new(1, 0)));
        assert!(catalog.contains(ColumnRef::new(0, 1)));
    }

    #[test]
    fn test_unknown_columns_are_skipped() {
        let query = create_test_query();
        let catalog = IndexCatalog::build(query.tables(), &[ColumnRef::new(5, 0)]).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_built_index_answers_counts() {
        let catalog = IndexCatalog::for_query(&create_test_query()).unwrap();
        let index = catalog.get(ColumnRef::new(1, 0)).unwrap();
        assert_eq!(index.count_value(&Value::Int(2)), 2);
        assert_eq!(index.cardinality(), 3);
    }
}

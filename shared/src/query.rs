/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::predicate::{ColumnRef, CompareOp, Predicate};
use crate::table::Table;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Upper bound on the number of tables in one join
pub const MAX_TABLES: usize = 64;

/// Set of query tables as a bitmask
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableSet(u64);

/// Bit of a table, empty for indices beyond `MAX_TABLES`
#[inline]
fn bit(table: usize) -> u64 {
    if table < MAX_TABLES {
        1u64 << table
    } else {
        0
    }
}

impl TableSet {
    pub fn empty() -> Self {
        TableSet(0)
    }

    /// All tables `0..n`
    pub fn all(n: usize) -> Self {
        if n >= MAX_TABLES {
            TableSet(u64::MAX)
        } else {
            TableSet((1u64 << n) - 1)
        }
    }

    pub fn from_tables(tables: &[usize]) -> Self {
        tables.iter().fold(TableSet::empty(), |set, &t| set.with(t))
    }

    #[inline]
    pub fn contains(self, table: usize) -> bool {
        self.0 & bit(table) != 0
    }

    #[inline]
    pub fn insert(&mut self, table: usize) {
        self.0 |= bit(table);
    }

    #[inline]
    pub fn remove(&mut self, table: usize) {
        self.0 &= !bit(table);
    }

    #[inline]
    pub fn with(self, table: usize) -> Self {
        TableSet(self.0 | bit(table))
    }

    #[inline]
    pub fn union(self, other: TableSet) -> Self {
        TableSet(self.0 | other.0)
    }

    #[inline]
    pub fn intersects(self, other: TableSet) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn is_subset(self, other: TableSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Tables in ascending order
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..MAX_TABLES).filter(move |t| bits & (1u64 << t) != 0)
    }
}

impl fmt::Debug for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The bound join query: participating tables, compiled predicates, the
/// join-connectivity graph and the markers of materialized intermediates.
#[derive(Debug, Clone)]
pub struct JoinQuery {
    tables: Vec<Arc<Table>>,
    predicates: Vec<Predicate>,
    temporary: TableSet,
    neighbors: Vec<TableSet>,
}

impl JoinQuery {
    pub fn new(tables: Vec<Arc<Table>>) -> Self {
        let neighbors = vec![TableSet::empty(); tables.len()];
        Self {
            tables,
            predicates: Vec::new(),
            temporary: TableSet::empty(),
            neighbors,
        }
    }

    /// Adds a compiled predicate and records the connectivity it creates
    pub fn add_predicate(&mut self, predicate: Predicate) -> Result<usize, String> {
        if let Some(&t) = predicate.tables().iter().find(|&&t| t >= self.tables.len()) {
            return Err(format!(
                "Predicate '{}' references unknown table #{}",
                predicate.label(),
                t
            ));
        }
        if let Some(&t) = predicate.tables().iter().find(|&&t| t >= MAX_TABLES) {
            return Err(format!(
                "Predicate '{}' references table #{}, joins are limited to {} tables",
                predicate.label(),
                t,
                MAX_TABLES
            ));
        }
        if predicate.tables().len() > 1 {
            let set = TableSet::from_tables(predicate.tables());
            for &t in predicate.tables() {
                let mut others = set;
                others.remove(t);
                self.neighbors[t] = self.neighbors[t].union(others);
            }
        }
        self.predicates.push(predicate);
        Ok(self.predicates.len() - 1)
    }

    /// `left = right` across two tables
    pub fn add_equi_join(&mut self, left: ColumnRef, right: ColumnRef) -> Result<usize, String> {
        let predicate = Predicate::compare_columns(&self.tables, left, CompareOp::Eq, right)?;
        self.add_predicate(predicate)
    }

    pub fn add_column_comparison(
        &mut self,
        left: ColumnRef,
        op: CompareOp,
        right: ColumnRef,
    ) -> Result<usize, String> {
        let predicate = Predicate::compare_columns(&self.tables, left, op, right)?;
        self.add_predicate(predicate)
    }

    pub fn add_constant_filter(
        &mut self,
        column: ColumnRef,
        op: CompareOp,
        value: Value,
    ) -> Result<usize, String> {
        let predicate = Predicate::compare_constant(&self.tables, column, op, value)?;
        self.add_predicate(predicate)
    }

    /// Marks a table as an already-materialized intermediate result
    pub fn mark_temporary(&mut self, table: usize) {
        self.temporary.insert(table);
    }

    /// Resolves `table.column` names to a column reference
    pub fn column_ref(&self, table: &str, column: &str) -> Option<ColumnRef> {
        let t = self.tables.iter().position(|tb| tb.name == table)?;
        let c = self.tables[t].column_index(column)?;
        Some(ColumnRef::new(t, c))
    }

    pub fn nr_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn table(&self, table: usize) -> &Arc<Table> {
        &self.tables[table]
    }

    pub fn cardinality(&self, table: usize) -> usize {
        self.tables[table].cardinality()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn predicate(&self, id: usize) -> &Predicate {
        &self.predicates[id]
    }

    /// Ids of the single-table predicates on `table`
    pub fn unary_predicates(&self, table: usize) -> Vec<usize> {
        self.predicates
            .iter()
            .enumerate()
            .filter(|(_, p)| p.tables() == [table])
            .map(|(id, _)| id)
            .collect()
    }

    pub fn is_temporary(&self, table: usize) -> bool {
        self.temporary.contains(table)
    }

    pub fn temporary_tables(&self) -> TableSet {
        self.temporary
    }

    /// Tables sharing at least one predicate with `table`
    pub fn neighbors(&self, table: usize) -> TableSet {
        self.neighbors[table]
    }

    /// Whether `table` is connected by a predicate to any table in `joined`
    pub fn is_connected(&self, table: usize, joined: TableSet) -> bool {
        self.neighbors[table].intersects(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn create_test_query() -> JoinQuery {
        let tables = ["a", "b", "c"]
            .iter()
            .map(|name| Arc::new(Table::new(name, vec![Column::from_ints("id", vec![1, 2])]).unwrap()))
            .collect();
        let mut query = JoinQuery::new(tables);
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        query.add_constant_filter(ColumnRef::new(2, 0), CompareOp::Gt, Value::Int(1)).unwrap();
        query
    }

    #[test]
    fn test_connectivity_tracks_join_predicates() {
        let query = create_test_query();
        assert!(query.is_connected(1, TableSet::from_tables(&[0])));
        assert!(!query.is_connected(2, TableSet::from_tables(&[0, 1])));
        assert_eq!(query.neighbors(0), TableSet::from_tables(&[1]));
    }

    #[test]
    fn test_unary_predicates_per_table() {
        let query = create_test_query();
        assert_eq!(query.unary_predicates(2), vec![1]);
        assert!(query.unary_predicates(0).is_empty());
    }

    #[test]
    fn test_column_ref_by_name() {
        let query = create_test_query();
        assert_eq!(query.column_ref("b", "id"), Some(ColumnRef::new(1, 0)));
        assert_eq!(query.column_ref("z", "id"), None);
    }

    #[test]
    fn test_predicates_beyond_table_limit_are_rejected() {
        let tables = (0..MAX_TABLES + 1)
            .map(|t| Arc::new(Table::new(&format!("t{}", t), vec![Column::from_ints("id", vec![1])]).unwrap()))
            .collect();
        let mut query = JoinQuery::new(tables);
        assert!(query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(MAX_TABLES, 0)).is_err());
        assert!(query.predicates().is_empty());
        assert!(query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).is_ok());
        assert!(query.is_connected(1, TableSet::from_tables(&[0])));
        assert!(!TableSet::from_tables(&[MAX_TABLES]).contains(MAX_TABLES));
    }

    #[test]
    fn test_table_set_operations() {
        let mut set = TableSet::empty();
        set.insert(3);
        set.insert(0);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(set.len(), 2);
        assert!(TableSet::from_tables(&[0]).is_subset(set));
        set.remove(3);
        assert_eq!(set, TableSet::from_tables(&[0]));
        assert_eq!(TableSet::all(3).len(), 3);
    }
}

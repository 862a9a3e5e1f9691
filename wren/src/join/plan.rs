/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::JoinOrder;
use crate::indexing::{ColumnIndex, IndexCatalog, LookupCursor, RowLookup};
use log::debug;
use rustc_hash::FxHashMap;
use shared::{JoinQuery, PredicateKind, Table, TableSet, Value};
use std::sync::{Arc, PoisonError, RwLock};

/// Where an index lookup takes its key from
#[derive(Debug, Clone)]
pub enum LookupSource {
    /// The current cell of a column of an earlier table in the order
    Column {
        table: usize,
        column: usize,
        data: Arc<Table>,
    },
    /// A predicate constant
    Constant(Value),
}

/// Replaces a linear scan at one join position by index lookups. The
/// predicate the lookup stands for is still evaluated as the first check.
#[derive(Debug, Clone)]
pub struct IndexLookup {
    pub predicate: usize,
    pub source: LookupSource,
    pub index: Arc<ColumnIndex>,
}

impl IndexLookup {
    /// First matching row strictly after `after`, given the tuple indices
    /// of the tables joined so far
    #[inline]
    pub fn next(&self, tuple: &[u32], after: i64, cursor: &mut LookupCursor) -> RowLookup {
        match &self.source {
            LookupSource::Column { table, column, data } => {
                self.index.lookup_cell(&data.columns()[*column], tuple[*table] as usize, after, cursor)
            }
            LookupSource::Constant(value) => self.index.lookup_value(value, after, cursor),
        }
    }
}

/// How rows are produced and checked at one position of an order
#[derive(Debug, Clone)]
pub struct PositionPlan {
    pub table: usize,
    pub lookup: Option<IndexLookup>,
    /// Predicates that become evaluable once this table is joined,
    /// lookup predicate first
    pub checks: Vec<usize>,
}

/// The compiled form of one join order
#[derive(Debug)]
pub struct LeftDeepPlan {
    order: JoinOrder,
    positions: Vec<Arc<PositionPlan>>,
}

impl LeftDeepPlan {
    pub fn order(&self) -> &JoinOrder {
        &self.order
    }

    #[inline]
    pub fn position(&self, pos: usize) -> &PositionPlan {
        &self.positions[pos]
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Memoizes plans by order signature. Position plans only depend on the
/// set of tables joined before a position, so orders sharing a prefix also
/// share the compiled prefix.
///
/// Both maps are filled at most once per key; when two workers compile the
/// same key concurrently the first insertion wins and both use it.
#[derive(Debug)]
pub struct PlanCache {
    query: Arc<JoinQuery>,
    catalog: Arc<IndexCatalog>,
    /// Tables whose single-table predicates were applied by filtering
    masked: TableSet,
    /// The split table is partitioned by row between workers, so constant
    /// lookups there would ignore the partition
    partitioned: bool,
    positions: RwLock<FxHashMap<(TableSet, usize), Arc<PositionPlan>>>,
    plans: RwLock<FxHashMap<JoinOrder, Arc<LeftDeepPlan>>>,
}

impl PlanCache {
    pub fn new(
        query: Arc<JoinQuery>,
        catalog: Arc<IndexCatalog>,
        masked: TableSet,
        nr_workers: usize,
    ) -> Self {
        Self {
            query,
            catalog,
            masked,
            partitioned: nr_workers > 1,
            positions: RwLock::new(FxHashMap::default()),
            plans: RwLock::new(FxHashMap::default()),
        }
    }

    /// Returns the plan of an order, compiling it on first use
    pub fn plan(&self, order: &JoinOrder) -> Arc<LeftDeepPlan> {
        if let Some(plan) = self.plans.read().unwrap_or_else(PoisonError::into_inner).get(order) {
            return Arc::clone(plan);
        }

        let mut joined = TableSet::empty();
        let mut positions = Vec::with_capacity(order.len());
        for &table in order.tables() {
            positions.push(self.position_plan(joined, table));
            joined.insert(table);
        }
        let plan = Arc::new(LeftDeepPlan {
            order: order.clone(),
            positions,
        });

        let mut plans = self.plans.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(plans.entry(order.clone()).or_insert(plan))
    }

    pub fn nr_plans(&self) -> usize {
        self.plans.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn nr_position_plans(&self) -> usize {
        self.positions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn position_plan(&self, joined: TableSet, table: usize) -> Arc<PositionPlan> {
        let key = (joined, table);
        if let Some(plan) = self.positions.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Arc::clone(plan);
        }
        let plan = Arc::new(self.compile_position(joined, table));
        let mut positions = self.positions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(positions.entry(key).or_insert(plan))
    }

    fn compile_position(&self, joined: TableSet, table: usize) -> PositionPlan {
        let query = &self.query;
        let lookup = self
            .join_lookup(joined, table)
            .or_else(|| self.constant_lookup(joined, table));

        let with_table = joined.with(table);
        let mut checks = Vec::new();
        if let Some(lookup) = &lookup {
            checks.push(lookup.predicate);
        }
        for (id, predicate) in query.predicates().iter().enumerate() {
            if lookup.as_ref().is_some_and(|p| p.predicate == id) {
                continue;
            }
            if !predicate.references(table)
                || !TableSet::from_tables(predicate.tables()).is_subset(with_table)
            {
                continue;
            }
            if predicate.is_unary() && self.masked.contains(table) {
                continue;
            }
            checks.push(id);
        }

        debug!(
            "Compiled position for table {} after {:?}: lookup {:?}, {} checks",
            table,
            joined,
            lookup.as_ref().map(|p| p.predicate),
            checks.len()
        );
        PositionPlan { table, lookup, checks }
    }

    /// Equi-join whose other side is already joined and whose column on
    /// this table is indexed with a matching kind
    fn join_lookup(&self, joined: TableSet, table: usize) -> Option<IndexLookup> {
        if joined.is_empty() {
            return None;
        }
        for (id, predicate) in self.query.predicates().iter().enumerate() {
            let PredicateKind::EquiJoin { left, right } = predicate.kind() else {
                continue;
            };
            let (target, source) = if left.table == table && joined.contains(right.table) {
                (*left, *right)
            } else if right.table == table && joined.contains(left.table) {
                (*right, *left)
            } else {
                continue;
            };
            let Some(index) = self.catalog.get(target) else {
                continue;
            };
            let data = Arc::clone(self.query.table(source.table));
            let Some(source_column) = data.column(source.column) else {
                continue;
            };
            if source_column.kind() != index.kind() {
                continue;
            }
            return Some(IndexLookup {
                predicate: id,
                source: LookupSource::Column {
                    table: source.table,
                    column: source.column,
                    data,
                },
                index: Arc::clone(index),
            });
        }
        None
    }

    fn constant_lookup(&self, joined: TableSet, table: usize) -> Option<IndexLookup> {
        if joined.is_empty() && self.partitioned {
            return None;
        }
        self.query
            .predicates()
            .iter()
            .enumerate()
            .find_map(|(id, predicate)| match predicate.kind() {
                PredicateKind::ConstantEquality { column, value } if column.table == table => {
                    let index = self.catalog.get(*column)?;
                    index.accepts(value).then(|| IndexLookup {
                        predicate: id,
                        source: LookupSource::Constant(value.clone()),
                        index: Arc::clone(index),
                    })
                }
                _ => None,
            })
    }
}

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::tree::FilterState;
use crate::indexing::{ColumnIndex, LookupCursor, RowLookup};
use crate::utils::safe_ratio;
use rayon::prelude::*;
use shared::{JoinQuery, Value};
use std::sync::Arc;

/// Index access path of one constant-equality predicate
#[derive(Debug, Clone)]
pub struct FilterIndex {
    pub index: Arc<ColumnIndex>,
    pub value: Value,
}

/// Applies a table's single-table predicates in slices of rows.
///
/// All rows below `cursor` are decided; qualifying ones are kept in
/// ascending order. Each episode continues at the cursor with whatever
/// evaluation order and access path the tree picked.
#[derive(Debug)]
pub struct BudgetedFilter {
    query: Arc<JoinQuery>,
    table: usize,
    cardinality: u32,
    /// Global ids of the predicates, indexed by local id
    predicates: Vec<usize>,
    indexes: Vec<Option<FilterIndex>>,
    cursor: u32,
    rows: Vec<u32>,
    lookup: LookupCursor,
}

impl BudgetedFilter {
    pub fn new(
        query: Arc<JoinQuery>,
        table: usize,
        predicates: Vec<usize>,
        indexes: Vec<Option<FilterIndex>>,
    ) -> Self {
        let cardinality = u32::try_from(query.cardinality(table)).unwrap_or(u32::MAX);
        Self {
            query,
            table,
            cardinality,
            predicates,
            indexes,
            cursor: 0,
            rows: Vec::new(),
            lookup: LookupCursor::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.cardinality
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<u32> {
        self.rows
    }

    /// Decides up to `budget` more rows (index matches when an index drives
    /// the step). Returns the rows decided per unit of evaluation cost, or
    /// -1 when the state asks for an index this table does not have.
    pub fn execute_with_budget(&mut self, budget: usize, state: &FilterState) -> f64 {
        if self.is_finished() {
            return 1.0;
        }
        let budget = budget.max(1);
        let indexed = if state.conjunctive { None } else { state.indexed };
        let order = self.evaluation_order(state, indexed);
        let batches = state.parallel_batches.max(1);

        let start = self.cursor;
        let (accepted, evaluations) = match indexed {
            Some(p) => {
                let Some(access) = self.indexes.get(p).cloned().flatten() else {
                    return -1.0;
                };
                if batches > 1 {
                    self.index_parallel(&access, &order, budget, batches)
                } else {
                    self.index_sequential(&access, &order, budget)
                }
            }
            None => self.scan(&order, budget, batches),
        };
        self.rows.extend(accepted);

        let decided = (self.cursor - start) as f64;
        let cost = evaluations as f64 / batches as f64;
        safe_ratio(decided, decided + cost)
    }

    /// Local predicate ids to evaluate, without the one an index enforces
    fn evaluation_order(&self, state: &FilterState, indexed: Option<usize>) -> Vec<usize> {
        let mut order: Vec<usize> = state
            .order
            .iter()
            .copied()
            .filter(|&p| p < self.predicates.len() && Some(p) != indexed)
            .collect();
        for p in 0..self.predicates.len() {
            if Some(p) != indexed && !order.contains(&p) {
                order.push(p);
            }
        }
        order
    }

    fn index_sequential(&mut self, access: &FilterIndex, order: &[usize], budget: usize) -> (Vec<u32>, u64) {
        let mut accepted = Vec::new();
        let mut evaluations = 0;
        let mut tuple = vec![0u32; self.query.nr_tables()];
        let mut after = self.cursor as i64 - 1;
        for _ in 0..budget {
            match access.index.lookup_value(&access.value, after, &mut self.lookup) {
                RowLookup::Found(row) => {
                    let (ok, cost) = self.check(&mut tuple, row, order);
                    evaluations += cost;
                    if ok {
                        accepted.push(row);
                    }
                    after = row as i64;
                }
                RowLookup::Exhausted => {
                    self.cursor = self.cardinality;
                    return (accepted, evaluations);
                }
            }
        }
        self.cursor = (after + 1) as u32;
        (accepted, evaluations)
    }

    /// Each batch follows its own share of the index run. Matches beyond
    /// the smallest last row of a batch that used its whole quota are left
    /// for the next step, so the decided range stays contiguous.
    fn index_parallel(
        &mut self,
        access: &FilterIndex,
        order: &[usize],
        budget: usize,
        batches: usize,
    ) -> (Vec<u32>, u64) {
        let quota = budget.div_ceil(batches);
        let start = self.cursor as i64 - 1;
        let this = &*self;
        let shares: Vec<(Vec<u32>, bool)> = (0..batches)
            .into_par_iter()
            .map(|batch| {
                let mut rows = Vec::with_capacity(quota);
                let mut after = start;
                while rows.len() < quota {
                    match access
                        .index
                        .lookup_value_in_partition(&access.value, after, batch, batches)
                    {
                        RowLookup::Found(row) => {
                            rows.push(row);
                            after = row as i64;
                        }
                        RowLookup::Exhausted => return (rows, true),
                    }
                }
                (rows, false)
            })
            .collect();

        let bound = shares
            .iter()
            .filter(|(rows, exhausted)| !exhausted && !rows.is_empty())
            .filter_map(|(rows, _)| rows.last().map(|&row| row + 1))
            .min()
            .unwrap_or(this.cardinality);

        let mut candidates: Vec<u32> = shares
            .into_iter()
            .flat_map(|(rows, _)| rows)
            .filter(|&row| row < bound)
            .collect();
        candidates.sort_unstable();

        let checked: Vec<(u32, bool, u64)> = candidates
            .par_chunks(quota.max(1))
            .flat_map_iter(|chunk| {
                let mut tuple = vec![0u32; this.query.nr_tables()];
                chunk
                    .iter()
                    .map(|&row| {
                        let (ok, cost) = this.check(&mut tuple, row, order);
                        (row, ok, cost)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        self.cursor = bound;
        let evaluations = checked.iter().map(|&(_, _, cost)| cost).sum();
        let accepted = checked.into_iter().filter(|&(_, ok, _)| ok).map(|(row, _, _)| row).collect();
        (accepted, evaluations)
    }

    fn scan(&mut self, order: &[usize], budget: usize, batches: usize) -> (Vec<u32>, u64) {
        let start = self.cursor;
        let end = (start as u64 + budget as u64).min(self.cardinality as u64) as u32;
        let this = &*self;
        let evaluate_range = |from: u32, to: u32| {
            let mut tuple = vec![0u32; this.query.nr_tables()];
            let mut accepted = Vec::new();
            let mut evaluations = 0;
            for row in from..to {
                let (ok, cost) = this.check(&mut tuple, row, order);
                evaluations += cost;
                if ok {
                    accepted.push(row);
                }
            }
            (accepted, evaluations)
        };

        let result = if batches > 1 {
            let chunk = ((end - start) as usize).div_ceil(batches).max(1) as u32;
            let parts: Vec<(Vec<u32>, u64)> = (0..batches as u32)
                .into_par_iter()
                .map(|batch| {
                    let from = start.saturating_add(batch * chunk).min(end);
                    let to = from.saturating_add(chunk).min(end);
                    evaluate_range(from, to)
                })
                .collect();
            parts.into_iter().fold((Vec::new(), 0), |(mut rows, total), (part, cost)| {
                rows.extend(part);
                (rows, total + cost)
            })
        } else {
            evaluate_range(start, end)
        };
        self.cursor = end;
        result
    }

    /// Evaluates predicates in order until one fails, returns the verdict
    /// and the number of evaluations
    fn check(&self, tuple: &mut [u32], row: u32, order: &[usize]) -> (bool, u64) {
        tuple[self.table] = row;
        let mut evaluations = 0;
        for &p in order {
            evaluations += 1;
            if !self.query.predicate(self.predicates[p]).evaluate(tuple).is_true() {
                return (false, evaluations);
            }
        }
        (true, evaluations)
    }
}

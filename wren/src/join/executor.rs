/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::plan::{LeftDeepPlan, PlanCache};
use super::progress::{OffsetSnapshot, ProgressTracker, SharedProgress};
use super::{ExecutionState, JoinOrder, RowMask};
use crate::config::{JoinConfig, MAX_WORKERS};
use crate::indexing::{IndexCatalog, LookupCursor};
use crate::utils::{clamp_unit, safe_ratio};
use log::{debug, warn};
use rustc_hash::FxHashSet;
use shared::{JoinQuery, TableSet};
use std::sync::Arc;

/// Everything the executors of one query share read-only, plus the shared
/// progress offsets
#[derive(Debug)]
pub struct JoinContext {
    query: Arc<JoinQuery>,
    plans: PlanCache,
    progress: Arc<SharedProgress>,
    masks: Vec<Option<RowMask>>,
    budget: u64,
    input_weight: f64,
    output_weight: f64,
    has_empty_table: bool,
}

impl JoinContext {
    /// `masks[t]`, when present, marks the rows of table `t` that satisfy
    /// all of its single-table predicates. The worker count is clamped to
    /// `1..=MAX_WORKERS`.
    pub fn new(
        query: Arc<JoinQuery>,
        catalog: Arc<IndexCatalog>,
        mut masks: Vec<Option<RowMask>>,
        config: &JoinConfig,
    ) -> Self {
        let nr_tables = query.nr_tables();
        let nr_workers = config.nr_workers.clamp(1, MAX_WORKERS);
        if nr_workers != config.nr_workers {
            warn!(
                "Worker count {} out of range, using {}",
                config.nr_workers, nr_workers
            );
        }
        masks.resize(nr_tables, None);

        let cardinalities: Vec<u32> = (0..nr_tables)
            .map(|t| u32::try_from(query.cardinality(t)).unwrap_or(u32::MAX))
            .collect();
        let masked: Vec<usize> = (0..nr_tables).filter(|&t| masks[t].is_some()).collect();
        let has_empty_table = cardinalities.iter().any(|&c| c == 0);

        Self {
            plans: PlanCache::new(
                Arc::clone(&query),
                catalog,
                TableSet::from_tables(&masked),
                nr_workers,
            ),
            progress: Arc::new(SharedProgress::new(&cardinalities, nr_workers)),
            query,
            masks,
            budget: config.budget.max(1),
            input_weight: config.input_reward_weight,
            output_weight: config.output_reward_weight,
            has_empty_table,
        }
    }

    pub fn query(&self) -> &Arc<JoinQuery> {
        &self.query
    }

    pub fn plans(&self) -> &PlanCache {
        &self.plans
    }

    pub fn progress(&self) -> &Arc<SharedProgress> {
        &self.progress
    }

    pub fn nr_workers(&self) -> usize {
        self.progress.nr_workers()
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// A join with an empty input has an empty result
    pub fn has_empty_table(&self) -> bool {
        self.has_empty_table
    }
}

/// Result of one budgeted episode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionOutcome {
    /// Episode score in [0, 1]
    pub reward: f64,
    /// This worker's share of the order's split table is fully joined
    pub exhausted: bool,
    pub nr_results: u64,
    /// Predicate-evaluation steps spent
    pub steps: u64,
}

/// Runs join orders for one worker, one budgeted episode at a time
#[derive(Debug)]
pub struct JoinExecutor {
    context: Arc<JoinContext>,
    worker: usize,
    tracker: ProgressTracker,
    snapshot: OffsetSnapshot,
    cursors: Vec<LookupCursor>,
    results: FxHashSet<Vec<u32>>,
}

impl JoinExecutor {
    pub fn new(context: Arc<JoinContext>, worker: usize) -> Self {
        let nr_tables = context.query.nr_tables();
        let tracker = ProgressTracker::new(worker, Arc::clone(&context.progress));
        Self {
            context,
            worker,
            tracker,
            snapshot: OffsetSnapshot::default(),
            cursors: vec![LookupCursor::default(); nr_tables],
            results: FxHashSet::default(),
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn results(&self) -> &FxHashSet<Vec<u32>> {
        &self.results
    }

    pub fn into_results(self) -> FxHashSet<Vec<u32>> {
        self.results
    }

    /// Continues `order` from its best known state for at most `budget`
    /// steps, records where it stopped and scores the episode
    pub fn execute(&mut self, order: &JoinOrder) -> ExecutionOutcome {
        let context = Arc::clone(&self.context);
        if order.is_empty() || context.has_empty_table {
            return ExecutionOutcome {
                reward: 1.0,
                exhausted: true,
                nr_results: 0,
                steps: 0,
            };
        }

        let leftmost = order.leftmost();
        let start = self.tracker.continue_from(order);
        if start.finished || context.progress.is_class_finished(leftmost, self.worker) {
            return ExecutionOutcome {
                reward: 0.0,
                exhausted: true,
                nr_results: 0,
                steps: 0,
            };
        }

        let plan = context.plans.plan(order);
        context.progress.snapshot_into(&mut self.snapshot);

        let mut run = JoinRun {
            plan: &plan,
            order: order.tables(),
            query: &context.query,
            masks: &context.masks,
            cardinalities: context.progress.cardinalities(),
            offsets: &self.snapshot,
            cursors: &mut self.cursors,
            results: &mut self.results,
            tuple: start.tuple_indices.clone(),
            worker: self.worker as u32,
            nr_workers: context.nr_workers() as u32,
            nr_results: 0,
        };
        let initial = run.resume();
        let (join_index, steps) = run.advance(initial, context.budget);
        let nr_results = run.nr_results;
        let reward = if join_index < 0 {
            1.0
        } else {
            let weights = (context.input_weight, context.output_weight);
            run.reward(&start.tuple_indices, nr_results, context.budget, weights)
        };

        let end = ExecutionState {
            tuple_indices: run.tuple,
            join_index,
            finished: join_index < 0,
        };
        self.tracker.update_progress(order, &end);

        if end.finished {
            debug!(
                "Worker {} exhausted order {:?} after {} steps",
                self.worker,
                order.tables(),
                steps
            );
        }
        ExecutionOutcome {
            reward,
            exhausted: end.finished,
            nr_results,
            steps,
        }
    }
}

/// Nested-loop state of one episode
struct JoinRun<'a> {
    plan: &'a LeftDeepPlan,
    order: &'a [usize],
    query: &'a JoinQuery,
    masks: &'a [Option<RowMask>],
    cardinalities: &'a [u32],
    offsets: &'a OffsetSnapshot,
    cursors: &'a mut [LookupCursor],
    results: &'a mut FxHashSet<Vec<u32>>,
    tuple: Vec<u32>,
    worker: u32,
    nr_workers: u32,
    nr_results: u64,
}

impl JoinRun<'_> {
    /// Smallest row still worth visiting at a position
    #[inline]
    fn lower_bound(&self, pos: usize) -> u32 {
        let table = self.order[pos];
        if pos == 0 {
            self.offsets.class_offset(table, self.worker as usize)
        } else {
            self.offsets.min_offset(table)
        }
    }

    /// First row of this worker's class at or after `row`
    #[inline]
    fn align_to_class(&self, row: u32) -> u64 {
        let n = self.nr_workers as u64;
        let row = row as u64;
        row + (self.worker as u64 + n - row % n) % n
    }

    /// Moves the index at `pos` to the first candidate at or after its
    /// current value. Leaves the cardinality when there is none.
    fn seek(&mut self, pos: usize) {
        let plan = self.plan;
        let table = self.order[pos];
        let cardinality = self.cardinalities[table];
        let mut row = self.tuple[table].max(self.lower_bound(pos));
        if pos == 0 {
            row = self.align_to_class(row).min(cardinality as u64) as u32;
        }
        if row < cardinality {
            if let Some(lookup) = &plan.position(pos).lookup {
                row = lookup
                    .next(&self.tuple, row as i64 - 1, &mut self.cursors[table])
                    .or_cardinality(cardinality);
            }
        }
        self.tuple[table] = row.min(cardinality);
        if pos > 0 {
            self.skip_covered(pos);
        }
    }

    fn skip_covered(&mut self, pos: usize) {
        let plan = self.plan;
        let table = self.order[pos];
        let cardinality = self.cardinalities[table];
        while self.tuple[table] < cardinality && self.offsets.is_covered(table, self.tuple[table]) {
            let current = self.tuple[table];
            self.tuple[table] = match &plan.position(pos).lookup {
                Some(lookup) => lookup
                    .next(&self.tuple, current as i64, &mut self.cursors[table])
                    .or_cardinality(cardinality),
                None => current + 1,
            };
        }
    }

    /// Candidate after the current one at `pos`
    fn step(&mut self, pos: usize) {
        let plan = self.plan;
        let table = self.order[pos];
        let cardinality = self.cardinalities[table];
        let current = self.tuple[table];
        self.tuple[table] = match &plan.position(pos).lookup {
            Some(lookup) => lookup
                .next(&self.tuple, current as i64, &mut self.cursors[table])
                .or_cardinality(cardinality),
            None if pos == 0 => (current as u64 + self.nr_workers as u64).min(cardinality as u64) as u32,
            None => current.saturating_add(1).min(cardinality),
        };
        if pos > 0 {
            self.skip_covered(pos);
        }
    }

    /// Whether the row at `pos` can extend the current partial tuple
    fn evaluate(&self, pos: usize) -> bool {
        let table = self.order[pos];
        let row = self.tuple[table];
        if pos > 0 && self.offsets.is_covered(table, row) {
            return false;
        }
        if let Some(mask) = &self.masks[table] {
            if !mask.get(row as usize).copied().unwrap_or(false) {
                return false;
            }
        }
        self.plan
            .position(pos)
            .checks
            .iter()
            .all(|&id| self.query.predicate(id).evaluate(&self.tuple).is_true())
    }

    /// Advances to the next candidate at `pos`, backtracking while a
    /// position runs out. Deeper positions restart from zero. Returns the
    /// position to continue at, -1 once the split table is exhausted.
    fn propose_next(&mut self, mut pos: usize) -> i32 {
        loop {
            let table = self.order[pos];
            self.step(pos);
            if self.tuple[table] < self.cardinalities[table] {
                for &deeper in &self.order[pos + 1..] {
                    self.tuple[deeper] = 0;
                }
                return pos as i32;
            }
            if pos == 0 {
                return -1;
            }
            self.tuple[table] = 0;
            pos -= 1;
        }
    }

    /// Brings the saved tuple into the admissible range and finds the
    /// first position whose row still has to be checked. Free of charge.
    fn resume(&mut self) -> i32 {
        let last = self.order.len() - 1;
        for pos in 0..=last {
            let table = self.order[pos];
            let saved = self.tuple[table];
            self.seek(pos);
            if self.tuple[table] != saved {
                for &deeper in &self.order[pos + 1..] {
                    self.tuple[deeper] = 0;
                }
            }
            if self.tuple[table] >= self.cardinalities[table] {
                if pos == 0 {
                    return -1;
                }
                self.tuple[table] = 0;
                return self.propose_next(pos - 1);
            }
            if pos == last || !self.evaluate(pos) {
                return pos as i32;
            }
        }
        last as i32
    }

    /// Main nested loop. Returns the final join index and the steps spent.
    fn advance(&mut self, mut join_index: i32, budget: u64) -> (i32, u64) {
        let last = self.order.len() - 1;
        let mut steps = 0;
        while steps < budget && join_index >= 0 {
            let pos = join_index as usize;
            let table = self.order[pos];
            if self.tuple[table] >= self.cardinalities[table] {
                if pos == 0 {
                    join_index = -1;
                    break;
                }
                self.tuple[table] = 0;
                join_index = self.propose_next(pos - 1);
                continue;
            }

            steps += 1;
            if !self.evaluate(pos) {
                join_index = self.propose_next(pos);
            } else if pos == last {
                self.results.insert(self.tuple.clone());
                self.nr_results += 1;
                join_index = self.propose_next(pos);
            } else {
                join_index += 1;
                self.seek(pos + 1);
            }
        }
        if join_index < 0 {
            let leftmost = self.order[0];
            self.tuple[leftmost] = self.cardinalities[leftmost];
        }
        (join_index, steps)
    }

    /// Rows of this worker's class in `[from, to)`
    fn class_rows(&self, from: u32, to: u32) -> u64 {
        let below = |x: u32| {
            (x as u64 + self.nr_workers as u64 - 1 - self.worker as u64) / self.nr_workers as u64
        };
        below(to).saturating_sub(below(from))
    }

    /// Progress of the tuple since `start`, weighted per position by the
    /// share of the remaining search space a single index step represents,
    /// combined with the number of results produced.
    fn reward(&self, start: &[u32], nr_results: u64, budget: u64, weights: (f64, f64)) -> f64 {
        let mut progress = 0.0;
        let mut weight = 1.0;
        for (pos, &table) in self.order.iter().enumerate() {
            let cardinality = self.cardinalities[table];
            let offset = self.lower_bound(pos).min(cardinality);
            let from = start[table].clamp(offset, cardinality);
            let to = self.tuple[table].clamp(offset, cardinality);
            let (remaining, before, after) = if pos == 0 {
                (
                    self.class_rows(offset, cardinality),
                    self.class_rows(offset, from),
                    self.class_rows(offset, to),
                )
            } else {
                ((cardinality - offset) as u64, (from - offset) as u64, (to - offset) as u64)
            };
            if remaining == 0 {
                break;
            }
            weight /= remaining as f64;
            progress += (after as f64 - before as f64) * weight;
        }
        let input = clamp_unit(progress);
        let output = clamp_unit(safe_ratio(nr_results as f64, budget as f64));
        clamp_unit(weights.0 * input + weights.1 * output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Column, ColumnRef, Table};

    fn create_test_query() -> Arc<JoinQuery> {
        let a = Table::new("a", vec![Column::from_ints("x", vec![1, 2, 2])]).unwrap();
        let b = Table::new("b", vec![Column::from_ints("x", vec![2, 2, 3])]).unwrap();
        let mut query = JoinQuery::new(vec![Arc::new(a), Arc::new(b)]);
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        Arc::new(query)
    }

    fn create_context(query: &Arc<JoinQuery>, budget: u64, nr_workers: usize) -> Arc<JoinContext> {
        let catalog = Arc::new(IndexCatalog::for_query(query).unwrap());
        let config = JoinConfig::new().set_budget(budget).set_workers(nr_workers);
        Arc::new(JoinContext::new(Arc::clone(query), catalog, Vec::new(), &config))
    }

    fn expected() -> FxHashSet<Vec<u32>> {
        [vec![1, 0], vec![1, 1], vec![2, 0], vec![2, 1]].into_iter().collect()
    }

    #[test]
    fn test_single_episode_completes_small_join() {
        let query = create_test_query();
        let mut executor = JoinExecutor::new(create_context(&query, 1000, 1), 0);
        let outcome = executor.execute(&JoinOrder::new(vec![0, 1]));
        assert!(outcome.exhausted);
        assert_eq!(outcome.reward, 1.0);
        assert_eq!(executor.results(), &expected());
    }

    #[test]
    fn test_tiny_budget_resumes_without_loss() {
        let query = create_test_query();
        for order in [vec![0, 1], vec![1, 0]] {
            let order = JoinOrder::new(order);
            let mut executor = JoinExecutor::new(create_context(&query, 1, 1), 0);
            let mut episodes = 0;
            loop {
                let outcome = executor.execute(&order);
                assert!((0.0..=1.0).contains(&outcome.reward));
                assert!(outcome.steps <= 1);
                episodes += 1;
                if outcome.exhausted {
                    break;
                }
                assert!(episodes < 100);
            }
            assert_eq!(executor.results(), &expected());
        }
    }

    #[test]
    fn test_switching_orders_keeps_every_result() {
        let query = create_test_query();
        let mut executor = JoinExecutor::new(create_context(&query, 2, 1), 0);
        let orders = [JoinOrder::new(vec![0, 1]), JoinOrder::new(vec![1, 0])];
        for i in 0..100 {
            if executor.execute(&orders[i % 2]).exhausted {
                break;
            }
        }
        assert_eq!(executor.results(), &expected());
    }

    #[test]
    fn test_workers_split_the_leftmost_table() {
        let query = create_test_query();
        let context = create_context(&query, 1000, 2);
        let mut all = FxHashSet::default();
        for worker in 0..2 {
            let mut executor = JoinExecutor::new(Arc::clone(&context), worker);
            assert!(executor.execute(&JoinOrder::new(vec![0, 1])).exhausted);
            all.extend(executor.into_results());
        }
        assert_eq!(all, expected());
        assert!(context.progress().is_finished());
    }

    #[test]
    fn test_worker_count_beyond_limit_is_clamped() {
        let query = create_test_query();
        let context = create_context(&query, 1000, MAX_WORKERS + 1);
        assert_eq!(context.nr_workers(), MAX_WORKERS);
        let mut all = FxHashSet::default();
        for worker in 0..context.nr_workers() {
            let mut executor = JoinExecutor::new(Arc::clone(&context), worker);
            assert!(executor.execute(&JoinOrder::new(vec![0, 1])).exhausted);
            all.extend(executor.into_results());
        }
        assert_eq!(all, expected());
        assert!(context.progress().is_finished());
    }

    #[test]
    fn test_empty_table_finishes_immediately() {
        let a = Table::new("a", vec![Column::from_ints("x", vec![1])]).unwrap();
        let b = Table::new("b", vec![Column::from_ints("x", vec![])]).unwrap();
        let query = Arc::new(JoinQuery::new(vec![Arc::new(a), Arc::new(b)]));
        let mut executor = JoinExecutor::new(create_context(&query, 10, 1), 0);
        let outcome = executor.execute(&JoinOrder::new(vec![0, 1]));
        assert!(outcome.exhausted);
        assert_eq!(outcome.reward, 1.0);
        assert!(executor.results().is_empty());
    }

    #[test]
    fn test_mask_hides_rows() {
        let query = create_test_query();
        let catalog = Arc::new(IndexCatalog::for_query(&query).unwrap());
        let mask: RowMask = Arc::from(vec![true, false, true]);
        let context = Arc::new(JoinContext::new(
            Arc::clone(&query),
            catalog,
            vec![Some(mask), None],
            &JoinConfig::new().set_workers(1),
        ));
        let mut executor = JoinExecutor::new(context, 0);
        executor.execute(&JoinOrder::new(vec![1, 0]));
        let expected: FxHashSet<Vec<u32>> = [vec![2, 0], vec![2, 1]].into_iter().collect();
        assert_eq!(executor.results(), &expected);
    }
}

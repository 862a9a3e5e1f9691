/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Budgeted, resumable execution of left-deep join orders.
//!
//! ## Architecture
//!
//! - `plan`: compiles a join order into per-position index lookups and
//!   residual checks, cached by order signature and by order prefix
//! - `progress`: per-worker resumption states plus the offsets shared by
//!   all workers, which record which rows of each table are fully joined
//! - `executor`: runs one order for a fixed number of predicate-evaluation
//!   steps, emits result tuples and scores the episode
//!
//! An order is executed as nested loops over tuple indices. Every episode
//! resumes where the previous episode of the same order (or of an order
//! sharing a prefix) stopped, so no combination is produced twice by one
//! worker and none is lost when control goes back to the search layer.

pub mod executor;
pub mod plan;
pub mod progress;

pub use executor::{ExecutionOutcome, JoinContext, JoinExecutor};
pub use plan::{IndexLookup, LeftDeepPlan, PlanCache, PositionPlan, LookupSource};
pub use progress::{OffsetSnapshot, ProgressTracker, SharedProgress};

use std::cmp::Ordering;
use std::sync::Arc;

/// Rows of a table that passed its single-table predicates
pub type RowMask = Arc<[bool]>;

/// An immutable permutation of query tables. The order itself is its
/// signature in the plan cache and the progress tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinOrder(Vec<usize>);

impl JoinOrder {
    pub fn new(tables: Vec<usize>) -> Self {
        JoinOrder(tables)
    }

    pub fn tables(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The outermost loop, which is also the table split between workers
    pub fn leftmost(&self) -> usize {
        self.0[0]
    }

    pub fn position_of(&self, table: usize) -> Option<usize> {
        self.0.iter().position(|&t| t == table)
    }
}

impl From<Vec<usize>> for JoinOrder {
    fn from(tables: Vec<usize>) -> Self {
        JoinOrder(tables)
    }
}

/// Exact resumption point of a budgeted run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    /// Current row index per query table
    pub tuple_indices: Vec<u32>,
    /// Deepest join position reached, -1 once the order is exhausted
    pub join_index: i32,
    pub finished: bool,
}

impl ExecutionState {
    pub fn new(nr_tables: usize) -> Self {
        Self {
            tuple_indices: vec![0; nr_tables],
            join_index: 0,
            finished: false,
        }
    }

    /// Whether this state lies strictly after `other` when both are read
    /// as nested-loop positions of `order`
    pub fn is_ahead_of(&self, other: &ExecutionState, order: &JoinOrder) -> bool {
        if self.finished != other.finished {
            return self.finished;
        }
        let mine = order.tables().iter().map(|&t| self.tuple_indices[t]);
        let theirs = order.tables().iter().map(|&t| other.tuple_indices[t]);
        mine.cmp(theirs) == Ordering::Greater
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ahead_follows_order_positions() {
        let order = JoinOrder::new(vec![1, 0]);
        let mut a = ExecutionState::new(2);
        let mut b = ExecutionState::new(2);
        a.tuple_indices = vec![5, 1];
        b.tuple_indices = vec![0, 2];
        // Table 1 is the outer loop, so b is further along
        assert!(b.is_ahead_of(&a, &order));
        assert!(!a.is_ahead_of(&b, &order));
        assert!(!a.is_ahead_of(&a, &order));
    }

    #[test]
    fn test_finished_state_is_ahead() {
        let order = JoinOrder::new(vec![0]);
        let mut done = ExecutionState::new(1);
        done.finished = true;
        let mut busy = ExecutionState::new(1);
        busy.tuple_indices = vec![100];
        assert!(done.is_ahead_of(&busy, &order));
        assert!(!busy.is_ahead_of(&done, &order));
    }
}

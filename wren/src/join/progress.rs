/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{ExecutionState, JoinOrder};
use crate::config::MAX_WORKERS;
use log::debug;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Offsets published by all workers.
///
/// Rows of a table are split into `nr_workers` classes by `row % nr_workers`.
/// The offset of (table, class) is the first row of that class not yet
/// joined completely: every result containing a smaller row of the class
/// has been emitted by the worker owning the class. Offsets only grow.
#[derive(Debug)]
pub struct SharedProgress {
    nr_workers: usize,
    cardinalities: Vec<u32>,
    offsets: Vec<AtomicU32>,
    /// Per table, bit `c` is set once class `c` is exhausted
    finished: Vec<AtomicU64>,
}

impl SharedProgress {
    /// `nr_workers` is clamped to `1..=MAX_WORKERS`, the width of the
    /// finished masks
    pub fn new(cardinalities: &[u32], nr_workers: usize) -> Self {
        let nr_workers = nr_workers.clamp(1, MAX_WORKERS);
        let mut offsets = Vec::with_capacity(cardinalities.len() * nr_workers);
        let mut finished = Vec::with_capacity(cardinalities.len());
        for &cardinality in cardinalities {
            let mut mask = 0u64;
            for class in 0..nr_workers {
                // Classes with no rows at all start out exhausted
                if class as u32 >= cardinality {
                    offsets.push(AtomicU32::new(cardinality));
                    mask |= 1u64 << class;
                } else {
                    offsets.push(AtomicU32::new(0));
                }
            }
            finished.push(AtomicU64::new(mask));
        }
        Self {
            nr_workers,
            cardinalities: cardinalities.to_vec(),
            offsets,
            finished,
        }
    }

    pub fn nr_workers(&self) -> usize {
        self.nr_workers
    }

    pub fn nr_tables(&self) -> usize {
        self.cardinalities.len()
    }

    pub fn cardinality(&self, table: usize) -> u32 {
        self.cardinalities[table]
    }

    pub fn cardinalities(&self) -> &[u32] {
        &self.cardinalities
    }

    pub fn offset(&self, table: usize, class: usize) -> u32 {
        self.offsets[table * self.nr_workers + class].load(Ordering::Acquire)
    }

    /// Raises the offset of a class, returns true if this call exhausted it
    pub fn publish(&self, table: usize, class: usize, offset: u32) -> bool {
        debug_assert!(class < self.nr_workers);
        let cardinality = self.cardinalities[table];
        let offset = offset.min(cardinality);
        self.offsets[table * self.nr_workers + class].fetch_max(offset, Ordering::AcqRel);
        if offset < cardinality {
            return false;
        }
        let bit = 1u64 << class;
        let before = self.finished[table].fetch_or(bit, Ordering::AcqRel);
        if before & bit == 0 {
            debug!("Class {} of table {} is exhausted", class, table);
            true
        } else {
            false
        }
    }

    pub fn is_class_finished(&self, table: usize, class: usize) -> bool {
        debug_assert!(class < self.nr_workers);
        self.finished[table].load(Ordering::Acquire) & (1u64 << class) != 0
    }

    pub fn is_table_finished(&self, table: usize) -> bool {
        let all = if self.nr_workers == MAX_WORKERS { u64::MAX } else { (1u64 << self.nr_workers) - 1 };
        self.finished[table].load(Ordering::Acquire) & all == all
    }

    /// A table joined completely against all others means the result is
    /// complete
    pub fn is_finished(&self) -> bool {
        (0..self.cardinalities.len()).any(|table| self.is_table_finished(table))
    }

    pub fn snapshot(&self) -> OffsetSnapshot {
        let mut snapshot = OffsetSnapshot::default();
        self.snapshot_into(&mut snapshot);
        snapshot
    }

    /// Copies the current offsets into a reusable buffer
    pub fn snapshot_into(&self, snapshot: &mut OffsetSnapshot) {
        snapshot.nr_workers = self.nr_workers;
        snapshot.offsets.clear();
        snapshot
            .offsets
            .extend(self.offsets.iter().map(|offset| offset.load(Ordering::Acquire)));
        snapshot.min_offsets.clear();
        snapshot.min_offsets.extend(
            snapshot
                .offsets
                .chunks(self.nr_workers)
                .map(|classes| classes.iter().copied().min().unwrap_or(0)),
        );
    }
}

/// Offsets as seen at the start of an episode
#[derive(Debug, Clone, Default)]
pub struct OffsetSnapshot {
    nr_workers: usize,
    offsets: Vec<u32>,
    min_offsets: Vec<u32>,
}

impl OffsetSnapshot {
    #[inline]
    pub fn class_offset(&self, table: usize, class: usize) -> u32 {
        self.offsets[table * self.nr_workers + class]
    }

    /// All rows below this bound are joined completely, whatever their class
    #[inline]
    pub fn min_offset(&self, table: usize) -> u32 {
        self.min_offsets[table]
    }

    /// Whether every result containing this row was already emitted
    #[inline]
    pub fn is_covered(&self, table: usize, row: u32) -> bool {
        row < self.min_offsets[table]
            || row < self.offsets[table * self.nr_workers + row as usize % self.nr_workers]
    }
}

/// Per-worker memory of where each join order stopped.
///
/// Besides the full state per order, the tuple indices reached on every
/// order prefix are kept so that an order seen for the first time can
/// start from the furthest point reached by any order sharing its prefix.
#[derive(Debug)]
pub struct ProgressTracker {
    worker: usize,
    shared: Arc<SharedProgress>,
    states: FxHashMap<JoinOrder, ExecutionState>,
    prefixes: FxHashMap<Vec<usize>, Vec<u32>>,
}

impl ProgressTracker {
    pub fn new(worker: usize, shared: Arc<SharedProgress>) -> Self {
        Self {
            worker,
            shared,
            states: FxHashMap::default(),
            prefixes: FxHashMap::default(),
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn shared(&self) -> &Arc<SharedProgress> {
        &self.shared
    }

    pub fn nr_states(&self) -> usize {
        self.states.len()
    }

    /// The most advanced known state from which `order` can resume
    pub fn continue_from(&self, order: &JoinOrder) -> ExecutionState {
        let nr_tables = self.shared.nr_tables();
        let mut best = self
            .states
            .get(order)
            .cloned()
            .unwrap_or_else(|| ExecutionState::new(nr_tables));

        let tables = order.tables();
        for len in (1..tables.len()).rev() {
            let Some(indices) = self.prefixes.get(&tables[..len]) else {
                continue;
            };
            let mut candidate = ExecutionState::new(nr_tables);
            for (&table, &row) in tables[..len].iter().zip(indices) {
                candidate.tuple_indices[table] = row;
            }
            candidate.join_index = len as i32 - 1;
            candidate.finished = indices[0] >= self.shared.cardinality(tables[0]);
            if candidate.finished {
                candidate.join_index = -1;
            }
            if candidate.is_ahead_of(&best, order) {
                best = candidate;
            }
        }
        best
    }

    /// Records the state reached by an episode of `order` and publishes the
    /// offset of its split table
    pub fn update_progress(&mut self, order: &JoinOrder, state: &ExecutionState) {
        match self.states.get_mut(order) {
            Some(existing) => {
                if !existing.is_ahead_of(state, order) {
                    *existing = state.clone();
                }
            }
            None => {
                self.states.insert(order.clone(), state.clone());
            }
        }

        let tables = order.tables();
        let reached: Vec<u32> = tables.iter().map(|&t| state.tuple_indices[t]).collect();
        for len in 1..tables.len() {
            let indices = &reached[..len];
            match self.prefixes.get_mut(&tables[..len]) {
                Some(existing) => {
                    if indices > existing.as_slice() {
                        existing.copy_from_slice(indices);
                    }
                }
                None => {
                    self.prefixes.insert(tables[..len].to_vec(), indices.to_vec());
                }
            }
        }

        let leftmost = order.leftmost();
        let offset = if state.finished {
            self.shared.cardinality(leftmost)
        } else {
            state.tuple_indices[leftmost]
        };
        self.shared.publish(leftmost, self.worker, offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_tables_start_with_finished_classes() {
        let progress = SharedProgress::new(&[2, 5], 4);
        assert!(!progress.is_class_finished(0, 1));
        assert!(progress.is_class_finished(0, 2));
        assert!(progress.is_class_finished(0, 3));
        assert_eq!(progress.offset(0, 3), 2);
        assert!(!progress.is_finished());
    }

    #[test]
    fn test_worker_count_is_clamped_to_mask_width() {
        let progress = SharedProgress::new(&[100, 3], MAX_WORKERS + 1);
        assert_eq!(progress.nr_workers(), MAX_WORKERS);
        assert!(!progress.is_class_finished(0, 0));
        assert!(!progress.is_class_finished(0, MAX_WORKERS - 1));
        assert!(progress.is_class_finished(1, MAX_WORKERS - 1));
        assert!(!progress.is_class_finished(1, 0));
        for class in 0..MAX_WORKERS {
            progress.publish(0, class, 100);
        }
        assert!(progress.is_table_finished(0));
    }

    #[test]
    fn test_offsets_only_grow() {
        let progress = SharedProgress::new(&[10], 2);
        progress.publish(0, 1, 7);
        progress.publish(0, 1, 3);
        assert_eq!(progress.offset(0, 1), 7);
        assert!(!progress.publish(0, 0, 9));
        assert!(progress.publish(0, 0, 10));
        assert!(!progress.publish(0, 0, 12));
        assert!(!progress.is_finished());
        progress.publish(0, 1, 10);
        assert!(progress.is_finished());
    }

    #[test]
    fn test_snapshot_covers_rows_per_class() {
        let progress = SharedProgress::new(&[10], 2);
        progress.publish(0, 0, 6);
        progress.publish(0, 1, 3);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.min_offset(0), 3);
        assert!(snapshot.is_covered(0, 4));
        assert!(!snapshot.is_covered(0, 5));
        assert!(!snapshot.is_covered(0, 6));
        assert!(snapshot.is_covered(0, 1));
    }

    #[test]
    fn test_state_is_kept_when_behind() {
        let shared = Arc::new(SharedProgress::new(&[5, 5], 1));
        let mut tracker = ProgressTracker::new(0, Arc::clone(&shared));
        let order = JoinOrder::new(vec![0, 1]);

        let mut ahead = ExecutionState::new(2);
        ahead.tuple_indices = vec![3, 1];
        tracker.update_progress(&order, &ahead);
        let mut behind = ExecutionState::new(2);
        behind.tuple_indices = vec![2, 4];
        tracker.update_progress(&order, &behind);

        assert_eq!(tracker.continue_from(&order).tuple_indices, vec![3, 1]);
        assert_eq!(shared.offset(0, 0), 3);
    }

    #[test]
    fn test_new_order_resumes_from_shared_prefix() {
        let shared = Arc::new(SharedProgress::new(&[5, 5, 5], 1));
        let mut tracker = ProgressTracker::new(0, shared);

        let mut state = ExecutionState::new(3);
        state.tuple_indices = vec![2, 3, 4];
        tracker.update_progress(&JoinOrder::new(vec![0, 1, 2]), &state);

        let resumed = tracker.continue_from(&JoinOrder::new(vec![0, 1, 2]));
        assert_eq!(resumed.tuple_indices, vec![2, 3, 4]);

        // Only the one-table prefix [0] is shared
        let other = tracker.continue_from(&JoinOrder::new(vec![0, 2, 1]));
        assert_eq!(other.tuple_indices, vec![2, 0, 0]);

        let unrelated = tracker.continue_from(&JoinOrder::new(vec![1, 0, 2]));
        assert_eq!(unrelated.tuple_indices, vec![0, 0, 0]);
    }
}

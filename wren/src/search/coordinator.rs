/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::constraints::{partition_constraints, SearchConstraints};
use super::uct::{Episode, SearchTree};
use crate::config::JoinConfig;
use crate::error::{Result, WrenError};
use crate::join::{JoinContext, JoinExecutor, JoinOrder};
use crate::utils::deadline_passed;
use crossbeam::scope;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use shared::TableSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Result rows of a join plus search diagnostics
#[derive(Debug, Clone)]
pub struct JoinResult {
    /// One row index per query table for every qualifying combination
    pub tuples: FxHashSet<Vec<u32>>,
    /// Most visited order of the search tree
    pub best_order: JoinOrder,
    /// Per table, how often it was chosen as first table
    pub table_visits: Vec<u64>,
    pub episodes: u64,
    pub episodes_per_worker: Vec<u64>,
    pub tree_nodes: usize,
    /// False when a stop request, the deadline or the episode limit ended
    /// the search before the result was complete
    pub finished: bool,
}

impl JoinResult {
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Result tuples in ascending order
    pub fn sorted_tuples(&self) -> Vec<Vec<u32>> {
        let mut tuples: Vec<Vec<u32>> = self.tuples.iter().cloned().collect();
        tuples.sort_unstable();
        tuples
    }
}

/// Runs a fixed pool of workers over one shared search tree until the join
/// result is complete
pub struct SearchCoordinator {
    context: Arc<JoinContext>,
    tree: SearchTree,
    config: JoinConfig,
    stop: Arc<AtomicBool>,
    episodes: AtomicU64,
}

impl SearchCoordinator {
    pub fn new(context: Arc<JoinContext>, config: &JoinConfig) -> Self {
        Self {
            tree: SearchTree::new(Arc::clone(context.query()), config),
            context,
            config: config.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            episodes: AtomicU64::new(0),
        }
    }

    /// Flag that halts all workers after their current episode
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn tree(&self) -> &SearchTree {
        &self.tree
    }

    pub fn run(&self) -> Result<JoinResult> {
        let nr_workers = self.context.nr_workers();
        let deadline = self.config.timeout().map(|timeout| Instant::now() + timeout);
        let start = Instant::now();

        let outputs = scope(|s| {
            let handles: Vec<_> = (0..nr_workers)
                .map(|worker| s.spawn(move |_| self.run_worker(worker, deadline)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<std::thread::Result<Vec<_>>>()
        })
        .map_err(|_| WrenError::WorkerPanicked)?
        .map_err(|_| WrenError::WorkerPanicked)?;

        let mut tuples = FxHashSet::default();
        let mut episodes_per_worker = Vec::with_capacity(nr_workers);
        for (rows, episodes) in outputs {
            tuples.extend(rows);
            episodes_per_worker.push(episodes);
        }
        let finished = self.context.has_empty_table() || self.context.progress().is_finished();

        info!(
            "Join finished={} with {} tuples after {} episodes in {:?}",
            finished,
            tuples.len(),
            episodes_per_worker.iter().sum::<u64>(),
            start.elapsed()
        );
        Ok(JoinResult {
            tuples,
            best_order: self.tree.best_order(),
            table_visits: self.tree.root_visits(),
            episodes: episodes_per_worker.iter().sum(),
            episodes_per_worker,
            tree_nodes: self.tree.node_count(),
            finished,
        })
    }

    fn should_stop(&self, deadline: Option<Instant>) -> bool {
        self.stop.load(Ordering::Relaxed)
            || deadline_passed(deadline)
            || self.context.progress().is_finished()
    }

    /// Claims one episode from the global limit
    fn claim_episode(&self) -> bool {
        let claimed = self.episodes.fetch_add(1, Ordering::Relaxed);
        self.config.max_episodes.map_or(true, |max| claimed < max)
    }

    fn run_worker(&self, worker: usize, deadline: Option<Instant>) -> (FxHashSet<Vec<u32>>, u64) {
        let mut executor = JoinExecutor::new(Arc::clone(&self.context), worker);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
            None => StdRng::from_entropy(),
        };
        let nr_workers = self.context.nr_workers();
        let partition = self.config.partition_search_space && nr_workers > 1;

        let mut constraints = SearchConstraints::default();
        let mut next_forget = self.config.forget_interval.max(1);
        let mut episodes = 0u64;

        while !self.should_stop(deadline) && self.claim_episode() {
            episodes += 1;
            if !self.run_episode(&mut executor, &mut rng, &mut constraints) {
                break;
            }

            if self.config.forget && episodes >= next_forget {
                self.tree.forget(worker);
                next_forget = next_forget.saturating_mul(10);
                if partition {
                    constraints = partition_constraints(&self.tree, nr_workers)
                        .swap_remove(worker);
                }
            }
        }

        debug!("Worker {} stops after {} episodes", worker, episodes);
        (executor.into_results(), episodes)
    }

    /// Samples, executes and backs up one join order. Constraints that
    /// leave no admissible order are dropped; returns false once the
    /// worker has no admissible order even without them.
    fn run_episode<R: Rng>(
        &self,
        executor: &mut JoinExecutor,
        rng: &mut R,
        constraints: &mut SearchConstraints,
    ) -> bool {
        let worker = executor.worker();
        let progress = self.context.progress();
        let exhausted: Vec<usize> = (0..progress.nr_tables())
            .filter(|&t| progress.is_class_finished(t, worker))
            .collect();
        let episode = Episode {
            worker,
            constraints: &*constraints,
            exhausted_roots: TableSet::from_tables(&exhausted),
        };
        let reward = self.tree.sample(&episode, rng, &mut |order: &JoinOrder| {
            executor.execute(order).reward
        });
        if reward >= 0.0 {
            return true;
        }
        if constraints.is_empty() {
            debug!("Worker {} has no admissible join order left", worker);
            return false;
        }
        debug!("Worker {} drops its search constraints", worker);
        *constraints = SearchConstraints::default();
        true
    }
}

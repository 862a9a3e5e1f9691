/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::executor::BudgetedFilter;
use crate::config::FilterConfig;
use rand::seq::SliceRandom;
use rand::Rng;

/// What a filter tree node can decide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Evaluate this predicate next
    Evaluate(usize),
    /// Produce candidate rows from the index of this predicate's constant
    IndexOn(usize),
    /// Give up on ordering and evaluate all predicates in query order
    Conjunctive,
    /// Split each step into this many row-parallel batches
    Batches(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Root,
    Branching,
    Index,
    RowParallel,
    Leaf,
}

/// Choices accumulated along one sampled path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    /// Local predicate ids in evaluation order
    pub order: Vec<usize>,
    /// Predicate whose index produces the candidate rows
    pub indexed: Option<usize>,
    pub conjunctive: bool,
    /// 0 for a sequential step
    pub parallel_batches: usize,
}

#[derive(Debug)]
pub struct FilterNode {
    kind: NodeKind,
    created_in: u64,
    chosen: Vec<usize>,
    actions: Vec<FilterAction>,
    children: Vec<Option<usize>>,
    tries: Vec<u64>,
    rewards: Vec<f64>,
    visits: u64,
    untried: Vec<usize>,
    /// Actions whose execution reported that they cannot apply
    pruned: Vec<bool>,
}

impl FilterNode {
    fn new(kind: NodeKind, created_in: u64, chosen: Vec<usize>, actions: Vec<FilterAction>) -> Self {
        let n = actions.len();
        Self {
            kind,
            created_in,
            chosen,
            children: vec![None; n],
            tries: vec![0; n],
            rewards: vec![0.0; n],
            visits: 0,
            untried: (0..n).collect(),
            pruned: vec![false; n],
            actions,
        }
    }

    pub fn actions(&self) -> &[FilterAction] {
        &self.actions
    }

    pub fn visits(&self) -> u64 {
        self.visits
    }
}

/// Single-threaded UCT tree over evaluation orders of a table's
/// single-table predicates
#[derive(Debug)]
pub struct FilterTree {
    nodes: Vec<FilterNode>,
    nr_predicates: usize,
    config: FilterConfig,
}

impl FilterTree {
    /// `indexed[p]` tells whether predicate `p` can drive index access
    pub fn new(indexed: &[bool], config: &FilterConfig) -> Self {
        let nr_predicates = indexed.len();
        let mut actions: Vec<FilterAction> = (0..nr_predicates).map(FilterAction::Evaluate).collect();
        actions.extend(
            indexed
                .iter()
                .enumerate()
                .filter(|(_, &has_index)| has_index)
                .map(|(p, _)| FilterAction::IndexOn(p)),
        );
        actions.push(FilterAction::Conjunctive);

        Self {
            // The root may expand in the first episode
            nodes: vec![FilterNode::new(NodeKind::Root, 0, Vec::new(), actions)],
            nr_predicates,
            config: config.clone(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> &FilterNode {
        &self.nodes[0]
    }

    /// Runs one episode, `episode` starting at 1
    pub fn sample<R: Rng>(&mut self, episode: u64, rng: &mut R, filter: &mut BudgetedFilter) -> f64 {
        let mut state = FilterState::default();
        self.sample_node(0, episode, &mut state, rng, filter)
    }

    fn sample_node<R: Rng>(
        &mut self,
        id: usize,
        episode: u64,
        state: &mut FilterState,
        rng: &mut R,
        filter: &mut BudgetedFilter,
    ) -> f64 {
        if self.nodes[id].kind == NodeKind::Leaf {
            return self.execute(state, filter);
        }
        let can_expand = self.nodes[id].created_in != episode;

        loop {
            let Some(action) = self.select_action(id, rng) else {
                return -1.0;
            };
            let mut branch = state.clone();
            apply(self.nodes[id].actions[action], &mut branch, self.nr_predicates);

            if self.nodes[id].children[action].is_none() && can_expand {
                let child = self.create_child(id, action, episode);
                self.nodes.push(child);
                let child_id = self.nodes.len() - 1;
                self.nodes[id].children[action] = Some(child_id);
            }
            let reward = match self.nodes[id].children[action] {
                Some(child) => self.sample_node(child, episode, &mut branch, rng, filter),
                None => self.playout(id, &mut branch, rng, filter),
            };

            if reward < 0.0 {
                self.nodes[id].pruned[action] = true;
                continue;
            }
            let node = &mut self.nodes[id];
            node.visits += 1;
            node.tries[action] += 1;
            node.rewards[action] += reward;
            *state = branch;
            return reward;
        }
    }

    fn create_child(&self, parent: usize, action: usize, episode: u64) -> FilterNode {
        let node = &self.nodes[parent];
        let (predicate, kind) = match node.actions[action] {
            FilterAction::Evaluate(p) => (p, NodeKind::Branching),
            FilterAction::IndexOn(p) => (p, NodeKind::Index),
            FilterAction::Conjunctive | FilterAction::Batches(_) => {
                return FilterNode::new(NodeKind::Leaf, episode, node.chosen.clone(), Vec::new());
            }
        };

        let mut chosen = node.chosen.clone();
        chosen.push(predicate);
        let unchosen: Vec<usize> = (0..self.nr_predicates).filter(|p| !chosen.contains(p)).collect();
        if unchosen.is_empty() {
            return if self.config.row_parallelism {
                let actions = (0..self.config.row_parallel_actions)
                    .map(|a| FilterAction::Batches(a * self.config.row_parallel_delta))
                    .collect();
                FilterNode::new(NodeKind::RowParallel, episode, chosen, actions)
            } else {
                FilterNode::new(NodeKind::Leaf, episode, chosen, Vec::new())
            };
        }
        let actions = unchosen.into_iter().map(FilterAction::Evaluate).collect();
        FilterNode::new(kind, episode, chosen, actions)
    }

    /// Random completion of the order, evaluated sequentially unless the
    /// batch count was already chosen
    fn playout<R: Rng>(
        &self,
        id: usize,
        state: &mut FilterState,
        rng: &mut R,
        filter: &mut BudgetedFilter,
    ) -> f64 {
        let mut rest: Vec<usize> = (0..self.nr_predicates)
            .filter(|p| !state.order.contains(p))
            .collect();
        rest.shuffle(rng);
        state.order.extend(rest);
        if self.nodes[id].kind != NodeKind::RowParallel {
            state.parallel_batches = 0;
        }
        self.execute(state, filter)
    }

    fn execute(&self, state: &FilterState, filter: &mut BudgetedFilter) -> f64 {
        let budget = if state.parallel_batches > 0 {
            self.config.parallel_rows_per_step
        } else {
            self.config.rows_per_step
        };
        filter.execute_with_budget(budget, state)
    }

    fn select_action<R: Rng>(&mut self, id: usize, rng: &mut R) -> Option<usize> {
        let exploration = self.config.exploration_weight;
        let node = &mut self.nodes[id];
        node.untried.retain(|&a| !node.pruned[a]);
        if !node.untried.is_empty() {
            let pick = rng.gen_range(0..node.untried.len());
            return Some(node.untried.swap_remove(pick));
        }

        let nr_actions = node.actions.len();
        if nr_actions == 0 {
            return None;
        }
        let offset = rng.gen_range(0..nr_actions);
        let log_visits = (node.visits.max(1) as f64).ln();
        let mut best = None;
        let mut best_score = f64::NEG_INFINITY;
        for k in 0..nr_actions {
            let action = (offset + k) % nr_actions;
            if node.pruned[action] || node.tries[action] == 0 {
                continue;
            }
            let tries = node.tries[action] as f64;
            let score = node.rewards[action] / tries + exploration * (log_visits / tries).sqrt();
            if score > best_score {
                best_score = score;
                best = Some(action);
            }
        }
        best
    }

    /// Most visited complete path as an evaluation order
    pub fn best_order(&self) -> Vec<usize> {
        let mut state = FilterState::default();
        let mut id = 0;
        loop {
            let node = &self.nodes[id];
            let best = (0..node.actions.len())
                .filter(|&a| node.tries[a] > 0)
                .max_by_key(|&a| node.tries[a]);
            let Some(action) = best else {
                break;
            };
            apply(node.actions[action], &mut state, self.nr_predicates);
            match node.children[action] {
                Some(child) => id = child,
                None => break,
            }
        }
        for p in 0..self.nr_predicates {
            if !state.order.contains(&p) {
                state.order.push(p);
            }
        }
        state.order
    }
}

fn apply(action: FilterAction, state: &mut FilterState, nr_predicates: usize) {
    match action {
        FilterAction::Evaluate(p) => state.order.push(p),
        FilterAction::IndexOn(p) => {
            state.order.push(p);
            state.indexed = Some(p);
        }
        FilterAction::Conjunctive => {
            state.order = (0..nr_predicates).collect();
            state.conjunctive = true;
        }
        FilterAction::Batches(batches) => state.parallel_batches = batches,
    }
}

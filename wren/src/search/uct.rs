/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::constraints::SearchConstraints;
use crate::config::{JoinConfig, SelectionPolicy, MAX_WORKERS};
use crate::join::JoinOrder;
use crossbeam::utils::CachePadded;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{JoinQuery, TableSet};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Child slot value of an action that has no node yet
pub const NO_CHILD: u32 = u32::MAX;

const CHUNK_SIZE: usize = 1024;

/// Statistics one worker keeps for the actions of a node. Only that worker
/// writes them, all workers read them.
#[derive(Debug)]
struct WorkerStats {
    tries: Box<[AtomicU64]>,
    /// `f64` bit patterns
    rewards: Box<[AtomicU64]>,
}

impl WorkerStats {
    fn new(nr_actions: usize) -> Self {
        Self {
            tries: (0..nr_actions).map(|_| AtomicU64::new(0)).collect(),
            rewards: (0..nr_actions).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn reset(&self) {
        for counter in self.tries.iter().chain(self.rewards.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// One partial join order: the tables joined so far and the tables that
/// may follow
#[derive(Debug)]
pub struct TreeNode {
    prefix: Vec<usize>,
    joined: TableSet,
    actions: Vec<usize>,
    recommended: TableSet,
    children: Box<[AtomicU32]>,
    stats: Box<[CachePadded<WorkerStats>]>,
}

impl TreeNode {
    pub fn level(&self) -> usize {
        self.prefix.len()
    }

    pub fn prefix(&self) -> &[usize] {
        &self.prefix
    }

    pub fn joined(&self) -> TableSet {
        self.joined
    }

    /// Tables not joined yet
    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    /// Subset of the actions selection prefers
    pub fn recommended(&self) -> TableSet {
        self.recommended
    }

    pub fn is_leaf(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn child(&self, action: usize) -> Option<u32> {
        match self.children[action].load(Ordering::Acquire) {
            NO_CHILD => None,
            id => Some(id),
        }
    }

    /// Tries of an action summed over workers
    pub fn total_tries(&self, action: usize) -> u64 {
        self.stats
            .iter()
            .map(|stats| stats.tries[action].load(Ordering::Relaxed))
            .sum()
    }

    pub fn worker_tries(&self, worker: usize, action: usize) -> u64 {
        self.stats[worker].tries[action].load(Ordering::Relaxed)
    }

    fn totals(&self, action: usize) -> (u64, f64) {
        self.stats.iter().fold((0, 0.0), |(tries, reward), stats| {
            (
                tries + stats.tries[action].load(Ordering::Relaxed),
                reward + f64::from_bits(stats.rewards[action].load(Ordering::Relaxed)),
            )
        })
    }

    fn record(&self, worker: usize, action: usize, reward: f64) {
        let stats = &self.stats[worker];
        stats.tries[action].fetch_add(1, Ordering::Relaxed);
        let total = f64::from_bits(stats.rewards[action].load(Ordering::Relaxed)) + reward;
        stats.rewards[action].store(total.to_bits(), Ordering::Relaxed);
    }
}

/// Grow-only node storage. Chunks are allocated on first touch, so the
/// capacity bounds memory without reserving it up front.
#[derive(Debug)]
struct NodeArena {
    chunks: Box<[OnceLock<Box<[OnceLock<TreeNode>]>>]>,
    next: AtomicUsize,
    capacity: usize,
}

impl NodeArena {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, NO_CHILD as usize);
        let nr_chunks = capacity.div_ceil(CHUNK_SIZE);
        Self {
            chunks: (0..nr_chunks).map(|_| OnceLock::new()).collect(),
            next: AtomicUsize::new(0),
            capacity,
        }
    }

    fn alloc(&self, node: TreeNode) -> Option<u32> {
        let id = self.next.fetch_add(1, Ordering::AcqRel);
        if id >= self.capacity {
            return None;
        }
        let chunk = self.chunks[id / CHUNK_SIZE]
            .get_or_init(|| (0..CHUNK_SIZE).map(|_| OnceLock::new()).collect());
        // Ids are handed out once, so the slot is always empty here
        let _ = chunk[id % CHUNK_SIZE].set(node);
        Some(id as u32)
    }

    fn get(&self, id: u32) -> Option<&TreeNode> {
        let id = id as usize;
        self.chunks.get(id / CHUNK_SIZE)?.get()?.get(id % CHUNK_SIZE)?.get()
    }

    fn len(&self) -> usize {
        self.next.load(Ordering::Acquire).min(self.capacity)
    }
}

/// Per-episode inputs of one worker
#[derive(Debug, Clone, Copy)]
pub struct Episode<'a> {
    pub worker: usize,
    pub constraints: &'a SearchConstraints,
    /// Tables this worker has no rows left to split on
    pub exhausted_roots: TableSet,
}

/// An action of a node with its visit count, for diagnostics and
/// search-space partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedAction {
    pub table: usize,
    pub visits: u64,
    pub child: Option<u32>,
}

/// UCT search tree over join orders, shared by all workers.
///
/// Selection and statistics updates take no locks: every worker writes only
/// its own counters and children are installed with a compare-and-swap on
/// the parent's slot, so the first writer wins.
#[derive(Debug)]
pub struct SearchTree {
    query: Arc<JoinQuery>,
    nr_workers: usize,
    exploration_weight: f64,
    policy: SelectionPolicy,
    epsilon: f64,
    avoid_cartesians: bool,
    arena: NodeArena,
    root: u32,
}

impl SearchTree {
    pub fn new(query: Arc<JoinQuery>, config: &JoinConfig) -> Self {
        let mut tree = Self {
            query,
            nr_workers: config.nr_workers.clamp(1, MAX_WORKERS),
            exploration_weight: config.exploration_weight,
            policy: config.policy,
            epsilon: config.epsilon,
            avoid_cartesians: config.avoid_cartesians,
            arena: NodeArena::new(config.max_tree_nodes),
            root: 0,
        };
        let root = tree.create_node(Vec::new());
        // The arena holds at least one node
        tree.root = tree.arena.alloc(root).unwrap_or(0);
        tree
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn node(&self, id: u32) -> Option<&TreeNode> {
        self.arena.get(id)
    }

    /// Nodes allocated so far, including ones that lost an installation race
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    fn create_node(&self, prefix: Vec<usize>) -> TreeNode {
        let nr_tables = self.query.nr_tables();
        let joined = TableSet::from_tables(&prefix);
        let actions: Vec<usize> = (0..nr_tables).filter(|&t| !joined.contains(t)).collect();
        let all = TableSet::from_tables(&actions);

        let recommended = if !self.avoid_cartesians {
            all
        } else if prefix.is_empty() {
            // The first table is split between workers by row, so base
            // tables with at least one row per worker come first
            let base: Vec<usize> = actions
                .iter()
                .copied()
                .filter(|&t| !self.query.is_temporary(t))
                .collect();
            let large: Vec<usize> = base
                .iter()
                .copied()
                .filter(|&t| self.query.cardinality(t) >= self.nr_workers)
                .collect();
            if !large.is_empty() {
                TableSet::from_tables(&large)
            } else if !base.is_empty() {
                TableSet::from_tables(&base)
            } else {
                all
            }
        } else {
            let connected = TableSet::from_tables(
                &actions
                    .iter()
                    .copied()
                    .filter(|&t| self.query.is_connected(t, joined))
                    .collect::<Vec<_>>(),
            );
            if connected.is_empty() { all } else { connected }
        };

        TreeNode {
            children: (0..actions.len()).map(|_| AtomicU32::new(NO_CHILD)).collect(),
            stats: (0..self.nr_workers)
                .map(|_| CachePadded::new(WorkerStats::new(actions.len())))
                .collect(),
            prefix,
            joined,
            actions,
            recommended,
        }
    }

    /// Samples one join order, runs it through `execute` and backs the
    /// reward up along the selected path. Returns a negative value when no
    /// admissible order exists for this worker.
    pub fn sample<R, F>(&self, episode: &Episode<'_>, rng: &mut R, execute: &mut F) -> f64
    where
        R: Rng,
        F: FnMut(&JoinOrder) -> f64,
    {
        let mut can_expand = true;
        self.sample_node(self.root, episode, rng, execute, &mut can_expand)
    }

    fn sample_node<R, F>(
        &self,
        id: u32,
        episode: &Episode<'_>,
        rng: &mut R,
        execute: &mut F,
        can_expand: &mut bool,
    ) -> f64
    where
        R: Rng,
        F: FnMut(&JoinOrder) -> f64,
    {
        let Some(node) = self.arena.get(id) else {
            return -1.0;
        };
        if node.is_leaf() {
            return execute(&JoinOrder::new(node.prefix.clone()));
        }

        let mut excluded = TableSet::empty();
        loop {
            let Some(action) = self.select_action(node, episode, excluded, rng) else {
                return -1.0;
            };
            let table = node.actions[action];
            let reward = match node.child(action) {
                Some(child) => self.sample_node(child, episode, rng, execute, can_expand),
                None if *can_expand => {
                    *can_expand = false;
                    match self.expand(node, action) {
                        Some(child) => self.sample_node(child, episode, rng, execute, can_expand),
                        None => self.playout(node, table, episode, rng, execute),
                    }
                }
                None => self.playout(node, table, episode, rng, execute),
            };
            if reward < 0.0 {
                excluded.insert(table);
                continue;
            }
            node.record(episode.worker, action, reward);
            return reward;
        }
    }

    /// Installs the child for an action unless another worker was first.
    /// `None` once the arena is full. A worker losing the race after
    /// allocating leaves its candidate unreachable, still counted against
    /// the capacity.
    fn expand(&self, node: &TreeNode, action: usize) -> Option<u32> {
        if let Some(existing) = node.child(action) {
            return Some(existing);
        }
        let mut prefix = node.prefix.clone();
        prefix.push(node.actions[action]);
        let candidate = self.arena.alloc(self.create_node(prefix))?;
        match node.children[action].compare_exchange(
            NO_CHILD,
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(candidate),
            Err(winner) => Some(winner),
        }
    }

    /// Completes the order at random, connected tables first, and executes
    /// it without touching the tree below `node`
    fn playout<R, F>(
        &self,
        node: &TreeNode,
        first: usize,
        episode: &Episode<'_>,
        rng: &mut R,
        execute: &mut F,
    ) -> f64
    where
        R: Rng,
        F: FnMut(&JoinOrder) -> f64,
    {
        let mut order = node.prefix.clone();
        order.push(first);
        let mut joined = node.joined.with(first);
        let mut remaining: Vec<usize> =
            node.actions.iter().copied().filter(|&t| t != first).collect();
        remaining.shuffle(rng);

        while !remaining.is_empty() {
            let permitted = |t: &usize| episode.constraints.permits(*t, joined);
            let pick = remaining
                .iter()
                .position(|t| permitted(t) && self.query.is_connected(*t, joined))
                .or_else(|| remaining.iter().position(permitted));
            let Some(index) = pick else {
                return -1.0;
            };
            let table = remaining.swap_remove(index);
            order.push(table);
            joined.insert(table);
        }
        execute(&JoinOrder::new(order))
    }

    fn select_action<R: Rng>(
        &self,
        node: &TreeNode,
        episode: &Episode<'_>,
        excluded: TableSet,
        rng: &mut R,
    ) -> Option<usize> {
        let is_root = node.prefix.is_empty();
        let admissible = |t: usize| {
            !excluded.contains(t)
                && !(is_root && episode.exhausted_roots.contains(t))
                && episode.constraints.permits(t, node.joined)
        };
        let mut candidates: Vec<usize> = (0..node.actions.len())
            .filter(|&a| node.recommended.contains(node.actions[a]) && admissible(node.actions[a]))
            .collect();
        if candidates.is_empty() {
            candidates = (0..node.actions.len())
                .filter(|&a| admissible(node.actions[a]))
                .collect();
        }
        if candidates.is_empty() {
            return None;
        }

        // Workers start their scans at different actions so that cold
        // nodes are spread over them
        let rotated = |k: usize| candidates[(k + episode.worker) % candidates.len()];
        if let Some(action) = (0..candidates.len())
            .map(rotated)
            .find(|&a| node.total_tries(a) == 0)
        {
            return Some(action);
        }
        if let Some(action) = (0..candidates.len())
            .map(rotated)
            .find(|&a| node.worker_tries(episode.worker, a) == 0)
        {
            return Some(action);
        }

        let choice = match self.policy {
            SelectionPolicy::Ucb1 => self.best_by(node, &candidates, true),
            SelectionPolicy::MaxReward => self.best_by(node, &candidates, false),
            SelectionPolicy::Random => candidates.choose(rng).copied(),
            SelectionPolicy::EpsilonGreedy => {
                if rng.gen::<f64>() < self.epsilon {
                    candidates.choose(rng).copied()
                } else {
                    self.best_by(node, &candidates, false)
                }
            }
        };
        choice.or(candidates.first().copied())
    }

    /// Highest mean reward, optionally with the UCB1 exploration bonus
    fn best_by(&self, node: &TreeNode, candidates: &[usize], explore: bool) -> Option<usize> {
        let visits: u64 = (0..node.actions.len()).map(|a| node.total_tries(a)).sum();
        let log_visits = (visits.max(1) as f64).ln();
        let mut best = None;
        let mut best_score = f64::NEG_INFINITY;
        for &action in candidates {
            let (tries, reward) = node.totals(action);
            if tries == 0 {
                return Some(action);
            }
            let mut score = reward / tries as f64;
            if explore {
                score += self.exploration_weight * (log_visits / tries as f64).sqrt();
            }
            if score > best_score {
                best_score = score;
                best = Some(action);
            }
        }
        best
    }

    /// Drops everything `worker` learned so far
    pub fn forget(&self, worker: usize) {
        let mut reset = 0;
        for id in 0..self.arena.len() {
            if let Some(node) = self.arena.get(id as u32) {
                node.stats[worker].reset();
                reset += 1;
            }
        }
        debug!("Worker {} forgot statistics of {} nodes", worker, reset);
    }

    /// Actions of a node, most visited first
    pub fn ranked_actions(&self, id: u32) -> Vec<RankedAction> {
        let Some(node) = self.arena.get(id) else {
            return Vec::new();
        };
        let mut ranked: Vec<RankedAction> = node
            .actions
            .iter()
            .enumerate()
            .map(|(action, &table)| RankedAction {
                table,
                visits: node.total_tries(action),
                child: node.child(action),
            })
            .collect();
        ranked.sort_by(|a, b| b.visits.cmp(&a.visits).then(a.table.cmp(&b.table)));
        ranked
    }

    /// Follows the most visited actions from the root, then completes the
    /// order with connected tables first
    pub fn best_order(&self) -> JoinOrder {
        let mut order = Vec::new();
        let mut node = Some(self.root);
        while let Some(id) = node {
            let ranked = self.ranked_actions(id);
            match ranked.first() {
                Some(top) if top.visits > 0 => {
                    order.push(top.table);
                    node = top.child;
                }
                _ => break,
            }
        }

        let mut joined = TableSet::from_tables(&order);
        let mut remaining: Vec<usize> =
            (0..self.query.nr_tables()).filter(|&t| !joined.contains(t)).collect();
        while !remaining.is_empty() {
            let index = remaining
                .iter()
                .position(|&t| self.query.is_connected(t, joined))
                .unwrap_or(0);
            let table = remaining.remove(index);
            order.push(table);
            joined.insert(table);
        }
        JoinOrder::new(order)
    }

    /// Visits of each table as first table of the order
    pub fn root_visits(&self) -> Vec<u64> {
        let mut visits = vec![0; self.query.nr_tables()];
        for action in self.ranked_actions(self.root) {
            visits[action.table] = action.visits;
        }
        visits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{Column, ColumnRef, Table};

    /// Chain a - b - c, plus an unconnected d
    fn create_test_query(temporary: Option<usize>) -> Arc<JoinQuery> {
        let tables = ["a", "b", "c", "d"]
            .iter()
            .map(|name| Arc::new(Table::new(name, vec![Column::from_ints("id", vec![1, 2])]).unwrap()))
            .collect();
        let mut query = JoinQuery::new(tables);
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        query.add_equi_join(ColumnRef::new(1, 0), ColumnRef::new(2, 0)).unwrap();
        if let Some(table) = temporary {
            query.mark_temporary(table);
        }
        Arc::new(query)
    }

    fn create_tree(query: Arc<JoinQuery>, nr_workers: usize) -> SearchTree {
        SearchTree::new(query, &JoinConfig::new().set_workers(nr_workers))
    }

    fn is_permutation(order: &JoinOrder, n: usize) -> bool {
        let mut tables = order.tables().to_vec();
        tables.sort_unstable();
        tables == (0..n).collect::<Vec<_>>()
    }

    #[test]
    fn test_each_root_action_tried_before_repeat() {
        let tree = create_tree(create_test_query(None), 1);
        let constraints = SearchConstraints::default();
        let episode = Episode {
            worker: 0,
            constraints: &constraints,
            exhausted_roots: TableSet::empty(),
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut firsts = Vec::new();
        for _ in 0..4 {
            tree.sample(&episode, &mut rng, &mut |order: &JoinOrder| {
                firsts.push(order.leftmost());
                0.5
            });
        }
        firsts.sort_unstable();
        assert_eq!(firsts, vec![0, 1, 2, 3]);
        assert_eq!(tree.root_visits(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_sampled_orders_avoid_cartesian_products() {
        let tree = create_tree(create_test_query(None), 1);
        let constraints = SearchConstraints::default();
        let episode = Episode {
            worker: 0,
            constraints: &constraints,
            exhausted_roots: TableSet::empty(),
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            tree.sample(&episode, &mut rng, &mut |order: &JoinOrder| {
                assert!(is_permutation(order, 4));
                let position = |t: usize| order.position_of(t).unwrap();
                // b always comes before whichever of a and c is joined last
                assert!(position(1) < position(0).max(position(2)));
                0.1
            });
        }
    }

    #[test]
    fn test_temporary_tables_not_recommended_at_root() {
        let tree = create_tree(create_test_query(Some(3)), 1);
        let root = tree.node(tree.root()).unwrap();
        assert!(!root.recommended().contains(3));
        assert!(root.recommended().contains(0));
    }

    #[test]
    fn test_exhausted_roots_are_skipped() {
        let tree = create_tree(create_test_query(None), 1);
        let constraints = SearchConstraints::default();
        let episode = Episode {
            worker: 0,
            constraints: &constraints,
            exhausted_roots: TableSet::from_tables(&[0, 1, 2]),
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..5 {
            tree.sample(&episode, &mut rng, &mut |order: &JoinOrder| {
                assert_eq!(order.leftmost(), 3);
                0.0
            });
        }

        let all = Episode {
            exhausted_roots: TableSet::all(4),
            ..episode
        };
        let reward = tree.sample(&all, &mut rng, &mut |_: &JoinOrder| 1.0);
        assert!(reward < 0.0);
    }

    #[test]
    fn test_concurrent_expansion_installs_one_child() {
        let tree = create_tree(create_test_query(None), 4);
        let root = tree.node(tree.root()).unwrap();
        let installed: Vec<u32> = crossbeam::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|_| tree.expand(root, 0)))
                .collect();
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
        })
        .unwrap();
        assert_eq!(installed.len(), 4);
        assert!(installed.iter().all(|&id| Some(id) == root.child(0)));
    }

    #[test]
    fn test_expanding_an_installed_slot_allocates_nothing() {
        let tree = create_tree(create_test_query(None), 1);
        let root = tree.node(tree.root()).unwrap();
        let first = tree.expand(root, 1);
        assert!(first.is_some());
        assert_eq!(tree.expand(root, 1), first);
        assert_eq!(tree.node_count(), 2);
    }

    #[test]
    fn test_root_prefers_tables_every_worker_can_split() {
        let rows = [1usize, 8, 8, 8];
        let tables = ["a", "b", "c", "d"]
            .iter()
            .zip(rows)
            .map(|(name, n)| {
                let ids = (0..n as i64).collect();
                Arc::new(Table::new(name, vec![Column::from_ints("id", ids)]).unwrap())
            })
            .collect();
        let mut query = JoinQuery::new(tables);
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        query.add_equi_join(ColumnRef::new(1, 0), ColumnRef::new(2, 0)).unwrap();
        query.mark_temporary(3);
        let query = Arc::new(query);

        let tree = create_tree(Arc::clone(&query), 4);
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.recommended(), TableSet::from_tables(&[1, 2]));

        // A single worker has nothing to balance
        let tree = create_tree(query, 1);
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.recommended(), TableSet::from_tables(&[0, 1, 2]));
    }

    #[test]
    fn test_full_arena_falls_back_to_playout() {
        let query = create_test_query(None);
        let config = JoinConfig::new().set_workers(1).set_max_tree_nodes(1);
        let tree = SearchTree::new(query, &config);
        let constraints = SearchConstraints::default();
        let episode = Episode {
            worker: 0,
            constraints: &constraints,
            exhausted_roots: TableSet::empty(),
        };
        let mut rng = StdRng::seed_from_u64(5);
        let mut executed = 0;
        for _ in 0..10 {
            let reward = tree.sample(&episode, &mut rng, &mut |order: &JoinOrder| {
                assert!(is_permutation(order, 4));
                executed += 1;
                0.3
            });
            assert_eq!(reward, 0.3);
        }
        assert_eq!(executed, 10);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_forget_resets_own_statistics_only() {
        let tree = create_tree(create_test_query(None), 2);
        let constraints = SearchConstraints::default();
        let mut rng = StdRng::seed_from_u64(1);
        for worker in 0..2 {
            let episode = Episode {
                worker,
                constraints: &constraints,
                exhausted_roots: TableSet::empty(),
            };
            tree.sample(&episode, &mut rng, &mut |_: &JoinOrder| 1.0);
        }
        assert_eq!(tree.root_visits().iter().sum::<u64>(), 2);
        tree.forget(0);
        assert_eq!(tree.root_visits().iter().sum::<u64>(), 1);
    }

    #[test]
    fn test_best_order_follows_rewarded_path() {
        let tree = create_tree(create_test_query(None), 1);
        let constraints = SearchConstraints::default();
        let episode = Episode {
            worker: 0,
            constraints: &constraints,
            exhausted_roots: TableSet::empty(),
        };
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..200 {
            tree.sample(&episode, &mut rng, &mut |order: &JoinOrder| {
                if order.leftmost() == 2 { 1.0 } else { 0.0 }
            });
        }
        let best = tree.best_order();
        assert_eq!(best.leftmost(), 2);
        assert!(is_permutation(&best, 4));
    }
}

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::uct::SearchTree;
use log::debug;
use shared::TableSet;
use std::ops::Range;

/// `after` may not be joined while `before` is not joined yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precedence {
    pub before: usize,
    pub after: usize,
}

/// Per-worker restriction of the join orders a worker may sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchConstraints {
    rules: Vec<Precedence>,
}

impl SearchConstraints {
    pub fn new(rules: Vec<Precedence>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: Precedence) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Precedence] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `table` may be joined next after the tables in `joined`
    pub fn permits(&self, table: usize, joined: TableSet) -> bool {
        self.rules
            .iter()
            .all(|rule| rule.after != table || joined.contains(rule.before))
    }
}

/// Splits the search space between workers along the most visited path
/// of the tree.
///
/// At every node of the path the current worker range is halved: the lower
/// half must join the most visited action before the runner-up and keeps
/// following the most visited child, the upper half the reverse.
pub fn partition_constraints(tree: &SearchTree, nr_workers: usize) -> Vec<SearchConstraints> {
    let mut constraints = vec![SearchConstraints::default(); nr_workers];
    split(tree, Some(tree.root()), 0..nr_workers, &mut constraints);
    debug!(
        "Partitioned search space: {:?}",
        constraints.iter().map(|c| c.rules().len()).collect::<Vec<_>>()
    );
    constraints
}

fn split(
    tree: &SearchTree,
    node: Option<u32>,
    workers: Range<usize>,
    constraints: &mut [SearchConstraints],
) {
    if workers.len() < 2 {
        return;
    }
    let Some(node) = node else {
        return;
    };
    let ranked = tree.ranked_actions(node);
    let (Some(hot), Some(second)) = (ranked.first(), ranked.get(1)) else {
        return;
    };
    if hot.visits == 0 {
        return;
    }

    let middle = workers.start + workers.len() / 2;
    for rules in &mut constraints[workers.start..middle] {
        rules.push(Precedence {
            before: hot.table,
            after: second.table,
        });
    }
    for rules in &mut constraints[middle..workers.end] {
        rules.push(Precedence {
            before: second.table,
            after: hot.table,
        });
    }
    split(tree, hot.child, workers.start..middle, constraints);
    split(tree, second.child, middle..workers.end, constraints);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JoinConfig;
    use crate::join::JoinOrder;
    use crate::search::uct::Episode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{Column, ColumnRef, JoinQuery, Table};
    use std::sync::Arc;

    /// Triangle a - b - c, four rows each
    fn create_test_tree(nr_workers: usize) -> SearchTree {
        let tables = ["a", "b", "c"]
            .iter()
            .map(|name| Arc::new(Table::new(name, vec![Column::from_ints("id", vec![1, 2, 3, 4])]).unwrap()))
            .collect();
        let mut query = JoinQuery::new(tables);
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        query.add_equi_join(ColumnRef::new(1, 0), ColumnRef::new(2, 0)).unwrap();
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(2, 0)).unwrap();
        SearchTree::new(Arc::new(query), &JoinConfig::new().set_workers(nr_workers))
    }

    fn rule(before: usize, after: usize) -> Precedence {
        Precedence { before, after }
    }

    #[test]
    fn test_permits_requires_before_joined() {
        let constraints = SearchConstraints::new(vec![Precedence { before: 0, after: 2 }]);
        assert!(!constraints.permits(2, TableSet::empty()));
        assert!(constraints.permits(2, TableSet::from_tables(&[0])));
        assert!(constraints.permits(1, TableSet::empty()));
        assert!(SearchConstraints::default().permits(2, TableSet::empty()));
    }

    #[test]
    fn test_partition_follows_the_hot_path() {
        let tree = create_test_tree(4);
        let constraints = SearchConstraints::default();
        let episode = Episode {
            worker: 0,
            constraints: &constraints,
            exhausted_roots: TableSet::empty(),
        };
        let mut rng = StdRng::seed_from_u64(13);
        // c first is best, and c then b best of all
        for _ in 0..20 {
            tree.sample(&episode, &mut rng, &mut |order: &JoinOrder| {
                match (order.tables()[0], order.tables()[1]) {
                    (2, 1) => 1.0,
                    (2, _) => 0.5,
                    (0, _) => 0.2,
                    _ => 0.0,
                }
            });
        }
        assert_eq!(tree.root_visits(), vec![1, 1, 18]);

        let partition = partition_constraints(&tree, 4);
        let rules: Vec<&[Precedence]> = partition.iter().map(SearchConstraints::rules).collect();
        assert_eq!(rules[0], &[rule(2, 0), rule(1, 0)]);
        assert_eq!(rules[1], &[rule(2, 0), rule(0, 1)]);
        assert_eq!(rules[2], &[rule(0, 2), rule(1, 2)]);
        assert_eq!(rules[3], &[rule(0, 2), rule(2, 1)]);

        // The halves cannot both start with their own forbidden table
        assert!(!partition[0].permits(0, TableSet::empty()));
        assert!(!partition[2].permits(2, TableSet::empty()));
    }

    #[test]
    fn test_unvisited_tree_is_not_partitioned() {
        let tree = create_test_tree(4);
        let partition = partition_constraints(&tree, 4);
        assert_eq!(partition.len(), 4);
        assert!(partition.iter().all(SearchConstraints::is_empty));
        assert!(partition_constraints(&tree, 1)[0].is_empty());
    }
}

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Learned evaluation order for the single-table predicates of one table.
//!
//! ## Architecture
//!
//! - `tree`: UCT tree whose levels choose the next predicate to evaluate,
//!   optionally an index access path at the root and a row-parallel batch
//!   count once all predicates are placed
//! - `executor`: decides a slice of rows per episode with the chosen order
//!   and scores it by rows decided per predicate evaluation
//!
//! The surviving rows become a mask the join executor checks instead of
//! evaluating the predicates again.

pub mod executor;
pub mod tree;

pub use executor::{BudgetedFilter, FilterIndex};
pub use tree::{FilterAction, FilterNode, FilterState, FilterTree};

use crate::config::FilterConfig;
use crate::indexing::IndexCatalog;
use crate::join::RowMask;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{JoinQuery, PredicateKind};
use std::sync::Arc;

/// Rows of a table satisfying all of its single-table predicates
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub table: usize,
    /// Ascending row indices
    pub rows: Vec<u32>,
    /// Global predicate ids in the evaluation order the search preferred
    pub best_order: Vec<usize>,
    pub episodes: u64,
}

impl FilterOutcome {
    pub fn to_mask(&self, cardinality: usize) -> RowMask {
        let mut mask = vec![false; cardinality];
        for &row in &self.rows {
            mask[row as usize] = true;
        }
        Arc::from(mask)
    }
}

/// Filters one table with its single-table predicates, learning the
/// evaluation order on the fly
pub fn filter_table(
    query: &Arc<JoinQuery>,
    table: usize,
    catalog: &IndexCatalog,
    config: &FilterConfig,
    seed: Option<u64>,
) -> FilterOutcome {
    let predicates = query.unary_predicates(table);
    if predicates.is_empty() {
        return FilterOutcome {
            table,
            rows: (0..query.cardinality(table) as u32).collect(),
            best_order: Vec::new(),
            episodes: 0,
        };
    }

    let indexes: Vec<Option<FilterIndex>> = predicates
        .iter()
        .map(|&id| match query.predicate(id).kind() {
            PredicateKind::ConstantEquality { column, value } => catalog
                .get(*column)
                .filter(|index| index.accepts(value))
                .map(|index| FilterIndex {
                    index: Arc::clone(index),
                    value: value.clone(),
                }),
            _ => None,
        })
        .collect();
    let indexed: Vec<bool> = indexes.iter().map(Option::is_some).collect();

    let mut tree = FilterTree::new(&indexed, config);
    let mut filter = BudgetedFilter::new(Arc::clone(query), table, predicates.clone(), indexes);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(table as u64)),
        None => StdRng::from_entropy(),
    };

    let mut episodes = 0;
    while !filter.is_finished() {
        episodes += 1;
        tree.sample(episodes, &mut rng, &mut filter);
    }

    let best_order = tree.best_order().into_iter().map(|p| predicates[p]).collect();
    let rows = filter.into_rows();
    debug!(
        "Filtered table {} to {} rows in {} episodes",
        table,
        rows.len(),
        episodes
    );
    FilterOutcome {
        table,
        rows,
        best_order,
        episodes,
    }
}

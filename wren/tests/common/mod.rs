/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use shared::{Column, ColumnRef, CompareOp, JoinQuery, Table, Value};
use std::sync::Arc;

/// a.x = [1, 2, 2] joined with b.x = [2, 2, 3]
pub fn two_table_query() -> Arc<JoinQuery> {
    let a = Table::new("a", vec![Column::from_ints("x", vec![1, 2, 2])]).unwrap();
    let b = Table::new("b", vec![Column::from_ints("x", vec![2, 2, 3])]).unwrap();
    let mut query = JoinQuery::new(vec![Arc::new(a), Arc::new(b)]);
    query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
    Arc::new(query)
}

pub fn two_table_expected() -> FxHashSet<Vec<u32>> {
    [vec![1, 0], vec![1, 1], vec![2, 0], vec![2, 1]].into_iter().collect()
}

/// Chain of 3 or 4 small tables with nullable join keys, a residual
/// comparison and a constant filter
pub fn random_query(seed: u64) -> Arc<JoinQuery> {
    let mut rng = StdRng::seed_from_u64(seed);
    let nr_tables = rng.gen_range(3..=4);
    let tables: Vec<Arc<Table>> = (0..nr_tables)
        .map(|t| {
            let rows = rng.gen_range(1..=7);
            let keys = (0..rows)
                .map(|_| {
                    if rng.gen_bool(0.1) {
                        None
                    } else {
                        Some(rng.gen_range(0..4))
                    }
                })
                .collect();
            let values = (0..rows).map(|_| rng.gen_range(0..10)).collect();
            let table = Table::new(
                &format!("t{}", t),
                vec![
                    Column::from_nullable_ints("k", keys),
                    Column::from_ints("v", values),
                ],
            )
            .unwrap();
            Arc::new(table)
        })
        .collect();

    let mut query = JoinQuery::new(tables);
    for t in 1..nr_tables {
        let partner = rng.gen_range(0..t);
        query
            .add_equi_join(ColumnRef::new(partner, 0), ColumnRef::new(t, 0))
            .unwrap();
    }
    query
        .add_column_comparison(ColumnRef::new(0, 1), CompareOp::Le, ColumnRef::new(2, 1))
        .unwrap();
    let filtered = rng.gen_range(0..nr_tables);
    query
        .add_constant_filter(ColumnRef::new(filtered, 1), CompareOp::Ne, Value::Int(3))
        .unwrap();
    Arc::new(query)
}

/// Every combination of rows satisfying all predicates
pub fn nested_loop_join(query: &JoinQuery) -> FxHashSet<Vec<u32>> {
    let cardinalities: Vec<u32> = (0..query.nr_tables())
        .map(|t| query.cardinality(t) as u32)
        .collect();
    let mut results = FxHashSet::default();
    if cardinalities.contains(&0) {
        return results;
    }
    let mut tuple = vec![0u32; cardinalities.len()];
    loop {
        if query.predicates().iter().all(|p| p.evaluate(&tuple).is_true()) {
            results.insert(tuple.clone());
        }
        let mut pos = 0;
        loop {
            if pos == tuple.len() {
                return results;
            }
            tuple[pos] += 1;
            if tuple[pos] < cardinalities[pos] {
                break;
            }
            tuple[pos] = 0;
            pos += 1;
        }
    }
}

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

mod common;

use common::{nested_loop_join, random_query, two_table_expected, two_table_query};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use wren::{AdaptiveQueryEngine, JoinConfig, JoinResult, SelectionPolicy};

fn run(config: JoinConfig, seed: u64) -> (JoinResult, FxHashSet<Vec<u32>>) {
    let query = random_query(seed);
    let expected = nested_loop_join(&query);
    let engine = AdaptiveQueryEngine::new(config).unwrap();
    (engine.execute(query).unwrap(), expected)
}

#[test]
fn test_single_and_parallel_search_agree_with_nested_loops() {
    for seed in 0..12 {
        for nr_workers in [1, 2, 4] {
            let config = JoinConfig::new()
                .set_workers(nr_workers)
                .set_budget(2)
                .set_seed(seed)
                .set_forget(true, 5);
            let (result, expected) = run(config, seed);
            assert!(result.finished);
            assert_eq!(result.tuples, expected, "seed {}, workers {}", seed, nr_workers);
            assert_eq!(result.episodes_per_worker.len(), nr_workers);
        }
    }
}

#[test]
fn test_every_selection_policy_completes() {
    let policies = [
        SelectionPolicy::Ucb1,
        SelectionPolicy::MaxReward,
        SelectionPolicy::Random,
        SelectionPolicy::EpsilonGreedy,
    ];
    for policy in policies {
        for seed in 0..4 {
            let config = JoinConfig::new()
                .set_workers(3)
                .set_budget(1)
                .set_policy(policy)
                .set_epsilon(0.3)
                .set_seed(seed);
            let (result, expected) = run(config, seed + 50);
            assert_eq!(result.tuples, expected, "{:?}, seed {}", policy, seed);
        }
    }
}

#[test]
fn test_search_options_keep_results_exact() {
    let configs = [
        JoinConfig::new().set_avoid_cartesians(false),
        JoinConfig::new().set_partition_search_space(false),
        JoinConfig::new().set_forget(false, 1),
        JoinConfig::new().set_max_tree_nodes(2),
        JoinConfig::new().set_prefilter(false),
        JoinConfig::new().set_reward_weights(1.0, 0.0),
    ];
    for (i, config) in configs.into_iter().enumerate() {
        let config = config.set_workers(3).set_budget(3).set_seed(i as u64);
        let (result, expected) = run(config, 200 + i as u64);
        assert_eq!(result.tuples, expected, "configuration {}", i);
    }
}

#[test]
fn test_tree_capacity_is_respected() {
    let config = JoinConfig::new()
        .set_workers(2)
        .set_budget(1)
        .set_max_tree_nodes(3)
        .set_seed(9);
    let (result, expected) = run(config, 7);
    assert!(result.tree_nodes <= 3);
    assert_eq!(result.tuples, expected);
}

#[test]
fn test_best_order_is_a_permutation() {
    let config = JoinConfig::new().set_workers(2).set_budget(1).set_seed(3);
    let engine = AdaptiveQueryEngine::new(config).unwrap();
    let result = engine.execute(two_table_query()).unwrap();
    assert_eq!(result.tuples, two_table_expected());

    let tables: BTreeSet<usize> = result.best_order.tables().iter().copied().collect();
    assert_eq!(tables, [0, 1].into_iter().collect());
    assert_eq!(result.table_visits.len(), 2);
    assert!(result.table_visits.iter().sum::<u64>() > 0);
}

#[test]
fn test_config_from_json() {
    let config = JoinConfig::from_json_str(
        r#"{"budget": 4, "nr_workers": 2, "policy": "epsilon_greedy", "seed": 11}"#,
    )
    .unwrap();
    assert_eq!(config.policy, SelectionPolicy::EpsilonGreedy);
    assert_eq!(config.budget, 4);

    let (result, expected) = run(config, 31);
    assert_eq!(result.tuples, expected);
    assert!(JoinConfig::from_json_str(r#"{"budget": 0}"#).is_err());
}

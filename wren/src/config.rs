/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Tunables of the search and execution layers.
//!
//! One immutable [`JoinConfig`] is built up front (builder setters or JSON)
//! and handed to the coordinator, the search tree and the executors.

use crate::error::ConfigError;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker ids are tracked in 64-bit masks
pub const MAX_WORKERS: usize = 64;

/// How a tree node picks among actions once every action has been tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Mean reward plus the UCB1 exploration bonus
    Ucb1,
    /// Mean reward only
    MaxReward,
    /// Uniformly random
    Random,
    /// Mean reward, replaced by a random action with probability epsilon
    EpsilonGreedy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Predicate-evaluation steps per episode
    pub budget: u64,
    pub input_reward_weight: f64,
    pub output_reward_weight: f64,
    pub exploration_weight: f64,
    pub policy: SelectionPolicy,
    pub epsilon: f64,
    /// Periodically reset per-worker statistics
    pub forget: bool,
    /// Episodes before the first reset; the interval grows tenfold after each
    pub forget_interval: u64,
    /// Restrict choices to tables connected to the joined set when possible
    pub avoid_cartesians: bool,
    pub nr_workers: usize,
    /// Split the join-order space between workers with precedence constraints
    pub partition_search_space: bool,
    /// Maximum number of nodes in the shared search tree
    pub max_tree_nodes: usize,
    pub seed: Option<u64>,
    /// Stop after this many episodes over all workers
    pub max_episodes: Option<u64>,
    pub timeout_ms: Option<u64>,
    /// Order single-table predicates with the filter search before joining
    pub prefilter: bool,
    pub filter: FilterConfig,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            budget: 10_000,
            input_reward_weight: 0.5,
            output_reward_weight: 0.5,
            exploration_weight: 1e-5,
            policy: SelectionPolicy::Ucb1,
            epsilon: 0.1,
            forget: true,
            forget_interval: 100,
            avoid_cartesians: true,
            nr_workers: utils::get_num_cpus().clamp(1, MAX_WORKERS),
            partition_search_space: true,
            max_tree_nodes: 1 << 20,
            seed: None,
            max_episodes: None,
            timeout_ms: None,
            prefilter: true,
            filter: FilterConfig::default(),
        }
    }
}

impl JoinConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a (possibly partial) JSON configuration; missing keys keep
    /// their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: JoinConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn set_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    pub fn set_reward_weights(mut self, input: f64, output: f64) -> Self {
        self.input_reward_weight = input;
        self.output_reward_weight = output;
        self
    }

    pub fn set_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn set_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn set_forget(mut self, forget: bool, interval: u64) -> Self {
        self.forget = forget;
        self.forget_interval = interval;
        self
    }

    pub fn set_avoid_cartesians(mut self, avoid: bool) -> Self {
        self.avoid_cartesians = avoid;
        self
    }

    pub fn set_workers(mut self, nr_workers: usize) -> Self {
        self.nr_workers = nr_workers;
        self
    }

    pub fn set_partition_search_space(mut self, partition: bool) -> Self {
        self.partition_search_space = partition;
        self
    }

    pub fn set_max_tree_nodes(mut self, max_nodes: usize) -> Self {
        self.max_tree_nodes = max_nodes;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn set_max_episodes(mut self, episodes: u64) -> Self {
        self.max_episodes = Some(episodes);
        self
    }

    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn set_prefilter(mut self, prefilter: bool) -> Self {
        self.prefilter = prefilter;
        self
    }

    pub fn set_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        if self.nr_workers == 0 || self.nr_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkers {
                got: self.nr_workers,
                max: MAX_WORKERS,
            });
        }
        let (input, output) = (self.input_reward_weight, self.output_reward_weight);
        if !(input >= 0.0 && output >= 0.0 && ((input + output) - 1.0).abs() < 1e-9) {
            return Err(ConfigError::InvalidRewardWeights { input, output });
        }
        check_parameter("exploration_weight", self.exploration_weight)?;
        check_parameter("epsilon", self.epsilon)?;
        if self.epsilon > 1.0 {
            return Err(ConfigError::InvalidParameter {
                name: "epsilon",
                value: self.epsilon,
            });
        }
        if self.max_tree_nodes == 0 {
            return Err(ConfigError::ZeroTreeCapacity);
        }
        self.filter.validate()
    }
}

/// Tunables of the single-table filter search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Rows processed per episode without row parallelism
    pub rows_per_step: usize,
    /// Rows processed per episode once row-parallel batches are chosen
    pub parallel_rows_per_step: usize,
    pub exploration_weight: f64,
    pub row_parallelism: bool,
    /// Number of batch-count choices offered by a row-parallel node
    pub row_parallel_actions: usize,
    /// Batch-count difference between neighbouring row-parallel choices
    pub row_parallel_delta: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            rows_per_step: 1_000,
            parallel_rows_per_step: 10_000,
            exploration_weight: 1e-5,
            row_parallelism: true,
            row_parallel_actions: 3,
            row_parallel_delta: 2,
        }
    }
}

impl FilterConfig {
    pub fn set_rows_per_step(mut self, rows: usize, parallel_rows: usize) -> Self {
        self.rows_per_step = rows;
        self.parallel_rows_per_step = parallel_rows;
        self
    }

    pub fn set_row_parallelism(mut self, enabled: bool) -> Self {
        self.row_parallelism = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows_per_step == 0 || self.parallel_rows_per_step == 0 {
            return Err(ConfigError::ZeroFilterBudget);
        }
        check_parameter("filter.exploration_weight", self.exploration_weight)
    }
}

fn check_parameter(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = JoinConfig::default();
        assert_eq!(config.budget, 10_000);
        assert_eq!(config.input_reward_weight, 0.5);
        assert_eq!(config.exploration_weight, 1e-5);
        assert!(config.nr_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = JoinConfig::new()
            .set_budget(50)
            .set_workers(3)
            .set_policy(SelectionPolicy::MaxReward)
            .set_seed(7);
        assert_eq!(config.budget, 50);
        assert_eq!(config.nr_workers, 3);
        assert_eq!(config.policy, SelectionPolicy::MaxReward);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            JoinConfig::new().set_budget(0).validate(),
            Err(ConfigError::ZeroBudget)
        ));
        assert!(matches!(
            JoinConfig::new().set_workers(0).validate(),
            Err(ConfigError::InvalidWorkers { .. })
        ));
        assert!(matches!(
            JoinConfig::new().set_reward_weights(0.7, 0.7).validate(),
            Err(ConfigError::InvalidRewardWeights { .. })
        ));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = JoinConfig::from_json_str(
            r#"{ "budget": 500, "policy": "epsilon_greedy", "nr_workers": 2, "filter": { "rows_per_step": 64 } }"#,
        )
        .unwrap();
        assert_eq!(config.budget, 500);
        assert_eq!(config.policy, SelectionPolicy::EpsilonGreedy);
        assert_eq!(config.filter.rows_per_step, 64);
        assert_eq!(config.filter.parallel_rows_per_step, 10_000);
        assert!(config.avoid_cartesians);
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        assert!(matches!(
            JoinConfig::from_json_str("{ budget: }"),
            Err(ConfigError::Parse(_))
        ));
    }
}

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use thiserror::Error;

/// Integrity failures while building a value index. Fatal: no query runs
/// against a column whose index failed to build.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("index on column '{column}' holds {found} rows, expected {expected}")]
    RowCountMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("row {row} of column '{column}' is stored out of order")]
    Unordered { column: String, row: u32 },
    #[error("row {row} of column '{column}' is stored at the wrong run position")]
    Misplaced { column: String, row: u32 },
    #[error("column '{column}' has {rows} rows, more than a row index can address")]
    TooManyRows { column: String, rows: usize },
}

/// Invalid query bindings detected before execution starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query joins no tables")]
    NoTables,
    #[error("query joins {0} tables, at most {} are supported", shared::MAX_TABLES)]
    TooManyTables(usize),
    #[error("table '{table}' has {rows} rows, more than a row index can address")]
    TableTooLarge { table: String, rows: usize },
    #[error("predicate '{predicate}' references no table")]
    UnboundPredicate { predicate: String },
    #[error("predicate '{predicate}' references unknown table #{table}")]
    UnknownTable { predicate: String, table: usize },
    #[error("predicate '{predicate}' references unknown column #{column} of table #{table}")]
    UnknownColumn {
        predicate: String,
        table: usize,
        column: usize,
    },
}

/// Rejected configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("execution budget must be positive")]
    ZeroBudget,
    #[error("worker count must be between 1 and {max}, got {got}")]
    InvalidWorkers { got: usize, max: usize },
    #[error("reward weights must be non-negative and sum to 1, got {input} + {output}")]
    InvalidRewardWeights { input: f64, output: f64 },
    #[error("{name} must be a finite non-negative number, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("tree capacity must hold at least the root node")]
    ZeroTreeCapacity,
    #[error("filter rows per step must be positive")]
    ZeroFilterBudget,
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level error of the join core
#[derive(Debug, Error)]
pub enum WrenError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("a search worker panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, WrenError>;

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Adaptive join processing: the join order is learned while the join runs.
//!
//! ## Architecture
//!
//! - `indexing`: sorted value indexes over table columns, searched for the
//!   next matching row after a given position
//! - `join`: left-deep plans, budgeted execution that can stop after any
//!   number of steps and resume later, and the progress shared by workers
//! - `search`: the UCT tree over join orders and the parallel coordinator
//!   running episodes against it
//! - `filter`: a smaller UCT search over the evaluation order of a table's
//!   single-table predicates
//! - `query_engine`: validation and the end-to-end pipeline
//!
//! ```no_run
//! use std::sync::Arc;
//! use shared::{Column, ColumnRef, JoinQuery, Table};
//! use wren::{AdaptiveQueryEngine, JoinConfig};
//!
//! let a = Table::new("a", vec![Column::from_ints("x", vec![1, 2, 2])]).unwrap();
//! let b = Table::new("b", vec![Column::from_ints("x", vec![2, 2, 3])]).unwrap();
//! let mut query = JoinQuery::new(vec![Arc::new(a), Arc::new(b)]);
//! query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
//!
//! let engine = AdaptiveQueryEngine::new(JoinConfig::new().set_workers(2)).unwrap();
//! let result = engine.execute(Arc::new(query)).unwrap();
//! assert_eq!(result.len(), 4);
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod indexing;
pub mod join;
pub mod query_engine;
pub mod search;
pub mod utils;

pub use config::{FilterConfig, JoinConfig, SelectionPolicy, MAX_WORKERS};
pub use error::{ConfigError, IndexError, QueryError, Result, WrenError};
pub use filter::{filter_table, FilterOutcome};
pub use indexing::{ColumnIndex, IndexCatalog};
pub use join::{JoinContext, JoinExecutor, JoinOrder};
pub use query_engine::{validate_query, AdaptiveQueryEngine};
pub use search::{JoinResult, SearchCoordinator, SearchTree};

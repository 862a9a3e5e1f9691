/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::config::JoinConfig;
use crate::error::{QueryError, Result};
use crate::filter::filter_table;
use crate::indexing::IndexCatalog;
use crate::join::{JoinContext, RowMask};
use crate::search::{JoinResult, SearchCoordinator};
use log::{debug, info};
use rayon::prelude::*;
use shared::{JoinQuery, PredicateKind, MAX_TABLES};
use std::sync::Arc;

/// Entry point of the join core: validates a query, builds its indexes,
/// filters its tables and runs the adaptive join
pub struct AdaptiveQueryEngine {
    config: JoinConfig,
}

impl AdaptiveQueryEngine {
    /// Create a new engine, rejecting invalid configurations
    pub fn new(config: JoinConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Join all tables of the query and return every qualifying combination
    pub fn execute(&self, query: Arc<JoinQuery>) -> Result<JoinResult> {
        self.prepare(query)?.run()
    }

    /// Does everything up to the search itself. The returned coordinator
    /// exposes a stop handle before it is run.
    pub fn prepare(&self, query: Arc<JoinQuery>) -> Result<SearchCoordinator> {
        validate_query(&query)?;
        let catalog = Arc::new(IndexCatalog::for_query(&query)?);
        debug!("Built {} indexes for {} tables", catalog.len(), query.nr_tables());

        let masks = if self.config.prefilter {
            self.prefilter(&query, &catalog)
        } else {
            vec![None; query.nr_tables()]
        };
        let context = Arc::new(JoinContext::new(query, catalog, masks, &self.config));
        Ok(SearchCoordinator::new(context, &self.config))
    }

    /// Filters every table that has single-table predicates, in parallel
    fn prefilter(&self, query: &Arc<JoinQuery>, catalog: &IndexCatalog) -> Vec<Option<RowMask>> {
        (0..query.nr_tables())
            .into_par_iter()
            .map(|table| {
                if query.unary_predicates(table).is_empty() {
                    return None;
                }
                let outcome = filter_table(query, table, catalog, &self.config.filter, self.config.seed);
                info!(
                    "Table '{}': {} of {} rows pass its filters",
                    query.table(table).name,
                    outcome.rows.len(),
                    query.cardinality(table)
                );
                Some(outcome.to_mask(query.cardinality(table)))
            })
            .collect()
    }
}

/// Checks that the query can be executed: table count, table sizes and
/// the table and column references of every predicate
pub fn validate_query(query: &JoinQuery) -> std::result::Result<(), QueryError> {
    let nr_tables = query.nr_tables();
    if nr_tables == 0 {
        return Err(QueryError::NoTables);
    }
    if nr_tables > MAX_TABLES {
        return Err(QueryError::TooManyTables(nr_tables));
    }
    for table in query.tables() {
        // u32::MAX is reserved as the "no row" marker
        if table.cardinality() >= u32::MAX as usize {
            return Err(QueryError::TableTooLarge {
                table: table.name.clone(),
                rows: table.cardinality(),
            });
        }
    }

    for predicate in query.predicates() {
        if predicate.tables().is_empty() {
            return Err(QueryError::UnboundPredicate {
                predicate: predicate.label().to_string(),
            });
        }
        if let Some(&table) = predicate.tables().iter().find(|&&t| t >= nr_tables) {
            return Err(QueryError::UnknownTable {
                predicate: predicate.label().to_string(),
                table,
            });
        }
        let columns = match predicate.kind() {
            PredicateKind::EquiJoin { left, right } => vec![*left, *right],
            PredicateKind::ConstantEquality { column, .. } => vec![*column],
            PredicateKind::Residual => Vec::new(),
        };
        for column in columns {
            let known = column.table < nr_tables
                && query.table(column.table).column(column.column).is_some();
            if !known {
                return Err(QueryError::UnknownColumn {
                    predicate: predicate.label().to_string(),
                    table: column.table,
                    column: column.column,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Column, ColumnRef, CompareOp, Predicate, Table, Truth, Value};

    fn create_test_query() -> JoinQuery {
        let a = Table::new(
            "a",
            vec![
                Column::from_ints("x", vec![1, 2, 2, 5]),
                Column::from_texts("tag", vec!["p", "q", "p", "p"]),
            ],
        )
        .unwrap();
        let b = Table::new("b", vec![Column::from_ints("x", vec![2, 2, 3, 5])]).unwrap();
        let mut query = JoinQuery::new(vec![Arc::new(a), Arc::new(b)]);
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        query
            .add_constant_filter(ColumnRef::new(0, 1), CompareOp::Eq, Value::from("p"))
            .unwrap();
        query
    }

    #[test]
    fn test_execute_with_and_without_prefilter() {
        let expected = vec![vec![2, 0], vec![2, 1], vec![3, 3]];
        for prefilter in [true, false] {
            let config = JoinConfig::new()
                .set_workers(2)
                .set_budget(3)
                .set_seed(17)
                .set_prefilter(prefilter);
            let engine = AdaptiveQueryEngine::new(config).unwrap();
            let result = engine.execute(Arc::new(create_test_query())).unwrap();
            assert!(result.finished);
            assert_eq!(result.sorted_tuples(), expected);
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(AdaptiveQueryEngine::new(JoinConfig::new().set_budget(0)).is_err());
    }

    #[test]
    fn test_query_validation() {
        assert_eq!(validate_query(&JoinQuery::new(Vec::new())), Err(QueryError::NoTables));

        let mut query = create_test_query();
        query
            .add_predicate(Predicate::custom("never", Vec::new(), |_: &[u32]| Truth::False))
            .unwrap();
        assert!(matches!(
            validate_query(&query),
            Err(QueryError::UnboundPredicate { .. })
        ));
        assert_eq!(validate_query(&create_test_query()), Ok(()));
    }

    #[test]
    fn test_too_many_tables_with_predicates() {
        let tables: Vec<Arc<Table>> = (0..=MAX_TABLES)
            .map(|t| Arc::new(Table::new(&format!("t{}", t), vec![Column::from_ints("x", vec![1])]).unwrap()))
            .collect();
        let mut query = JoinQuery::new(tables);
        assert!(query
            .add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(MAX_TABLES, 0))
            .is_err());
        query.add_equi_join(ColumnRef::new(0, 0), ColumnRef::new(1, 0)).unwrap();
        assert_eq!(
            validate_query(&query),
            Err(QueryError::TooManyTables(MAX_TABLES + 1))
        );

        let engine = AdaptiveQueryEngine::new(JoinConfig::new().set_workers(1)).unwrap();
        assert!(engine.execute(Arc::new(query)).is_err());
    }
}

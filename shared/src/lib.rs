/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Data model shared between the storage layer and the join core: typed
//! columns with null markers, compiled predicates and the bound join query.

pub mod predicate;
pub mod query;
pub mod table;
pub mod value;

pub use predicate::{BoolEval, ColumnRef, CompareOp, Predicate, PredicateKind, Truth};
pub use query::{JoinQuery, TableSet, MAX_TABLES};
pub use table::{Column, ColumnData, Table};
pub use value::{ScalarKind, Value};

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Join-order search with Monte Carlo tree search.
//!
//! ## Architecture
//!
//! - `uct`: the shared UCT tree. Every level of the tree picks the next
//!   table of a left-deep order; episodes sample an order, execute it for a
//!   small budget and back the reward up.
//! - `constraints`: precedence rules that split the space of orders
//!   between workers along the most visited path.
//! - `coordinator`: the worker pool driving episodes until some table has
//!   been joined completely.

pub mod constraints;
pub mod coordinator;
pub mod uct;

pub use constraints::{partition_constraints, Precedence, SearchConstraints};
pub use coordinator::{JoinResult, SearchCoordinator};
pub use uct::{Episode, RankedAction, SearchTree, TreeNode};

/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Value indexes: per column, a map from distinct value to its ascending
//! occurrence rows, answering "next row holding v after row r" in
//! O(log count), optionally restricted to one worker's share of the rows.

pub mod catalog;
pub mod key;
pub mod value_index;

pub use catalog::IndexCatalog;
pub use key::{DoubleKey, IndexKey};
pub use value_index::{ColumnIndex, LookupCursor, RowLookup, ValueIndex};

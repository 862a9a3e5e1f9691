/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::table::{Column, Table};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Three-valued outcome of a compiled predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    /// A null participated in the comparison
    Unknown,
}

impl Truth {
    #[inline]
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    #[inline]
    pub fn from_comparison(op: CompareOp, ordering: Option<Ordering>) -> Truth {
        match ordering {
            Some(ord) if op.holds(ord) => Truth::True,
            Some(_) => Truth::False,
            None => Truth::Unknown,
        }
    }
}

/// A compiled boolean evaluator over a tuple-index vector.
///
/// The vector holds one row index per table of the query; only the entries
/// of the tables the predicate references are meaningful.
pub trait BoolEval: Send + Sync {
    fn evaluate(&self, tuple: &[u32]) -> Truth;
}

impl<F> BoolEval for F
where
    F: Fn(&[u32]) -> Truth + Send + Sync,
{
    #[inline]
    fn evaluate(&self, tuple: &[u32]) -> Truth {
        self(tuple)
    }
}

/// Identifies a column by table position in the query and column position in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: usize,
    pub column: usize,
}

impl ColumnRef {
    pub fn new(table: usize, column: usize) -> Self {
        Self { table, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    #[inline]
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Classification used by the plan compiler: equality predicates may be
/// served by a value index, everything else is evaluated as a residual.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    EquiJoin { left: ColumnRef, right: ColumnRef },
    ConstantEquality { column: ColumnRef, value: Value },
    Residual,
}

/// A compiled predicate with the set of tables it references
#[derive(Clone)]
pub struct Predicate {
    label: String,
    tables: Vec<usize>,
    kind: PredicateKind,
    eval: Arc<dyn BoolEval>,
}

impl Predicate {
    pub fn new(label: &str, mut tables: Vec<usize>, kind: PredicateKind, eval: Arc<dyn BoolEval>) -> Self {
        tables.sort_unstable();
        tables.dedup();
        Self {
            label: label.to_string(),
            tables,
            kind,
            eval,
        }
    }

    /// Wraps an arbitrary evaluator as a residual predicate
    pub fn custom<F>(label: &str, tables: Vec<usize>, eval: F) -> Self
    where
        F: Fn(&[u32]) -> Truth + Send + Sync + 'static,
    {
        Self::new(label, tables, PredicateKind::Residual, Arc::new(eval))
    }

    /// `left op right` over two columns. Equality across two tables is
    /// classified as an equi-join.
    pub fn compare_columns(
        tables: &[Arc<Table>],
        left: ColumnRef,
        op: CompareOp,
        right: ColumnRef,
    ) -> Result<Self, String> {
        let left_column = resolve(tables, left)?;
        let right_column = resolve(tables, right)?;
        let label = format!(
            "{}.{} {} {}.{}",
            tables[left.table].name,
            left_column.name,
            op.symbol(),
            tables[right.table].name,
            right_column.name
        );
        let kind = if op == CompareOp::Eq && left.table != right.table {
            PredicateKind::EquiJoin { left, right }
        } else {
            PredicateKind::Residual
        };

        let left_table = Arc::clone(&tables[left.table]);
        let right_table = Arc::clone(&tables[right.table]);
        let eval = move |tuple: &[u32]| {
            let l = &left_table.columns()[left.column];
            let r = &right_table.columns()[right.column];
            let ordering = l.compare_cells(tuple[left.table] as usize, r, tuple[right.table] as usize);
            Truth::from_comparison(op, ordering)
        };
        Ok(Self::new(&label, vec![left.table, right.table], kind, Arc::new(eval)))
    }

    /// `column op constant`. Equality is classified as an index-capable
    /// constant predicate.
    pub fn compare_constant(
        tables: &[Arc<Table>],
        column: ColumnRef,
        op: CompareOp,
        value: Value,
    ) -> Result<Self, String> {
        let resolved = resolve(tables, column)?;
        let label = format!(
            "{}.{} {} {}",
            tables[column.table].name,
            resolved.name,
            op.symbol(),
            value
        );
        let kind = if op == CompareOp::Eq {
            PredicateKind::ConstantEquality {
                column,
                value: value.clone(),
            }
        } else {
            PredicateKind::Residual
        };

        let table = Arc::clone(&tables[column.table]);
        let eval = move |tuple: &[u32]| {
            let c = &table.columns()[column.column];
            Truth::from_comparison(op, c.compare_value(tuple[column.table] as usize, &value))
        };
        Ok(Self::new(&label, vec![column.table], kind, Arc::new(eval)))
    }

    #[inline]
    pub fn evaluate(&self, tuple: &[u32]) -> Truth {
        self.eval.evaluate(tuple)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Referenced tables, sorted and unique
    pub fn tables(&self) -> &[usize] {
        &self.tables
    }

    pub fn kind(&self) -> &PredicateKind {
        &self.kind
    }

    pub fn is_unary(&self) -> bool {
        self.tables.len() == 1
    }

    pub fn references(&self, table: usize) -> bool {
        self.tables.binary_search(&table).is_ok()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("label", &self.label)
            .field("tables", &self.tables)
            .field("kind", &self.kind)
            .finish()
    }
}

fn resolve(tables: &[Arc<Table>], column: ColumnRef) -> Result<&Column, String> {
    let table = tables
        .get(column.table)
        .ok_or_else(|| format!("Unknown table #{}", column.table))?;
    table.column(column.column).ok_or_else(|| {
        format!("Unknown column #{} in table '{}'", column.column, table.name)
    })
}

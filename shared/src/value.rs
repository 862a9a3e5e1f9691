/*
 * Copyright © 2025 Volodymyr Kadzhaia
 * Copyright © 2025 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Scalar kinds a column can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Int,
    Double,
    Text,
}

/// A single non-null scalar, used for predicate constants and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Double(f64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Value::Int(_) => ScalarKind::Int,
            Value::Double(_) => ScalarKind::Double,
            Value::Text(_) => ScalarKind::Text,
        }
    }

    /// Numeric view of the value, `None` for text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    /// Compares two values of compatible kinds. Integers and doubles compare
    /// numerically, text only compares with text. NaN never compares.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.as_str().cmp(b.as_str())),
            (Value::Text(_), _) | (_, Value::Text(_)) => None,
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_numeric_compare() {
        assert_eq!(Value::Int(2).compare(&Value::Double(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Double(1.5).compare(&Value::Int(2)), Some(Ordering::Less));
    }

    #[test]
    fn test_text_does_not_compare_with_numbers() {
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
        assert_eq!(Value::from("a").compare(&Value::from("b")), Some(Ordering::Less));
    }

    #[test]
    fn test_nan_is_incomparable() {
        assert_eq!(Value::Double(f64::NAN).compare(&Value::Double(1.0)), None);
    }
}

//! Query predicates
//!
//! A declarative predicate tree handed to the data source. Predicates are
//! serializable so a remote source can translate them into its own query
//! language, and evaluable in-process so matches can be recomputed from fetch
//! results.

use crate::hierarchy::{compare_paths, HierarchyPath};
use crate::types::{Field, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Predicate over record fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// No restriction
    All,
    /// Matches nothing
    Nothing,
    Eq { field: Field, value: Value },
    Ne { field: Field, value: Value },
    In { field: Field, values: Vec<Value> },
    /// Inclusive bounds; a missing bound is open
    Range {
        field: Field,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Value>,
    },
    /// Case-insensitive substring match on the string form of the field
    Contains { field: Field, text: String },
    /// Segment-aware hierarchy descendancy (`Field::Path` only)
    DescendantOf { path: HierarchyPath },
    /// Well-formed path at the given depth, 0 for root level (`Field::Path` only)
    PathDepth { depth: usize },
    IsNull { field: Field },
    IsSet { field: Field },
    /// Logical AND; empty AND is `All`
    And { all: Vec<Predicate> },
    /// Logical OR; empty OR is `Nothing`
    Or { any: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn eq(field: Field, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field,
            value: value.into(),
        }
    }

    pub fn one_of(field: Field, values: Vec<Value>) -> Self {
        Predicate::In { field, values }
    }

    pub fn at_most(field: Field, max: impl Into<Value>) -> Self {
        Predicate::Range {
            field,
            min: None,
            max: Some(max.into()),
        }
    }

    pub fn at_least(field: Field, min: impl Into<Value>) -> Self {
        Predicate::Range {
            field,
            min: Some(min.into()),
            max: None,
        }
    }

    pub fn contains(field: Field, text: impl Into<String>) -> Self {
        Predicate::Contains {
            field,
            text: text.into(),
        }
    }

    /// AND with flattening: nested ANDs are merged, `All` is dropped, a single
    /// operand is returned as is.
    pub fn and(predicates: Vec<Predicate>) -> Self {
        let mut all = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Predicate::All => {}
                Predicate::And { all: nested } => all.extend(nested),
                Predicate::Nothing => return Predicate::Nothing,
                other => all.push(other),
            }
        }
        match all.len() {
            0 => Predicate::All,
            1 => all.remove(0),
            _ => Predicate::And { all },
        }
    }

    /// OR with flattening: nested ORs are merged, `Nothing` is dropped.
    pub fn or(predicates: Vec<Predicate>) -> Self {
        let mut any = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Predicate::Nothing => {}
                Predicate::Or { any: nested } => any.extend(nested),
                Predicate::All => return Predicate::All,
                other => any.push(other),
            }
        }
        match any.len() {
            0 => Predicate::Nothing,
            1 => any.remove(0),
            _ => Predicate::Or { any },
        }
    }

    pub fn negate(predicate: Predicate) -> Self {
        match predicate {
            Predicate::All => Predicate::Nothing,
            Predicate::Nothing => Predicate::All,
            Predicate::Not { predicate } => *predicate,
            other => Predicate::Not {
                predicate: Box::new(other),
            },
        }
    }

    /// Root-level nodes. The path decides when present; records without a
    /// path fall back to `depth == 0` or a missing parent id.
    pub fn root_level() -> Self {
        Predicate::or(vec![
            Predicate::PathDepth { depth: 0 },
            Predicate::and(vec![
                Predicate::IsNull { field: Field::Path },
                Predicate::or(vec![
                    Predicate::eq(Field::Depth, 0),
                    Predicate::IsNull {
                        field: Field::ParentId,
                    },
                ]),
            ]),
        ])
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Predicate::All)
    }

    /// Evaluate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Nothing => false,
            Predicate::Eq { field, value } => record
                .field(field)
                .map(|actual| values_equal(field, &actual, value))
                .unwrap_or(false),
            Predicate::Ne { field, value } => record
                .field(field)
                .map(|actual| !values_equal(field, &actual, value))
                .unwrap_or(true),
            Predicate::In { field, values } => record
                .field(field)
                .map(|actual| values.iter().any(|v| values_equal(field, &actual, v)))
                .unwrap_or(false),
            Predicate::Range { field, min, max } => {
                let Some(actual) = record.field(field) else {
                    return false;
                };
                let above_min = match min {
                    Some(min) => matches!(
                        compare_values(field, &actual, min),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    None => true,
                };
                let below_max = match max {
                    Some(max) => matches!(
                        compare_values(field, &actual, max),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    None => true,
                };
                above_min && below_max
            }
            Predicate::Contains { field, text } => {
                let Some(actual) = record.field(field) else {
                    return false;
                };
                let haystack = match &actual {
                    Value::String(s) => s.to_lowercase(),
                    other => other.to_string().to_lowercase(),
                };
                haystack.contains(&text.to_lowercase())
            }
            Predicate::DescendantOf { path } => record
                .hierarchy_path()
                .map(|p| p.is_descendant_of(path))
                .unwrap_or(false),
            Predicate::PathDepth { depth } => record
                .hierarchy_path()
                .map(|p| p.depth() == *depth)
                .unwrap_or(false),
            Predicate::IsNull { field } => record.field(field).is_none(),
            Predicate::IsSet { field } => record.field(field).is_some(),
            Predicate::And { all } => all.iter().all(|p| p.matches(record)),
            Predicate::Or { any } => any.iter().any(|p| p.matches(record)),
            Predicate::Not { predicate } => !predicate.matches(record),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::All
    }
}

fn values_equal(field: &Field, actual: &Value, expected: &Value) -> bool {
    if *field == Field::Path {
        if let (Value::String(raw_a), Value::String(raw_b)) = (actual, expected) {
            return match (HierarchyPath::parse(raw_a), HierarchyPath::parse(raw_b)) {
                (Ok(a), Ok(b)) => a == b,
                _ => raw_a == raw_b,
            };
        }
    }
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Ordering between two JSON values of compatible kinds. `None` when the kinds
/// are not comparable.
pub fn compare_values(field: &Field, a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) if *field == Field::Path => {
            Some(compare_paths(a, b))
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

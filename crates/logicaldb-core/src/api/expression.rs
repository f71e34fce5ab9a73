//! Condition expressions for conditional writes and transaction checks.
//!
//! A condition is evaluated against the item currently stored under the
//! target key. A missing item is evaluated as an empty attribute map, so
//! `attribute_not_exists` holds for keys that were never written.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::ExpressionError;
use crate::types::Document;

/// Maximum nesting depth of `and`/`or`/`not` groups.
const MAX_EXPRESSION_DEPTH: usize = 16;

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// Dot-separated attribute path.
    Attr(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A boolean condition over a stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Compare(Comparator, Operand, Operand),
    Between(Operand, Operand, Operand),
    BeginsWith(Operand, String),
    Contains(Operand, Value),
    AttributeExists(String),
    AttributeNotExists(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Evaluate against the stored item, or `None` if nothing is stored.
    pub fn eval(&self, item: Option<&Document>) -> Result<bool, ExpressionError> {
        let empty = Document::new();
        self.eval_at(item.unwrap_or(&empty), 0)
    }

    fn eval_at(&self, doc: &Document, depth: usize) -> Result<bool, ExpressionError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(ExpressionError::InvalidExpression(format!(
                "expression depth exceeds maximum of {MAX_EXPRESSION_DEPTH}"
            )));
        }
        let passed = match self {
            Condition::Compare(op, left, right) => {
                let ord = compare_values(operand(doc, left), operand(doc, right));
                match op {
                    Comparator::Eq => ord == Some(Ordering::Equal),
                    Comparator::Ne => ord != Some(Ordering::Equal),
                    Comparator::Lt => ord == Some(Ordering::Less),
                    Comparator::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                    Comparator::Gt => ord == Some(Ordering::Greater),
                    Comparator::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                }
            }
            Condition::Between(value, low, high) => {
                let v = operand(doc, value);
                matches!(
                    compare_values(v, operand(doc, low)),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare_values(v, operand(doc, high)),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            Condition::BeginsWith(value, prefix) => operand(doc, value)
                .as_str()
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Condition::Contains(value, needle) => match (operand(doc, value), needle) {
                (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
                (Value::Array(items), n) => items.contains(n),
                _ => false,
            },
            Condition::AttributeExists(path) => !resolve_attr(doc, path).is_null(),
            Condition::AttributeNotExists(path) => resolve_attr(doc, path).is_null(),
            Condition::And(all) => {
                for c in all {
                    if !c.eval_at(doc, depth + 1)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Or(any) => {
                for c in any {
                    if c.eval_at(doc, depth + 1)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not(inner) => !inner.eval_at(doc, depth + 1)?,
        };
        Ok(passed)
    }

    /// AND two optional conditions together, flattening nested `And`s.
    pub fn merge(first: Option<Condition>, second: Option<Condition>) -> Option<Condition> {
        match (first, second) {
            (None, c) | (c, None) => c,
            (Some(a), Some(b)) => {
                let mut parts = Vec::new();
                for c in [a, b] {
                    match c {
                        Condition::And(inner) => parts.extend(inner),
                        other => parts.push(other),
                    }
                }
                Some(Condition::And(parts))
            }
        }
    }
}

fn operand<'a>(doc: &'a Document, op: &'a Operand) -> &'a Value {
    match op {
        Operand::Attr(path) => resolve_attr(doc, path),
        Operand::Literal(v) => v,
    }
}

/// Resolve a dot-separated attribute path; missing segments yield `Null`.
pub fn resolve_attr<'a>(doc: &'a Document, path: &str) -> &'a Value {
    let mut segments = path.split('.');
    let Some(mut current) = segments.next().and_then(|first| doc.get(first)) else {
        return &Value::Null;
    };
    for segment in segments {
        match current.get(segment) {
            Some(v) => current = v,
            None => return &Value::Null,
        }
    }
    current
}

/// Order two attribute values if they share a comparable type.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Integers compare exactly; anything else as `f64`.
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    let int = |n: &Number| {
        n.as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
    };
    match (int(a), int(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

impl Condition {
    pub fn attr_eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Comparator::Eq, path, value)
    }

    pub fn attr_ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Comparator::Ne, path, value)
    }

    pub fn attr_lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Comparator::Lt, path, value)
    }

    pub fn attr_le(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Comparator::Le, path, value)
    }

    pub fn attr_gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Comparator::Gt, path, value)
    }

    pub fn attr_ge(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Comparator::Ge, path, value)
    }

    fn compare(op: Comparator, path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Compare(op, Operand::Attr(path.into()), Operand::Literal(value.into()))
    }

    pub fn between(
        path: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Condition::Between(
            Operand::Attr(path.into()),
            Operand::Literal(low.into()),
            Operand::Literal(high.into()),
        )
    }

    pub fn begins_with(path: impl Into<String>, prefix: impl Into<String>) -> Self {
        Condition::BeginsWith(Operand::Attr(path.into()), prefix.into())
    }

    pub fn contains(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Contains(Operand::Attr(path.into()), value.into())
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Condition::AttributeExists(path.into())
    }

    pub fn not_exists(path: impl Into<String>) -> Self {
        Condition::AttributeNotExists(path.into())
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::merge(Some(self), Some(other)).unwrap_or(Condition::And(Vec::new()))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(vec![self, other])
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Condition::Not(Box::new(self))
    }
}

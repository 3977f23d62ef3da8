//! Deferred boolean filters over serialized entities.
//!
//! # Responsibility
//! - Represent predicates as data so stores can translate them natively.
//! - Evaluate the same predicates in process as the reference semantics.
//!
//! # Invariants
//! - A missing field compares as JSON `null`.
//! - Ordering comparisons only match when both sides have the same JSON kind
//!   (number/number, string/string, bool/bool).
//! - Numbers compare by value, so `1` equals `1.0`.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::ops::Not;
use std::sync::Arc;

/// Comparison operator of a field predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// String prefix match.
    StartsWith,
    /// String substring match.
    Contains,
}

type DocumentPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Composable predicate over an entity's serialized form.
///
/// Field names are dot-separated paths into the serialized document
/// (`"owner.name"`).
#[derive(Clone)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// Regular-expression match on a string field. Evaluated in process only.
    Matches { field: String, pattern: Regex },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Arbitrary code over the serialized document. Evaluated in process only.
    Custom(DocumentPredicate),
}

impl Debug for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compare { field, op, value } => f
                .debug_struct("Compare")
                .field("field", field)
                .field("op", op)
                .field("value", value)
                .finish(),
            Self::Matches { field, pattern } => f
                .debug_struct("Matches")
                .field("field", field)
                .field("pattern", &pattern.as_str())
                .finish(),
            Self::And(filters) => f.debug_tuple("And").field(filters).finish(),
            Self::Or(filters) => f.debug_tuple("Or").field(filters).finish(),
            Self::Not(filter) => f.debug_tuple("Not").field(filter).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Filter {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::StartsWith, Value::String(prefix.into()))
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Contains, Value::String(needle.into()))
    }

    /// Regular-expression filter; fails on an invalid pattern.
    pub fn matches(field: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches {
            field: field.into(),
            pattern: Regex::new(pattern)?,
        })
    }

    /// Filter over the raw serialized document.
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Filter over the decoded entity. Documents that fail to decode never match.
    pub fn entity<E, F>(predicate: F) -> Self
    where
        E: DeserializeOwned,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::predicate(move |document| {
            serde_json::from_value::<E>(document.clone())
                .map(|entity| predicate(&entity))
                .unwrap_or(false)
        })
    }

    /// Conjunction; an empty list matches everything.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Disjunction; an empty list matches nothing.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(other);
                Self::Or(filters)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Evaluates the filter against one serialized entity.
    pub fn evaluate(&self, document: &Value) -> bool {
        match self {
            Self::Compare { field, op, value } => {
                compare(lookup(document, field).unwrap_or(&Value::Null), *op, value)
            }
            Self::Matches { field, pattern } => match lookup(document, field) {
                Some(Value::String(text)) => pattern.is_match(text),
                _ => false,
            },
            Self::And(filters) => filters.iter().all(|filter| filter.evaluate(document)),
            Self::Or(filters) => filters.iter().any(|filter| filter.evaluate(document)),
            Self::Not(filter) => !filter.evaluate(document),
            Self::Custom(predicate) => predicate(document),
        }
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

/// Resolves a dot-separated path inside a JSON document.
pub(crate) fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(actual, expected),
        CompareOp::Ne => !values_equal(actual, expected),
        CompareOp::Lt => same_kind_order(actual, expected) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            same_kind_order(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => same_kind_order(actual, expected) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            same_kind_order(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::StartsWith => match (actual, expected) {
            (Value::String(text), Value::String(prefix)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        CompareOp::Contains => match (actual, expected) {
            (Value::String(text), Value::String(needle)) => text.contains(needle.as_str()),
            _ => false,
        },
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => {
            number_order(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

/// Integers compare exactly; a real on either side compares as `f64`.
pub(crate) fn number_order(left: &Number, right: &Number) -> Option<Ordering> {
    match (exact_integer(left), exact_integer(right)) {
        (Some(left), Some(right)) => Some(left.cmp(&right)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn exact_integer(number: &Number) -> Option<i128> {
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

fn same_kind_order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => number_order(left, right),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{lookup, Filter};
    use serde::Deserialize;
    use serde_json::json;

    fn user() -> serde_json::Value {
        json!({
            "id": "7",
            "name": "Test name 7",
            "size": 100,
            "ratio": 0.5,
            "enabled": true,
            "owner": { "name": "ops" },
            "note": null
        })
    }

    #[test]
    fn lookup_walks_nested_paths() {
        assert_eq!(lookup(&user(), "owner.name"), Some(&json!("ops")));
        assert_eq!(lookup(&user(), "owner.missing"), None);
        assert_eq!(lookup(&user(), "size.inner"), None);
    }

    #[test]
    fn equality_compares_numbers_by_value() {
        assert!(Filter::eq("size", 100.0).evaluate(&user()));
        assert!(Filter::eq("size", 100).evaluate(&user()));
        assert!(!Filter::eq("size", "100").evaluate(&user()));
        assert!(Filter::ne("size", "100").evaluate(&user()));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let document = json!({ "n": 9_007_199_254_740_992_i64, "big": u64::MAX });
        assert!(!Filter::eq("n", 9_007_199_254_740_993_i64).evaluate(&document));
        assert!(Filter::lt("n", 9_007_199_254_740_993_i64).evaluate(&document));
        assert!(Filter::eq("n", 9_007_199_254_740_992_i64).evaluate(&document));
        assert!(Filter::gt("big", i64::MAX).evaluate(&document));
        assert!(!Filter::eq("big", u64::MAX - 1).evaluate(&document));
        assert!(Filter::eq("n", 9_007_199_254_740_992.0).evaluate(&document));
    }

    #[test]
    fn missing_and_null_fields_compare_as_null() {
        assert!(Filter::eq("note", serde_json::Value::Null).evaluate(&user()));
        assert!(Filter::eq("absent", serde_json::Value::Null).evaluate(&user()));
        assert!(Filter::ne("absent", "x").evaluate(&user()));
        assert!(!Filter::gt("absent", 1).evaluate(&user()));
    }

    #[test]
    fn ordering_requires_matching_kinds() {
        assert!(Filter::gt("size", 99).evaluate(&user()));
        assert!(Filter::le("ratio", 0.5).evaluate(&user()));
        assert!(Filter::lt("name", "U").evaluate(&user()));
        assert!(!Filter::lt("name", 5).evaluate(&user()));
        assert!(Filter::gt("enabled", false).evaluate(&user()));
    }

    #[test]
    fn string_operators_only_match_strings() {
        assert!(Filter::starts_with("name", "Test name ").evaluate(&user()));
        assert!(Filter::contains("name", "name 7").evaluate(&user()));
        assert!(!Filter::starts_with("size", "1").evaluate(&user()));
        assert!(Filter::starts_with("name", "").evaluate(&user()));
    }

    #[test]
    fn composition_and_negation() {
        let filter = Filter::eq("enabled", true).and(Filter::gt("size", 10));
        assert!(filter.evaluate(&user()));
        assert!(!(!filter.clone()).evaluate(&user()));
        assert!(matches!(!!filter, Filter::And(_)));

        assert!(Filter::all(Vec::new()).evaluate(&user()));
        assert!(!Filter::any(Vec::new()).evaluate(&user()));
        assert!(Filter::eq("size", 1).or(Filter::eq("id", "7")).evaluate(&user()));
    }

    #[test]
    fn regex_and_custom_filters() {
        assert!(Filter::matches("name", r"^Test name \d$")
            .unwrap()
            .evaluate(&user()));
        assert!(Filter::matches("name", "(").is_err());

        let custom = Filter::predicate(|document| document["size"].as_i64() == Some(100));
        assert!(custom.evaluate(&user()));
    }

    #[test]
    fn entity_filter_decodes_documents() {
        #[derive(Deserialize)]
        struct SizedDoc {
            size: i64,
        }

        assert!(Filter::entity(|entity: &SizedDoc| entity.size == 100).evaluate(&user()));
        assert!(!Filter::entity(|entity: &SizedDoc| entity.size == 1).evaluate(&user()));
        assert!(!Filter::entity(|_: &SizedDoc| true).evaluate(&json!({ "other": 1 })));
    }
}

//! Translation of filters and sort keys into SQL over JSON document tables.
//!
//! Every translated comparison carries a JSON type guard so SQLite's
//! cross-type comparison rules never disagree with in-process evaluation.
//! Filters that cannot be expressed return `None` and the caller falls back
//! to in-process evaluation.

use crate::query::filter::{CompareOp, Filter};
use crate::query::sort::{SortDirection, SortKey};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

pub(crate) const KEY_COLUMN: &str = "entity_key";
pub(crate) const DOCUMENT_COLUMN: &str = "document";

static FIELD_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("field path pattern is valid")
});

/// SQL boolean expression with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SqlClause {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlClause {
    fn fixed(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            params: Vec::new(),
        }
    }
}

/// Column expression plus the expression naming its JSON kind.
struct Operand {
    value: String,
    kind: String,
}

fn operand(field: &str, key_field: &str) -> Option<Operand> {
    if field == key_field {
        return Some(Operand {
            value: KEY_COLUMN.to_string(),
            kind: format!("typeof({KEY_COLUMN})"),
        });
    }
    if !FIELD_PATH.is_match(field) {
        return None;
    }

    Some(Operand {
        value: format!("json_extract({DOCUMENT_COLUMN}, '$.{field}')"),
        kind: format!("json_type({DOCUMENT_COLUMN}, '$.{field}')"),
    })
}

/// Translates `filter` into a clause that always yields 0 or 1.
pub(crate) fn translate_filter(filter: &Filter, key_field: &str) -> Option<SqlClause> {
    match filter {
        Filter::Compare { field, op, value } => {
            let operand = operand(field, key_field)?;
            let clause = compare_clause(&operand, *op, value)?;
            Some(SqlClause {
                sql: format!("COALESCE(({}), 0)", clause.sql),
                params: clause.params,
            })
        }
        Filter::And(filters) => join(filters, " AND ", "1", key_field),
        Filter::Or(filters) => join(filters, " OR ", "0", key_field),
        Filter::Not(inner) => {
            let inner = translate_filter(inner, key_field)?;
            Some(SqlClause {
                sql: format!("NOT ({})", inner.sql),
                params: inner.params,
            })
        }
        Filter::Matches { .. } | Filter::Custom(_) => None,
    }
}

fn join(filters: &[Filter], separator: &str, empty: &str, key_field: &str) -> Option<SqlClause> {
    if filters.is_empty() {
        return Some(SqlClause::fixed(empty));
    }

    let mut parts = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    for filter in filters {
        let clause = translate_filter(filter, key_field)?;
        parts.push(format!("({})", clause.sql));
        params.extend(clause.params);
    }

    Some(SqlClause {
        sql: parts.join(separator),
        params,
    })
}

fn compare_clause(operand: &Operand, op: CompareOp, value: &Value) -> Option<SqlClause> {
    if op == CompareOp::Ne {
        let equal = compare_clause(operand, CompareOp::Eq, value)?;
        return Some(SqlClause {
            sql: format!("NOT COALESCE(({}), 0)", equal.sql),
            params: equal.params,
        });
    }

    let Operand { value: expr, kind } = operand;
    match (op, value) {
        (CompareOp::Eq, Value::Null) => Some(SqlClause::fixed(&format!("{expr} IS NULL"))),
        (CompareOp::Eq, Value::Bool(flag)) => Some(SqlClause::fixed(&format!(
            "{kind} = '{}'",
            if *flag { "true" } else { "false" }
        ))),
        (CompareOp::Eq | CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge, Value::Number(number)) => {
            let param = number_param(number)?;
            Some(SqlClause {
                sql: format!(
                    "{kind} IN ('integer', 'real') AND {expr} {} ?",
                    operator(op)
                ),
                params: vec![param],
            })
        }
        (CompareOp::Eq | CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge, Value::String(text)) => {
            Some(SqlClause {
                sql: format!("{kind} = 'text' AND {expr} {} ?", operator(op)),
                params: vec![SqlValue::Text(text.clone())],
            })
        }
        // Ordering against null never matches.
        (CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge, Value::Null) => {
            Some(SqlClause::fixed("0"))
        }
        (CompareOp::StartsWith, Value::String(prefix)) => Some(SqlClause {
            sql: format!("{kind} = 'text' AND substr({expr}, 1, length(?)) = ?"),
            params: vec![
                SqlValue::Text(prefix.clone()),
                SqlValue::Text(prefix.clone()),
            ],
        }),
        (CompareOp::Contains, Value::String(needle)) => Some(SqlClause {
            sql: format!("{kind} = 'text' AND instr({expr}, ?) > 0"),
            params: vec![SqlValue::Text(needle.clone())],
        }),
        (CompareOp::StartsWith | CompareOp::Contains, _) => Some(SqlClause::fixed("0")),
        _ => None,
    }
}

fn operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
        _ => "=",
    }
}

/// `None` for unsigned values beyond `i64`, which SQLite cannot bind exactly.
fn number_param(number: &serde_json::Number) -> Option<SqlValue> {
    if let Some(value) = number.as_i64() {
        return Some(SqlValue::Integer(value));
    }
    if number.is_u64() {
        return None;
    }
    number.as_f64().map(SqlValue::Real)
}

/// Builds the `ORDER BY` body; without a sort key, results follow the key.
pub(crate) fn translate_sort(sort: Option<&SortKey>, key_field: &str) -> Option<String> {
    let Some(sort) = sort else {
        return Some(format!("{KEY_COLUMN} ASC"));
    };

    let operand = operand(&sort.field, key_field)?;
    let direction = match sort.direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    };

    if operand.value == KEY_COLUMN {
        Some(format!("{KEY_COLUMN} {direction}"))
    } else {
        Some(format!("{} {direction}, {KEY_COLUMN} ASC", operand.value))
    }
}

#[cfg(test)]
mod tests {
    use super::{translate_filter, translate_sort};
    use crate::query::filter::Filter;
    use crate::query::sort::SortKey;
    use rusqlite::types::Value as SqlValue;

    #[test]
    fn key_field_routes_to_key_column() {
        let clause = translate_filter(&Filter::eq("id", "TEST_1"), "id").unwrap();
        assert_eq!(
            clause.sql,
            "COALESCE((typeof(entity_key) = 'text' AND entity_key = ?), 0)"
        );
        assert_eq!(clause.params, vec![SqlValue::Text("TEST_1".to_string())]);
    }

    #[test]
    fn nested_fields_use_json_paths() {
        let clause = translate_filter(&Filter::gt("owner.rank", 2), "id").unwrap();
        assert!(clause
            .sql
            .contains("json_extract(document, '$.owner.rank') > ?"));
        assert_eq!(clause.params, vec![SqlValue::Integer(2)]);
    }

    #[test]
    fn composite_filters_concatenate_params_in_order() {
        let filter = Filter::eq("name", "a").and(!Filter::starts_with("code", "x"));
        let clause = translate_filter(&filter, "id").unwrap();
        assert!(clause.sql.contains(" AND "));
        assert!(clause.sql.contains("NOT ("));
        assert_eq!(
            clause.params,
            vec![
                SqlValue::Text("a".to_string()),
                SqlValue::Text("x".to_string()),
                SqlValue::Text("x".to_string()),
            ]
        );
    }

    #[test]
    fn untranslatable_filters_fall_back() {
        assert!(translate_filter(&Filter::matches("name", "^a").unwrap(), "id").is_none());
        assert!(translate_filter(&Filter::predicate(|_| true), "id").is_none());
        assert!(translate_filter(&Filter::eq("tags", serde_json::json!(["a"])), "id").is_none());
        assert!(translate_filter(&Filter::eq("bad-field", 1), "id").is_none());
        assert!(translate_filter(&Filter::gt("size", u64::MAX), "id").is_none());
        assert!(translate_filter(
            &Filter::eq("name", "a").or(Filter::predicate(|_| true)),
            "id"
        )
        .is_none());
    }

    #[test]
    fn sort_defaults_to_key_and_breaks_ties_by_key() {
        assert_eq!(translate_sort(None, "id").unwrap(), "entity_key ASC");
        assert_eq!(
            translate_sort(Some(&SortKey::descending("remote_key")), "id").unwrap(),
            "json_extract(document, '$.remote_key') DESC, entity_key ASC"
        );
        assert_eq!(
            translate_sort(Some(&SortKey::descending("id")), "id").unwrap(),
            "entity_key DESC"
        );
    }
}

//! Targeting queries.
//!
//! A rule's query is written in one of two dialects. A query whose trimmed text parses as a JSON
//! object is a JSON-logic rule; anything else is a comparison expression such as
//! `(email ew "@example.com") and (age ge 18)`.

use std::collections::HashMap;

use log::warn;
use thiserror::Error;

use crate::attribute_value::AttributeValue;

pub(crate) mod expression;
pub(crate) mod json_logic;

/// The dialect a targeting query is written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryFormat {
    Expression,
    JsonLogic,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("invalid query at position {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("unknown json-logic operator '{0}'")]
    UnknownOperator(String),
    #[error("invalid arguments for '{0}'")]
    InvalidArguments(String),
}

/// Detects the dialect of `query`.
pub fn format_of(query: &str) -> QueryFormat {
    let trimmed = query.trim();
    if trimmed.starts_with('{')
        && serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(trimmed).is_ok()
    {
        QueryFormat::JsonLogic
    } else {
        QueryFormat::Expression
    }
}

/// Evaluates `query` against a flattened context map.
///
/// An empty query matches everything. Queries that cannot be parsed or evaluated never match;
/// the problem is logged.
pub fn evaluate(query: &str, context: &HashMap<String, AttributeValue>) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }

    let result = match format_of(query) {
        QueryFormat::JsonLogic => evaluate_json_logic(query, context),
        QueryFormat::Expression => expression::parse(query).map(|expr| expr.matches(context)),
    };

    match result {
        Ok(matches) => matches,
        Err(e) => {
            warn!("error while evaluating query `{}`: {}", query, e);
            false
        }
    }
}

/// Checks that `query` is well formed without evaluating it against a real context.
pub fn validate(query: &str) -> Result<(), QueryError> {
    let query = query.trim();
    match format_of(query) {
        QueryFormat::JsonLogic => {
            let rule: serde_json::Value =
                serde_json::from_str(query).map_err(|e| QueryError::Parse {
                    position: e.column(),
                    message: e.to_string(),
                })?;
            json_logic::validate(&rule)
        }
        QueryFormat::Expression if query.is_empty() => Ok(()),
        QueryFormat::Expression => expression::parse(query).map(|_| ()),
    }
}

fn evaluate_json_logic(
    query: &str,
    context: &HashMap<String, AttributeValue>,
) -> Result<bool, QueryError> {
    let rule: serde_json::Value = serde_json::from_str(query).map_err(|e| QueryError::Parse {
        position: e.column(),
        message: e.to_string(),
    })?;
    let data = serde_json::Value::Object(
        context
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
            .collect(),
    );

    // Only a literal `true` counts as a match; truthy values such as 1 or "yes" do not.
    Ok(json_logic::apply(&rule, &data)? == serde_json::Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use test_case::test_case;

    fn context() -> HashMap<String, AttributeValue> {
        hashmap! {
            "key".to_string() => AttributeValue::from("user-key"),
            "anonymous".to_string() => AttributeValue::Bool(false),
            "email".to_string() => AttributeValue::from("jane@example.com"),
            "age".to_string() => AttributeValue::from(32_i64),
        }
    }

    #[test_case(r#"key eq "user-key""#, QueryFormat::Expression)]
    #[test_case(r#"  {"==": [{"var": "key"}, "user-key"]}  "#, QueryFormat::JsonLogic)]
    #[test_case(r#"{"broken": "#, QueryFormat::Expression)]
    #[test_case("", QueryFormat::Expression)]
    fn detects_format(query: &str, expected: QueryFormat) {
        assert_eq!(format_of(query), expected);
    }

    #[test_case("", true; "empty query")]
    #[test_case("   \n ", true; "blank query")]
    #[test_case(r#"key eq "user-key""#, true; "expression match")]
    #[test_case(r#"key eq "other""#, false; "expression mismatch")]
    #[test_case(r#"{"==": [{"var": "key"}, "user-key"]}"#, true; "json logic match")]
    #[test_case(r#"{"<": [{"var": "age"}, 30]}"#, false; "json logic mismatch")]
    #[test_case(r#"{"var": "age"}"#, false; "json logic truthy is not a match")]
    #[test_case(r#"key eq"#, false; "invalid expression")]
    #[test_case(r#"{"nope": [1]}"#, false; "unknown operator")]
    fn evaluates(query: &str, expected: bool) {
        assert_eq!(evaluate(query, &context()), expected);
    }

    #[test]
    fn validates() {
        assert!(validate(r#"email ew "@example.com" and age gt 18"#).is_ok());
        assert!(validate(r#"{"and": [{"var": "a"}, {"in": ["x", {"var": "b"}]}]}"#).is_ok());
        assert!(validate("").is_ok());
        assert!(matches!(
            validate(r#"{"frobnicate": [1, 2]}"#),
            Err(QueryError::UnknownOperator(op)) if op == "frobnicate"
        ));
        assert!(matches!(
            validate(r#"email zz "x""#),
            Err(QueryError::Parse { .. })
        ));
    }

    #[test]
    fn deeply_nested_queries_are_rejected() {
        let query = format!("{}key pr", "not ".repeat(20_000));
        assert!(matches!(validate(&query), Err(QueryError::Parse { .. })));
        assert!(!evaluate(&query, &context()));
    }
}

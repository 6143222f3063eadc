//! A JSON-logic interpreter covering the operators used by targeting rules.
//!
//! A rule is either a literal, an array of rules, or an object with exactly one key naming the
//! operator and a value holding its arguments.

use std::cmp::Ordering;

use serde_json::Value;

use crate::query::QueryError;

static NULL: Value = Value::Null;

const OPERATORS: &[(&str, usize)] = &[
    ("var", 0),
    ("missing", 0),
    ("missing_some", 2),
    ("if", 0),
    ("?:", 0),
    ("==", 2),
    ("===", 2),
    ("!=", 2),
    ("!==", 2),
    ("!", 1),
    ("!!", 1),
    ("and", 0),
    ("or", 0),
    ("<", 2),
    ("<=", 2),
    (">", 2),
    (">=", 2),
    ("in", 2),
    ("cat", 0),
    ("substr", 2),
    ("+", 0),
    ("-", 1),
    ("*", 0),
    ("/", 2),
    ("%", 2),
    ("min", 0),
    ("max", 0),
    ("merge", 0),
    ("map", 2),
    ("filter", 2),
    ("all", 2),
    ("some", 2),
    ("none", 2),
];

/// Returns the operator and its argument list if `rule` is an operation.
fn as_operation(rule: &Value) -> Option<(&str, Vec<&Value>)> {
    let object = rule.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let (op, args) = object.iter().next()?;
    let args = match args {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    Some((op.as_str(), args))
}

fn min_arity(op: &str) -> Option<usize> {
    OPERATORS
        .iter()
        .find(|(name, _)| *name == op)
        .map(|(_, arity)| *arity)
}

/// Walks `rule` and rejects unknown operators or operations missing required arguments.
pub(crate) fn validate(rule: &Value) -> Result<(), QueryError> {
    match as_operation(rule) {
        Some((op, args)) => {
            let arity = min_arity(op).ok_or_else(|| QueryError::UnknownOperator(op.to_string()))?;
            if args.len() < arity {
                return Err(QueryError::InvalidArguments(op.to_string()));
            }
            args.into_iter().try_for_each(validate)
        }
        None => match rule {
            Value::Array(items) => items.iter().try_for_each(validate),
            _ => Ok(()),
        },
    }
}

/// Applies `rule` to `data`.
pub(crate) fn apply(rule: &Value, data: &Value) -> Result<Value, QueryError> {
    let (op, args) = match as_operation(rule) {
        Some(operation) => operation,
        None => {
            return match rule {
                Value::Array(items) => items
                    .iter()
                    .map(|item| apply(item, data))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                literal => Ok(literal.clone()),
            }
        }
    };

    let arity = min_arity(op).ok_or_else(|| QueryError::UnknownOperator(op.to_string()))?;
    if args.len() < arity {
        return Err(QueryError::InvalidArguments(op.to_string()));
    }

    // Operators that control evaluation of their own arguments.
    match op {
        "if" | "?:" => return apply_if(&args, data),
        "and" => {
            let mut last = Value::Null;
            for arg in args {
                last = apply(arg, data)?;
                if !truthy(&last) {
                    break;
                }
            }
            return Ok(last);
        }
        "or" => {
            let mut last = Value::Null;
            for arg in args {
                last = apply(arg, data)?;
                if truthy(&last) {
                    break;
                }
            }
            return Ok(last);
        }
        "map" | "filter" | "all" | "some" | "none" => {
            return apply_iteration(op, &args, data);
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|arg| apply(arg, data))
        .collect::<Result<Vec<_>, _>>()?;
    let arg = |i: usize| values.get(i).unwrap_or(&NULL);

    let result = match op {
        "var" => var(&values, data),
        "missing" => Value::Array(absent_keys(&key_list(&values), data)),
        "missing_some" => {
            let need = to_number(arg(0)).unwrap_or(0.0);
            let keys = match arg(1) {
                Value::Array(keys) => keys.clone(),
                other => vec![other.clone()],
            };
            let listed = key_list(&keys);
            let absent = absent_keys(&listed, data);
            if (listed.len().saturating_sub(absent.len()) as f64) >= need {
                Value::Array(vec![])
            } else {
                Value::Array(absent)
            }
        }
        "==" => Value::Bool(loose_eq(arg(0), arg(1))),
        "!=" => Value::Bool(!loose_eq(arg(0), arg(1))),
        "===" => Value::Bool(strict_eq(arg(0), arg(1))),
        "!==" => Value::Bool(!strict_eq(arg(0), arg(1))),
        "!" => Value::Bool(!truthy(arg(0))),
        "!!" => Value::Bool(truthy(arg(0))),
        "<" => Value::Bool(chain(&values, |o| o == Ordering::Less)),
        "<=" => Value::Bool(chain(&values, |o| o != Ordering::Greater)),
        ">" => Value::Bool(less_than(arg(1), arg(0))),
        ">=" => Value::Bool(matches!(
            compare(arg(0), arg(1)),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        "in" => Value::Bool(match arg(1) {
            Value::String(haystack) => haystack.contains(&to_text(arg(0))),
            Value::Array(items) => items.iter().any(|item| strict_eq(item, arg(0))),
            _ => false,
        }),
        "cat" => Value::String(values.iter().map(to_text).collect()),
        "substr" => substr(arg(0), arg(1), values.get(2)),
        "+" => fold_numbers(&values, 0.0, |acc, n| acc + n),
        "*" => fold_numbers(&values, 1.0, |acc, n| acc * n),
        "-" => match (to_number(arg(0)), values.get(1).map(to_number)) {
            (Some(a), None) => number(-a),
            (Some(a), Some(Some(b))) => number(a - b),
            _ => Value::Null,
        },
        "/" => binary_number(arg(0), arg(1), |a, b| a / b),
        "%" => binary_number(arg(0), arg(1), |a, b| a % b),
        "min" => extreme(&values, |a, b| a < b),
        "max" => extreme(&values, |a, b| a > b),
        "merge" => Value::Array(
            values
                .iter()
                .flat_map(|v| match v {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                })
                .collect(),
        ),
        other => return Err(QueryError::UnknownOperator(other.to_string())),
    };
    Ok(result)
}

fn apply_if(args: &[&Value], data: &Value) -> Result<Value, QueryError> {
    for pair in args.chunks(2) {
        match pair {
            [condition, then] => {
                if truthy(&apply(condition, data)?) {
                    return apply(then, data);
                }
            }
            [otherwise] => return apply(otherwise, data),
            _ => {}
        }
    }
    Ok(Value::Null)
}

fn apply_iteration(op: &str, args: &[&Value], data: &Value) -> Result<Value, QueryError> {
    let items = match apply(args[0], data)? {
        Value::Array(items) => items,
        _ => vec![],
    };
    let logic = args[1];

    match op {
        "map" => items
            .iter()
            .map(|item| apply(logic, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "filter" => {
            let mut kept = Vec::new();
            for item in items {
                if truthy(&apply(logic, &item)?) {
                    kept.push(item);
                }
            }
            Ok(Value::Array(kept))
        }
        "all" => {
            if items.is_empty() {
                return Ok(Value::Bool(false));
            }
            for item in &items {
                if !truthy(&apply(logic, item)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        _ => {
            let mut any = false;
            for item in &items {
                if truthy(&apply(logic, item)?) {
                    any = true;
                    break;
                }
            }
            Ok(Value::Bool(if op == "some" { any } else { !any }))
        }
    }
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }
    if let Some(found) = data.as_object().and_then(|o| o.get(path)) {
        return Some(found);
    }
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn path_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn var(values: &[Value], data: &Value) -> Value {
    let default = values.get(1).cloned().unwrap_or(Value::Null);
    let path = match values.first() {
        Some(path) => path,
        None => return data.clone(),
    };
    match path_of(path).and_then(|p| lookup(data, &p)) {
        Some(Value::Null) | None => default,
        Some(found) => found.clone(),
    }
}

/// A single array argument holds the key list, as produced by a nested `merge`.
fn key_list(keys: &[Value]) -> Vec<&Value> {
    match keys {
        [Value::Array(inner)] => inner.iter().collect(),
        keys => keys.iter().collect(),
    }
}

fn absent_keys(keys: &[&Value], data: &Value) -> Vec<Value> {
    keys.iter()
        .filter(|key| match path_of(key).and_then(|p| lookup(data, &p)) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .map(|key| (*key).clone())
        .collect()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::Array(items) if items.is_empty() => Some(0.0),
        Value::Array(items) if items.len() == 1 => to_number(&items[0]),
        _ => None,
    }
}

fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9007199254740992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9007199254740992.0 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => false,
        _ => a == b,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(_), _)
        | (_, Value::Bool(_))
        | (Value::Number(_), _)
        | (_, Value::Number(_)) => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a)?.partial_cmp(&to_number(b)?),
    }
}

fn less_than(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Less)
}

/// Checks every adjacent pair, which gives `<` and `<=` their three-argument "between" form.
fn chain<F: Fn(Ordering) -> bool>(values: &[Value], accept: F) -> bool {
    values
        .windows(2)
        .all(|pair| compare(&pair[0], &pair[1]).map(&accept).unwrap_or(false))
}

fn fold_numbers<F: Fn(f64, f64) -> f64>(values: &[Value], init: f64, f: F) -> Value {
    values
        .iter()
        .try_fold(init, |acc, v| to_number(v).map(|n| f(acc, n)))
        .map(number)
        .unwrap_or(Value::Null)
}

fn binary_number<F: Fn(f64, f64) -> f64>(a: &Value, b: &Value, f: F) -> Value {
    match (to_number(a), to_number(b)) {
        (Some(x), Some(y)) => number(f(x, y)),
        _ => Value::Null,
    }
}

fn extreme<F: Fn(f64, f64) -> bool>(values: &[Value], better: F) -> Value {
    values
        .iter()
        .map(to_number)
        .collect::<Option<Vec<f64>>>()
        .and_then(|numbers| {
            numbers
                .into_iter()
                .reduce(|best, n| if better(n, best) { n } else { best })
        })
        .map(number)
        .unwrap_or(Value::Null)
}

fn substr(source: &Value, start: &Value, length: Option<&Value>) -> Value {
    let chars: Vec<char> = to_text(source).chars().collect();
    // Bounds stay in f64 until clamped to [0, len].
    let len = chars.len() as f64;
    let start = to_number(start).unwrap_or(0.0).trunc();
    let from = if start < 0.0 { (len + start).max(0.0) } else { start.min(len) };
    let to = match length.and_then(to_number).map(f64::trunc) {
        Some(l) if l < 0.0 => (len + l).max(from),
        Some(l) => (from + l).min(len),
        None => len,
    };
    let (from, to) = (from as usize, to as usize);
    Value::String(chars[from..to.max(from)].iter().collect())
}

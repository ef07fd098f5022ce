use std::cmp::Ordering;

use super::ast::Expr;
use super::interp::{binary, eval, index_value, iterate, Env, Outputs};
use super::QueryError;
use crate::value::{compare, parse_number, Value};

/// Builtin names with the arities they accept.
const BUILTINS: &[(&str, usize)] = &[
    ("length", 0),
    ("keys", 0),
    ("values", 0),
    ("map", 1),
    ("select", 1),
    ("not", 0),
    ("tostring", 0),
    ("tonumber", 0),
    ("type", 0),
    ("join", 1),
    ("first", 0),
    ("first", 1),
    ("last", 0),
    ("has", 1),
    ("add", 0),
    ("empty", 0),
    ("ascii_downcase", 0),
    ("ascii_upcase", 0),
    ("to_entries", 0),
    ("sort", 0),
    ("reverse", 0),
    ("contains", 1),
    ("split", 1),
    ("min", 0),
    ("max", 0),
    ("unique", 0),
];

pub fn is_defined(name: &str, arity: usize) -> bool {
    BUILTINS.iter().any(|(n, a)| *n == name && *a == arity)
}

/// Checks every call in `expr` against the builtin table.
pub fn check_calls(expr: &Expr) -> Result<(), QueryError> {
    let children: Vec<&Expr> = match expr {
        Expr::Identity | Expr::Literal(_) | Expr::Var(_) | Expr::Array(None) => vec![],
        Expr::Index { target, index } => vec![target, index],
        Expr::Iterate(e) | Expr::Optional(e) | Expr::Neg(e) | Expr::Array(Some(e)) => vec![e],
        Expr::Object(entries) => entries
            .iter()
            .flat_map(|(key, value)| {
                let key = match key {
                    super::ast::ObjectKey::Expr(e) => Some(e),
                    super::ast::ObjectKey::Name(_) => None,
                };
                key.into_iter().chain(value.as_ref())
            })
            .collect(),
        Expr::Pipe(l, r) | Expr::Comma(l, r) | Expr::Binary(_, l, r) => vec![l, r],
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            let mut v: Vec<&Expr> = vec![cond, then];
            v.extend(otherwise.as_deref());
            v
        }
        Expr::Call(name, args) => {
            if !is_defined(name, args.len()) {
                return Err(QueryError::Runtime(format!(
                    "{}/{} is not defined",
                    name,
                    args.len()
                )));
            }
            args.iter().collect()
        }
        Expr::Bind { source, body, .. } => vec![source, body],
    };
    children.into_iter().try_for_each(check_calls)
}

fn runtime(message: impl Into<String>) -> QueryError {
    QueryError::Runtime(message.into())
}

fn single(value: Value) -> Outputs {
    Ok(vec![value])
}

fn list_of<'a>(input: &'a Value, name: &str) -> Result<&'a [Value], QueryError> {
    input
        .as_list()
        .ok_or_else(|| runtime(format!("{} cannot be applied to {}", name, input.type_name())))
}

pub fn call(name: &str, args: &[Expr], input: &Value, env: &Env) -> Outputs {
    let marks = input.marks();
    match (name, args) {
        ("empty", []) => Ok(vec![]),
        ("not", []) => single(Value::Bool(!input.truthy())),
        ("type", []) => single(Value::from(input.type_name())),
        ("length", []) => {
            let len = match input.unmarked() {
                Value::Null => Value::Integer(0),
                Value::Bool(_) => return Err(runtime("boolean has no length")),
                Value::Integer(i) => Value::Integer(i.abs()),
                Value::Float(f) => Value::Float(f.abs()),
                Value::String(s) => Value::from(s.chars().count()),
                Value::List(items) => Value::from(items.len()),
                Value::Map(map) => Value::from(map.len()),
                other => return Err(runtime(format!("{} has no length", other.type_name()))),
            };
            single(len.marked(marks))
        }
        ("keys", []) => match input.unmarked() {
            Value::Map(map) => single(Value::list(map.keys().map(|k| Value::from(k.as_str())))),
            Value::List(items) => single(Value::list((0..items.len()).map(Value::from))),
            other => Err(runtime(format!("{} has no keys", other.type_name()))),
        },
        ("values", []) => single(Value::list(iterate(input)?)),
        ("map", [f]) => {
            let mut out = Vec::new();
            for item in iterate(input)? {
                out.extend(eval(f, &item, env)?);
            }
            single(Value::list(out))
        }
        ("select", [f]) => {
            let mut out = Vec::new();
            for cond in eval(f, input, env)? {
                if cond.truthy() {
                    out.push(input.clone());
                }
            }
            Ok(out)
        }
        ("tostring", []) => match input.unmarked() {
            Value::String(_) => single(input.clone()),
            other => single(Value::from(other.to_json().to_string()).marked(marks)),
        },
        ("tonumber", []) => match input.unmarked() {
            Value::Integer(_) | Value::Float(_) => single(input.clone()),
            Value::String(s) => parse_number(s.trim())
                .map(|n| vec![n.marked(marks)])
                .ok_or_else(|| runtime(format!("Cannot parse {:?} as number", s))),
            other => Err(runtime(format!("{} cannot be parsed as a number", other.type_name()))),
        },
        ("join", [sep]) => {
            let items = list_of(input, "join")?;
            let mut out = Vec::new();
            for sep in eval(sep, input, env)? {
                let sep = sep
                    .as_str()
                    .ok_or_else(|| runtime("join separator must be a string"))?;
                let parts = items
                    .iter()
                    .map(|item| match item.unmarked() {
                        Value::Null => Ok(String::new()),
                        Value::String(s) => Ok(s.clone()),
                        v @ (Value::Integer(_) | Value::Float(_) | Value::Bool(_)) => Ok(v.to_string()),
                        other => Err(runtime(format!("Cannot join with {}", other.type_name()))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                out.push(Value::from(parts.join(sep)).marked(marks));
            }
            Ok(out)
        }
        ("first", []) => single(index_value(input, &Value::Integer(0))?),
        ("last", []) => single(index_value(input, &Value::Integer(-1))?),
        ("first", [f]) => Ok(eval(f, input, env)?.into_iter().take(1).collect()),
        ("has", [key]) => {
            let mut out = Vec::new();
            for key in eval(key, input, env)? {
                let found = match (input.unmarked(), key.unmarked()) {
                    (Value::Map(map), Value::String(k)) => map.contains_key(k),
                    (Value::List(items), k) => k
                        .as_i64()
                        .is_some_and(|i| i >= 0 && (i as usize) < items.len()),
                    (i, k) => {
                        return Err(runtime(format!(
                            "Cannot check whether {} has a {} key",
                            i.type_name(),
                            k.type_name()
                        )))
                    }
                };
                out.push(Value::Bool(found));
            }
            Ok(out)
        }
        ("add", []) => {
            let items = iterate(input)?;
            let mut acc = Value::Null;
            for item in &items {
                acc = binary(super::ast::BinOp::Add, &acc, item)?;
            }
            single(acc)
        }
        ("ascii_downcase", []) => input
            .as_str()
            .map(|s| vec![Value::from(s.to_ascii_lowercase()).marked(marks)])
            .ok_or_else(|| runtime("ascii_downcase input must be a string")),
        ("ascii_upcase", []) => input
            .as_str()
            .map(|s| vec![Value::from(s.to_ascii_uppercase()).marked(marks)])
            .ok_or_else(|| runtime("ascii_upcase input must be a string")),
        ("to_entries", []) => match input.unmarked() {
            Value::Map(map) => single(Value::list(map.iter().map(|(k, v)| {
                Value::map([("key", Value::from(k.as_str())), ("value", v.clone())])
            }))),
            other => Err(runtime(format!("{} has no entries", other.type_name()))),
        },
        ("sort", []) => {
            let mut items = list_of(input, "sort")?.to_vec();
            items.sort_by(compare);
            single(Value::list(items).marked(marks))
        }
        ("unique", []) => {
            let mut items = list_of(input, "unique")?.to_vec();
            items.sort_by(compare);
            items.dedup_by(|a, b| compare(a, b) == Ordering::Equal);
            single(Value::list(items).marked(marks))
        }
        ("reverse", []) => match input.unmarked() {
            Value::Null => single(Value::list([])),
            Value::String(s) => single(Value::from(s.chars().rev().collect::<String>()).marked(marks)),
            _ => single(
                Value::list(list_of(input, "reverse")?.iter().rev().cloned()).marked(marks),
            ),
        },
        ("min", []) => single(
            list_of(input, "min")?
                .iter()
                .min_by(|a, b| compare(a, b))
                .cloned()
                .unwrap_or_default(),
        ),
        ("max", []) => single(
            list_of(input, "max")?
                .iter()
                .max_by(|a, b| compare(a, b))
                .cloned()
                .unwrap_or_default(),
        ),
        ("contains", [f]) => {
            let mut out = Vec::new();
            for needle in eval(f, input, env)? {
                out.push(Value::Bool(contains(input, &needle)?));
            }
            Ok(out)
        }
        ("split", [f]) => {
            let s = input
                .as_str()
                .ok_or_else(|| runtime("split input must be a string"))?;
            let mut out = Vec::new();
            for sep in eval(f, input, env)? {
                let sep = sep
                    .as_str()
                    .ok_or_else(|| runtime("split separator must be a string"))?;
                out.push(Value::list(s.split(sep).map(Value::from)).marked(marks));
            }
            Ok(out)
        }
        _ => Err(runtime(format!("{}/{} is not defined", name, args.len()))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, QueryError> {
    match (haystack.unmarked(), needle.unmarked()) {
        (Value::String(h), Value::String(n)) => Ok(h.contains(n.as_str())),
        (Value::List(h), Value::List(n)) => {
            for want in n.iter() {
                let mut found = false;
                for have in h.iter() {
                    if contains(have, want).unwrap_or(false) {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Map(h), Value::Map(n)) => {
            for (key, want) in n.iter() {
                match h.get(key) {
                    Some(have) if contains(have, want)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (h, n) if std::mem::discriminant(h) == std::mem::discriminant(n) => {
            Ok(compare(h, n) == Ordering::Equal)
        }
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Ok(compare(haystack, needle) == Ordering::Equal)
        }
        (h, n) => Err(runtime(format!(
            "{} and {} cannot have their containment checked",
            h.type_name(),
            n.type_name()
        ))),
    }
}

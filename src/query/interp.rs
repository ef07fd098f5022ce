use std::cmp::Ordering;

use super::ast::{BinOp, Expr, ObjectKey};
use super::builtins;
use super::QueryError;
use crate::value::{compare, Map, Value};

pub(crate) type Outputs = Result<Vec<Value>, QueryError>;

/// Variables bound with `as $name`. Later bindings shadow earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: Vec<(String, Value)>,
}

impl Env {
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn with(&self, name: &str, value: Value) -> Env {
        let mut vars = self.vars.clone();
        vars.push((name.to_string(), value));
        Env { vars }
    }
}

fn runtime(message: impl Into<String>) -> QueryError {
    QueryError::Runtime(message.into())
}

fn describe(value: &Value) -> String {
    match value.unmarked() {
        Value::String(s) => format!("{:?}", s),
        other => other.type_name().to_string(),
    }
}

/// Evaluates `expr` against `input`, producing every output in order.
pub fn eval(expr: &Expr, input: &Value, env: &Env) -> Outputs {
    match expr {
        Expr::Identity => Ok(vec![input.clone()]),
        Expr::Literal(v) => Ok(vec![v.clone()]),
        Expr::Index { target, index } => {
            let mut out = Vec::new();
            for t in eval(target, input, env)? {
                for i in eval(index, input, env)? {
                    out.push(index_value(&t, &i)?);
                }
            }
            Ok(out)
        }
        Expr::Iterate(target) => {
            let mut out = Vec::new();
            for t in eval(target, input, env)? {
                out.extend(iterate(&t)?);
            }
            Ok(out)
        }
        Expr::Optional(inner) => Ok(eval(inner, input, env).unwrap_or_default()),
        Expr::Array(None) => Ok(vec![Value::list([])]),
        Expr::Array(Some(inner)) => Ok(vec![Value::list(eval(inner, input, env)?)]),
        Expr::Object(entries) => object(entries, input, env),
        Expr::Pipe(lhs, rhs) => {
            let mut out = Vec::new();
            for v in eval(lhs, input, env)? {
                out.extend(eval(rhs, &v, env)?);
            }
            Ok(out)
        }
        Expr::Comma(lhs, rhs) => {
            let mut out = eval(lhs, input, env)?;
            out.extend(eval(rhs, input, env)?);
            Ok(out)
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let mut out = Vec::new();
            for l in eval(lhs, input, env)? {
                if !l.truthy() {
                    out.push(Value::Bool(false));
                    continue;
                }
                for r in eval(rhs, input, env)? {
                    out.push(Value::Bool(r.truthy()));
                }
            }
            Ok(out)
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let mut out = Vec::new();
            for l in eval(lhs, input, env)? {
                if l.truthy() {
                    out.push(Value::Bool(true));
                    continue;
                }
                for r in eval(rhs, input, env)? {
                    out.push(Value::Bool(r.truthy()));
                }
            }
            Ok(out)
        }
        Expr::Binary(BinOp::Alt, lhs, rhs) => {
            let found: Vec<Value> = eval(lhs, input, env)
                .unwrap_or_default()
                .into_iter()
                .filter(Value::truthy)
                .collect();
            if found.is_empty() {
                eval(rhs, input, env)
            } else {
                Ok(found)
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let mut out = Vec::new();
            for r in eval(rhs, input, env)? {
                for l in eval(lhs, input, env)? {
                    out.push(binary(*op, &l, &r)?);
                }
            }
            Ok(out)
        }
        Expr::Neg(inner) => eval(inner, input, env)?
            .into_iter()
            .map(|v| {
                let marks = v.marks();
                match v.unmarked() {
                    Value::Integer(i) => Ok(i
                        .checked_neg()
                        .map(Value::Integer)
                        .unwrap_or(Value::Float(-(*i as f64)))
                        .marked(marks)),
                    Value::Float(f) => Ok(Value::Float(-f).marked(marks)),
                    other => Err(runtime(format!("{} cannot be negated", other.type_name()))),
                }
            })
            .collect(),
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            let mut out = Vec::new();
            for c in eval(cond, input, env)? {
                if c.truthy() {
                    out.extend(eval(then, input, env)?);
                } else if let Some(otherwise) = otherwise {
                    out.extend(eval(otherwise, input, env)?);
                } else {
                    out.push(input.clone());
                }
            }
            Ok(out)
        }
        Expr::Call(name, args) => builtins::call(name, args, input, env),
        Expr::Var(name) => env
            .lookup(name)
            .cloned()
            .map(|v| vec![v])
            .ok_or_else(|| runtime(format!("${} is not defined", name))),
        Expr::Bind { source, name, body } => {
            let mut out = Vec::new();
            for v in eval(source, input, env)? {
                out.extend(eval(body, input, &env.with(name, v))?);
            }
            Ok(out)
        }
    }
}

pub(crate) fn index_value(target: &Value, index: &Value) -> Result<Value, QueryError> {
    let marks = target.marks();
    let result = match (target.unmarked(), index.unmarked()) {
        (Value::Null, Value::String(_) | Value::Integer(_) | Value::Float(_)) => Value::Null,
        (Value::Map(map), Value::String(key)) => map.get(key).cloned().unwrap_or_default(),
        (Value::List(items), idx @ (Value::Integer(_) | Value::Float(_))) => {
            let i = idx.as_f64().unwrap_or(0.0).floor() as i64;
            let i = if i < 0 { items.len() as i64 + i } else { i };
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or_default()
        }
        (Value::Deferred(_), _) => {
            return Err(runtime("cannot query an unevaluated deferred value"));
        }
        (t, i) => {
            return Err(runtime(format!(
                "Cannot index {} with {}",
                t.type_name(),
                describe(i)
            )))
        }
    };
    Ok(result.marked(marks))
}

pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, QueryError> {
    let marks = value.marks();
    match value.unmarked() {
        Value::List(items) => Ok(items.iter().map(|v| v.clone().marked(marks)).collect()),
        Value::Map(map) => Ok(map.values().map(|v| v.clone().marked(marks)).collect()),
        other => Err(runtime(format!("Cannot iterate over {}", describe(other)))),
    }
}

fn object(entries: &[(ObjectKey, Option<Expr>)], input: &Value, env: &Env) -> Outputs {
    let mut partials = vec![Map::new()];
    for (key, value) in entries {
        let keys: Vec<String> = match key {
            ObjectKey::Name(name) => vec![name.clone()],
            ObjectKey::Expr(expr) => eval(expr, input, env)?
                .into_iter()
                .map(|k| {
                    k.as_str().map(str::to_string).ok_or_else(|| {
                        runtime(format!("Object keys must be strings, got {}", k.type_name()))
                    })
                })
                .collect::<Result<_, _>>()?,
        };
        let values = match (value, key) {
            (Some(expr), _) => eval(expr, input, env)?,
            (None, ObjectKey::Name(name)) => vec![index_value(input, &Value::from(name.as_str()))?],
            (None, ObjectKey::Expr(_)) => return Err(runtime("Object key requires a value")),
        };
        let mut next = Vec::with_capacity(partials.len() * keys.len() * values.len());
        for partial in &partials {
            for k in &keys {
                for v in &values {
                    let mut map = partial.clone();
                    map.insert(k.clone(), v.clone());
                    next.push(map);
                }
            }
        }
        partials = next;
    }
    Ok(partials.into_iter().map(Value::from).collect())
}

fn deep_merge(base: &Map, overlay: &Map) -> Map {
    let mut merged = base.clone();
    for (key, value) in overlay {
        let combined = match (merged.get(key).and_then(Value::as_map), value.as_map()) {
            (Some(existing), Some(incoming)) => Value::from(deep_merge(existing, incoming)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

pub(crate) fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, QueryError> {
    let marks = lhs.marks().union(rhs.marks());
    let (l, r) = (lhs.unmarked(), rhs.unmarked());
    let fail = |verb: &str| {
        runtime(format!(
            "{} ({}) and {} ({}) cannot be {}",
            l.type_name(),
            l,
            r.type_name(),
            r,
            verb
        ))
    };
    let result = match op {
        BinOp::Add => match (l, r) {
            (Value::Null, x) | (x, Value::Null) => x.clone(),
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_add(*b)
                .map(Value::Integer)
                .unwrap_or(Value::Float(*a as f64 + *b as f64)),
            (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
            (Value::List(a), Value::List(b)) => Value::list(a.iter().chain(b.iter()).cloned()),
            (Value::Map(a), Value::Map(b)) => {
                let mut merged = a.as_ref().clone();
                merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
                Value::from(merged)
            }
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => Value::Float(a + b),
                _ => return Err(fail("added")),
            },
        },
        BinOp::Sub => match (l, r) {
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_sub(*b)
                .map(Value::Integer)
                .unwrap_or(Value::Float(*a as f64 - *b as f64)),
            (Value::List(a), Value::List(b)) => {
                Value::list(a.iter().filter(|x| !b.contains(x)).cloned())
            }
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => Value::Float(a - b),
                _ => return Err(fail("subtracted")),
            },
        },
        BinOp::Mul => match (l, r) {
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_mul(*b)
                .map(Value::Integer)
                .unwrap_or(Value::Float(*a as f64 * *b as f64)),
            (Value::Map(a), Value::Map(b)) => Value::from(deep_merge(a, b)),
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => Value::Float(a * b),
                _ => return Err(fail("multiplied")),
            },
        },
        BinOp::Div => match (l, r) {
            (Value::String(a), Value::String(b)) => {
                Value::list(a.split(b.as_str()).map(Value::from))
            }
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(_), Some(b)) if b == 0.0 => {
                    return Err(fail("divided because the divisor is zero"))
                }
                (Some(a), Some(b)) => match (l, r) {
                    (Value::Integer(x), Value::Integer(y)) if x.checked_rem(*y) == Some(0) => {
                        Value::Integer(x / y)
                    }
                    _ => Value::Float(a / b),
                },
                _ => return Err(fail("divided")),
            },
        },
        BinOp::Mod => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => {
                let (a, b) = (a.trunc() as i64, b.trunc() as i64);
                if b == 0 {
                    return Err(fail("divided because the divisor is zero"));
                }
                Value::Integer(a.checked_rem(b).unwrap_or(0))
            }
            _ => return Err(fail("divided")),
        },
        BinOp::Eq => Value::Bool(compare(l, r) == Ordering::Equal),
        BinOp::Ne => Value::Bool(compare(l, r) != Ordering::Equal),
        BinOp::Lt => Value::Bool(compare(l, r) == Ordering::Less),
        BinOp::Le => Value::Bool(compare(l, r) != Ordering::Greater),
        BinOp::Gt => Value::Bool(compare(l, r) == Ordering::Greater),
        BinOp::Ge => Value::Bool(compare(l, r) != Ordering::Less),
        BinOp::And | BinOp::Or | BinOp::Alt => {
            return Err(runtime("logical operators are evaluated lazily"))
        }
    };
    Ok(result.marked(marks))
}

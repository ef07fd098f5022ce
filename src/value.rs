//! Dynamic values flowing through templates, plugins and the query language.
//!
//! [`Value`] is a tagged union over JSON-like data plus two engine-specific variants:
//!
//! - [`Value::Deferred`] holds a computation that can only run once a data context
//!   exists (see [`crate::deferred`]).
//! - [`Value::Marked`] wraps a value with side-channel [`Marks`] such as sensitivity.
//!   Marks survive the deferred-evaluation walk.
//!
//! Lists and maps are reference counted and copied on write, so cloning a whole data
//! context is cheap and mutations of a clone never leak into the original.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::deferred::Deferred;

pub type Map = BTreeMap<String, Value>;

/// Side-channel annotations carried alongside a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Marks {
    /// The value must not be printed in logs or diagnostics.
    pub sensitive: bool,
}

impl Marks {
    pub fn sensitive() -> Self {
        Self { sensitive: true }
    }

    pub fn is_empty(&self) -> bool {
        !self.sensitive
    }

    pub fn union(self, other: Marks) -> Marks {
        Marks {
            sensitive: self.sensitive || other.sensitive,
        }
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Arc<Vec<Value>>),
    Map(Arc<Map>),
    Deferred(Arc<Deferred>),
    Marked(Box<Value>, Marks),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn empty_map() -> Self {
        Value::Map(Arc::new(Map::new()))
    }

    pub fn deferred(deferred: Deferred) -> Self {
        Value::Deferred(Arc::new(deferred))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "object",
            Value::Deferred(_) => "deferred",
            Value::Marked(inner, _) => inner.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.unmarked(), Value::Null)
    }

    /// jq truthiness: everything except `null` and `false`.
    pub fn truthy(&self) -> bool {
        !matches!(self.unmarked(), Value::Null | Value::Bool(false))
    }

    /// The value with any marks peeled off.
    pub fn unmarked(&self) -> &Value {
        match self {
            Value::Marked(inner, _) => inner.unmarked(),
            other => other,
        }
    }

    /// Splits a value into its unmarked form and the marks that were on it.
    pub fn unmark(self) -> (Value, Marks) {
        match self {
            Value::Marked(inner, marks) => {
                let (value, inner_marks) = inner.unmark();
                (value, marks.union(inner_marks))
            }
            other => (other, Marks::default()),
        }
    }

    pub fn marked(self, marks: Marks) -> Value {
        if marks.is_empty() {
            return self;
        }
        let (value, existing) = self.unmark();
        Value::Marked(Box::new(value), existing.union(marks))
    }

    pub fn marks(&self) -> Marks {
        match self {
            Value::Marked(inner, marks) => marks.union(inner.marks()),
            _ => Marks::default(),
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.marks().sensitive
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unmarked() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unmarked() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.unmarked() {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.unmarked() {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self.unmarked() {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self.unmarked() {
            Value::Map(map) => Some(map.as_ref()),
            _ => None,
        }
    }

    /// Mutable access to a map, cloning the underlying storage if it is shared.
    /// `Null` is promoted to an empty map.
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        if matches!(self, Value::Null) {
            *self = Value::empty_map();
        }
        match self {
            Value::Map(map) => Some(Arc::make_mut(map)),
            Value::Marked(inner, _) => inner.as_map_mut(),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(self, |current, key| current.get(key))
    }

    /// Inserts `value` under `key`. Returns `false` when `self` is not a map.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> bool {
        match self.as_map_mut() {
            Some(map) => {
                map.insert(key.into(), value);
                true
            }
            None => false,
        }
    }

    /// Inserts `value` at a nested path, creating intermediate maps as needed.
    pub fn set_path(&mut self, path: &[&str], value: Value) -> bool {
        match path {
            [] => {
                *self = value;
                true
            }
            [key, rest @ ..] => {
                let Some(map) = self.as_map_mut() else {
                    return false;
                };
                let entry = map.entry((*key).to_string()).or_insert(Value::Null);
                entry.set_path(rest, value)
            }
        }
    }

    /// Whether any nested value still needs deferred evaluation.
    pub fn has_deferred(&self) -> bool {
        match self {
            Value::Deferred(_) => true,
            Value::List(items) => items.iter().any(Value::has_deferred),
            Value::Map(map) => map.values().any(Value::has_deferred),
            Value::Marked(inner, _) => inner.has_deferred(),
            _ => false,
        }
    }

    /// Copies the value, giving every nested deferred a fresh, unevaluated memo cell.
    ///
    /// Compiled query programs are shared with the original.
    pub fn instantiate(&self) -> Value {
        if !self.has_deferred() {
            return self.clone();
        }
        match self {
            Value::Deferred(deferred) => Value::Deferred(Arc::new(deferred.fresh())),
            Value::List(items) => Value::list(items.iter().map(Value::instantiate)),
            Value::Map(map) => Value::Map(Arc::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.instantiate()))
                    .collect(),
            )),
            Value::Marked(inner, marks) => Value::Marked(Box::new(inner.instantiate()), *marks),
            other => other.clone(),
        }
    }

    /// Converts to JSON. Unevaluated deferred values become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Deferred(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Marked(inner, _) => inner.to_json(),
        }
    }
}

/// Total order used by comparisons and sorting: null < false < true < numbers <
/// strings < arrays < objects.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null | Value::Deferred(_) => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Integer(_) | Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
            Value::Marked(inner, _) => rank(inner),
        }
    }
    let (a, b) = (a.unmarked(), b.unmarked());
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Map(x), Value::Map(y)) => {
            let keys = x.keys().cmp(y.keys());
            if keys != Ordering::Equal {
                return keys;
            }
            for (l, r) in x.values().zip(y.values()) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Deferred(a), Value::Deferred(b)) => Arc::ptr_eq(a, b),
            (Value::Marked(a, ma), Value::Marked(b, mb)) => ma == mb && a == b,
            (Value::Marked(..), _) | (_, Value::Marked(..)) => false,
            (Value::Deferred(_), _) | (_, Value::Deferred(_)) => false,
            _ => compare(self, other) == Ordering::Equal,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Deferred(deferred) => write!(f, "Deferred({:?})", deferred),
            Value::Marked(_, marks) if marks.sensitive => write!(f, "(sensitive)"),
            Value::Marked(inner, _) => inner.fmt(f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) if x.fract() == 0.0 && x.abs() < 1e17 => write!(f, "{}", *x as i64),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Deferred(_) => write!(f, "<deferred>"),
            Value::Marked(inner, _) => inner.fmt(f),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::list(items.into_iter().map(Value::from)),
            serde_json::Value::Object(map) => Value::map(map.into_iter().map(|(k, v)| (k, v.into()))),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(Arc::new(map))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// The type a consumer declares for a value it receives.
///
/// Results of deferred evaluation are converted in place to the declared type; a
/// failed conversion is reported as a diagnostic by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Any,
    Bool,
    Number,
    String,
    List(Box<ValueType>),
    Map(Box<ValueType>),
}

impl ValueType {
    pub fn convert(&self, value: Value) -> Result<Value, String> {
        let (value, marks) = value.unmark();
        let converted = match (self, value) {
            (ValueType::Any, v) => v,
            (_, Value::Null) => Value::Null,
            (ValueType::Bool, Value::Bool(b)) => Value::Bool(b),
            (ValueType::Bool, Value::String(s)) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => return Err(format!("cannot convert string {:?} to bool", s)),
            },
            (ValueType::Number, v @ (Value::Integer(_) | Value::Float(_))) => v,
            (ValueType::Number, Value::String(s)) => parse_number(s.trim())
                .ok_or_else(|| format!("cannot convert string {:?} to number", s))?,
            (ValueType::String, Value::String(s)) => Value::String(s),
            (ValueType::String, v @ (Value::Integer(_) | Value::Float(_) | Value::Bool(_))) => {
                Value::String(v.to_string())
            }
            (ValueType::List(elem), Value::List(items)) => Value::list(
                items
                    .iter()
                    .map(|item| elem.convert(item.clone()))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            (ValueType::Map(elem), Value::Map(map)) => Value::map(
                map.iter()
                    .map(|(k, v)| elem.convert(v.clone()).map(|v| (k.clone(), v)))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            (expected, v) => {
                return Err(format!(
                    "expected {}, got {}",
                    expected.name(),
                    v.type_name()
                ))
            }
        };
        Ok(converted.marked(marks))
    }

    pub fn name(&self) -> String {
        match self {
            ValueType::Any => "any".to_string(),
            ValueType::Bool => "bool".to_string(),
            ValueType::Number => "number".to_string(),
            ValueType::String => "string".to_string(),
            ValueType::List(elem) => format!("list({})", elem.name()),
            ValueType::Map(elem) => format!("map({})", elem.name()),
        }
    }
}

pub(crate) fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_clone_is_copy_on_write() {
        let original = Value::from(json!({"vars": {"a": 1}}));
        let mut copy = original.clone();
        copy.set_path(&["vars", "b"], Value::from(2));

        assert_eq!(original.get_path(&["vars", "b"]), None);
        assert_eq!(copy.get_path(&["vars", "b"]), Some(&Value::Integer(2)));
        assert_eq!(copy.get_path(&["vars", "a"]), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(compare(&Value::from("a"), &Value::Integer(10)), Ordering::Greater);
        assert_eq!(compare(&Value::Null, &Value::Bool(false)), Ordering::Less);
    }

    #[test]
    fn test_marks_survive_conversion() {
        let secret = Value::from("42").marked(Marks::sensitive());
        let converted = ValueType::Number.convert(secret).unwrap();
        assert!(converted.is_sensitive());
        assert_eq!(converted.unmarked(), &Value::Integer(42));
        assert_eq!(format!("{:?}", converted), "(sensitive)");
    }

    #[test]
    fn test_convert_rejects_mismatched_shapes() {
        let err = ValueType::List(Box::new(ValueType::String))
            .convert(Value::from(json!({"a": 1})))
            .unwrap_err();
        assert_eq!(err, "expected list(string), got object");
    }

    #[test]
    fn test_display_matches_text_output() {
        assert_eq!(Value::Float(2.0).to_string(), "2");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(json!([1, "a"])).to_string(), r#"[1,"a"]"#);
    }
}

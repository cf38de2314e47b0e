// src/core/value.rs

use serde::Serialize;
use serde_json::Number;
use std::cmp::Ordering;
use std::fmt;

pub use serde_json::Value;

/// A stored document. Key order is significant (sort specs, projections, index order).
pub type Document = serde_json::Map<String, Value>;

/// Column type descriptor inferred from document values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DType {
    Int,
    Float,
    String,
    Bool,
    Array,
    Object,
    /// No non-null value seen yet
    Null,
}

impl DType {
    /// Get the type of a single value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => DType::Null,
            Value::Bool(_) => DType::Bool,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    DType::Int
                } else {
                    DType::Float
                }
            }
            Value::String(_) => DType::String,
            Value::Array(_) => DType::Array,
            Value::Object(_) => DType::Object,
        }
    }

    /// Widen two column types into one that holds both
    pub fn merge(self, other: DType) -> DType {
        match (self, other) {
            (a, b) if a == b => a,
            (DType::Null, b) => b,
            (a, DType::Null) => a,
            (DType::Int, DType::Float) | (DType::Float, DType::Int) => DType::Float,
            _ => DType::Object,
        }
    }

    /// Infer the column type of a sequence of values
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> DType {
        values
            .into_iter()
            .fold(DType::Null, |acc, v| acc.merge(DType::of(v)))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Int | DType::Float)
    }

    /// Check if a value is compatible with this type
    pub fn matches(&self, value: &Value) -> bool {
        match (self, DType::of(value)) {
            (_, DType::Null) => true,
            (DType::Object, _) => true,
            (DType::Float, DType::Int) => true,
            (a, b) => *a == b,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Int => write!(f, "INT"),
            DType::Float => write!(f, "FLOAT"),
            DType::String => write!(f, "STRING"),
            DType::Bool => write!(f, "BOOL"),
            DType::Array => write!(f, "ARRAY"),
            DType::Object => write!(f, "OBJECT"),
            DType::Null => write!(f, "NULL"),
        }
    }
}

/// Rank of a value's type in the store's cross-type sort order
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Try to convert to f64
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Build a float value; non-finite results become null
pub fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Build an integer value when `as_int` holds and `f` is integral, otherwise a float
pub fn number_value(f: f64, as_int: bool) -> Value {
    if as_int && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        float_value(f)
    }
}

pub fn is_integer(value: &Value) -> bool {
    matches!(value, Value::Number(n) if n.is_i64() || n.is_u64())
}

/// Total order over values: null < numbers < strings < objects < arrays < bools
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Null, Value::Null) => Ordering::Equal,
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Equality with numeric coercion (1 == 1.0)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y)
                    .all(|((lk, lv), (rk, rv))| lk == rk && values_equal(lv, rv))
        }
        _ => a == b,
    }
}

/// Whether two values live in the same comparison bracket (range operators only compare within one)
pub fn same_bracket(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

/// Stable textual key of a value, used for grouping and alignment
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(|f| f.to_string()).unwrap_or_default(),
        },
        other => other.to_string(),
    }
}

/// Resolve a dotted path inside a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted path inside a document, creating intermediate objects
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !entry.is_object() {
                *entry = Value::Object(Document::new());
            }
            if let Value::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Remove a dotted path from a document, keeping the order of the remaining keys
pub fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            if doc.contains_key(path) {
                *doc = without_keys(doc, &[path]);
            }
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Copy of `doc` without the given top-level keys, preserving order
pub fn without_keys(doc: &Document, keys: &[&str]) -> Document {
    doc.iter()
        .filter(|(k, _)| !keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dtype_inference() {
        assert_eq!(DType::of(&json!(1)), DType::Int);
        assert_eq!(DType::of(&json!(1.5)), DType::Float);
        assert_eq!(DType::infer([&json!(1), &json!(2.5)]), DType::Float);
        assert_eq!(DType::infer([&json!(null), &json!("a")]), DType::String);
        assert_eq!(DType::infer([&json!(1), &json!("a")]), DType::Object);
        assert_eq!(DType::infer(std::iter::empty()), DType::Null);
    }

    #[test]
    fn test_cross_type_ordering() {
        assert_eq!(compare_values(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(10), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10.5)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn test_numeric_equality() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
    }

    #[test]
    fn test_paths() {
        let mut doc = Document::new();
        set_path(&mut doc, "a.b", json!(3));
        assert_eq!(get_path(&doc, "a.b"), Some(&json!(3)));
        assert_eq!(get_path(&doc, "a.c"), None);
    }
}

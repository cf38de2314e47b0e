// src/store/expr.rs
//
// Aggregation expression evaluator. Missing field references evaluate to
// null; `eval_field` distinguishes them where a stage must omit the key.

use super::error::{StoreError, StoreResult};
use crate::core::value::{
    as_f64, compare_values, float_value, get_path, is_integer, number_value, values_equal,
    Document, Value,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::cmp::Ordering;

/// Evaluate an expression against a document
pub fn eval(expr: &Value, doc: &Document) -> StoreResult<Value> {
    Ok(eval_field(expr, doc)?.unwrap_or(Value::Null))
}

/// Evaluate an expression; `None` when it is a reference to a missing field
pub fn eval_field(expr: &Value, doc: &Document) -> StoreResult<Option<Value>> {
    match expr {
        Value::String(s) if s.starts_with("$$") => variable(s, doc).map(Some),
        Value::String(s) if s.starts_with('$') => Ok(resolve_ref(doc, &s[1..])),
        Value::Array(items) => Ok(Some(Value::Array(
            items
                .iter()
                .map(|item| eval(item, doc))
                .collect::<StoreResult<Vec<_>>>()?,
        ))),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some((op, arg)) = map.iter().next() {
                    if op.starts_with('$') {
                        return operator(op, arg, doc).map(Some);
                    }
                }
            }
            let mut out = Document::new();
            for (key, value) in map {
                if key.starts_with('$') {
                    return Err(StoreError::InvalidPipeline(format!(
                        "operator {} must be the only key of an expression",
                        key
                    )));
                }
                if let Some(v) = eval_field(value, doc)? {
                    out.insert(key.clone(), v);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        other => Ok(Some(other.clone())),
    }
}

/// Expression truthiness: false, null, missing and zero are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => true,
    }
}

/// `$a.b` reference; arrays of subdocuments yield the array of their values
fn resolve_ref(doc: &Document, path: &str) -> Option<Value> {
    if let Some(v) = get_path(doc, path) {
        return Some(v.clone());
    }
    let (head, rest) = path.split_once('.')?;
    match doc.get(head)? {
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| item.as_object().and_then(|m| resolve_ref(m, rest)))
                .collect(),
        )),
        _ => None,
    }
}

fn variable(name: &str, doc: &Document) -> StoreResult<Value> {
    let name = &name[2..];
    let (var, path) = match name.split_once('.') {
        Some((var, path)) => (var, Some(path)),
        None => (name, None),
    };
    match var {
        "CURRENT" | "ROOT" => Ok(match path {
            Some(path) => resolve_ref(doc, path).unwrap_or(Value::Null),
            None => Value::Object(doc.clone()),
        }),
        other => Err(StoreError::UnsupportedOperator(format!("$${}", other))),
    }
}

/// First field referenced by an expression, for error reporting
fn field_name(arg: &Value) -> String {
    fn find(arg: &Value) -> Option<String> {
        match arg {
            Value::String(s) if s.starts_with('$') && !s.starts_with("$$") => {
                Some(s[1..].to_string())
            }
            Value::Array(items) => items.iter().find_map(find),
            Value::Object(map) => map.values().find_map(find),
            _ => None,
        }
    }
    find(arg).unwrap_or_else(|| "<expression>".to_string())
}

fn args(arg: &Value) -> Vec<&Value> {
    match arg {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn eval_args(arg: &Value, doc: &Document) -> StoreResult<Vec<Value>> {
    args(arg).into_iter().map(|a| eval(a, doc)).collect()
}

fn arity(op: &str, values: &[Value], n: usize) -> StoreResult<()> {
    if values.len() != n {
        return Err(StoreError::InvalidPipeline(format!(
            "{} expects {} argument(s), got {}",
            op,
            n,
            values.len()
        )));
    }
    Ok(())
}

fn mismatch(op: &str, arg: &Value, message: impl Into<String>) -> StoreError {
    StoreError::TypeMismatch {
        operator: op.to_string(),
        field: field_name(arg),
        message: message.into(),
    }
}

/// Numeric arguments; `None` when any argument is null
fn numbers(op: &str, arg: &Value, values: &[Value]) -> StoreResult<Option<Vec<f64>>> {
    if values.iter().any(Value::is_null) {
        return Ok(None);
    }
    values
        .iter()
        .map(|v| {
            as_f64(v).ok_or_else(|| mismatch(op, arg, format!("only numbers are supported, got {}", v)))
        })
        .collect::<StoreResult<Vec<_>>>()
        .map(Some)
}

fn operator(op: &str, arg: &Value, doc: &Document) -> StoreResult<Value> {
    match op {
        "$literal" => Ok(arg.clone()),
        "$add" | "$multiply" => {
            let values = eval_args(arg, doc)?;
            let all_int = values.iter().all(is_integer);
            let Some(nums) = numbers(op, arg, &values)? else {
                return Ok(Value::Null);
            };
            let result = if op == "$add" {
                nums.iter().sum()
            } else {
                nums.iter().product()
            };
            Ok(number_value(result, all_int))
        }
        "$subtract" | "$divide" | "$mod" | "$pow" => {
            let values = eval_args(arg, doc)?;
            arity(op, &values, 2)?;
            let all_int = values.iter().all(is_integer);
            let Some(nums) = numbers(op, arg, &values)? else {
                return Ok(Value::Null);
            };
            let (a, b) = (nums[0], nums[1]);
            match op {
                "$subtract" => Ok(number_value(a - b, all_int)),
                "$divide" if b == 0.0 => Err(mismatch(op, arg, "can't divide by zero")),
                "$divide" => Ok(float_value(a / b)),
                "$mod" if b == 0.0 => Err(mismatch(op, arg, "can't take modulo by zero")),
                "$mod" => Ok(number_value(a % b, all_int)),
                _ => Ok(number_value(a.powf(b), all_int && b >= 0.0)),
            }
        }
        "$abs" | "$ceil" | "$floor" | "$trunc" | "$sqrt" => {
            let values = eval_args(arg, doc)?;
            arity(op, &values, 1)?;
            let int_input = is_integer(&values[0]);
            let Some(nums) = numbers(op, arg, &values)? else {
                return Ok(Value::Null);
            };
            let x = nums[0];
            Ok(match op {
                "$abs" => number_value(x.abs(), int_input),
                "$ceil" => number_value(x.ceil(), int_input),
                "$floor" => number_value(x.floor(), int_input),
                "$trunc" => number_value(x.trunc(), int_input),
                _ if x < 0.0 => return Err(mismatch(op, arg, "argument must be non-negative")),
                _ => float_value(x.sqrt()),
            })
        }
        "$arrayElemAt" => {
            let values = eval_args(arg, doc)?;
            arity(op, &values, 2)?;
            let items = match &values[0] {
                Value::Null => return Ok(Value::Null),
                Value::Array(items) => items,
                other => return Err(mismatch(op, arg, format!("expected an array, got {}", other))),
            };
            let idx = as_f64(&values[1])
                .filter(|f| f.fract() == 0.0)
                .ok_or_else(|| mismatch(op, arg, "index must be an integral number"))?
                as i64;
            let pos = if idx < 0 { items.len() as i64 + idx } else { idx };
            Ok(usize::try_from(pos)
                .ok()
                .and_then(|p| items.get(p))
                .cloned()
                .unwrap_or(Value::Null))
        }
        "$size" => match eval(single(arg), doc)? {
            Value::Array(items) => Ok(Value::from(items.len() as u64)),
            other => Err(mismatch(op, arg, format!("expected an array, got {}", other))),
        },
        "$objectToArray" => match eval(single(arg), doc)? {
            Value::Object(map) => Ok(Value::Array(
                map.into_iter()
                    .map(|(k, v)| {
                        let mut kv = Document::new();
                        kv.insert("k".to_string(), Value::String(k));
                        kv.insert("v".to_string(), v);
                        Value::Object(kv)
                    })
                    .collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(mismatch(op, arg, format!("expected a document, got {}", other))),
        },
        "$concat" => {
            let values = eval_args(arg, doc)?;
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let mut out = String::new();
            for v in &values {
                out.push_str(
                    v.as_str()
                        .ok_or_else(|| mismatch(op, arg, format!("only strings are supported, got {}", v)))?,
                );
            }
            Ok(Value::String(out))
        }
        "$split" => {
            let values = eval_args(arg, doc)?;
            arity(op, &values, 2)?;
            match (&values[0], &values[1]) {
                (Value::Null, _) => Ok(Value::Null),
                (Value::String(s), Value::String(d)) if !d.is_empty() => Ok(Value::Array(
                    s.split(d.as_str()).map(|p| Value::String(p.to_string())).collect(),
                )),
                _ => Err(mismatch(op, arg, "requires a string and a non-empty delimiter")),
            }
        }
        "$toUpper" | "$toLower" => {
            let s = to_string_value(&eval(single(arg), doc)?);
            Ok(Value::String(if op == "$toUpper" {
                s.to_uppercase()
            } else {
                s.to_lowercase()
            }))
        }
        "$substr" | "$substrBytes" => {
            let values = eval_args(arg, doc)?;
            arity(op, &values, 3)?;
            let s = to_string_value(&values[0]);
            let start = as_f64(&values[1]).ok_or_else(|| mismatch(op, arg, "start must be numeric"))?;
            let len = as_f64(&values[2]).ok_or_else(|| mismatch(op, arg, "length must be numeric"))?;
            let chars = s.chars().skip(start.max(0.0) as usize);
            Ok(Value::String(if len < 0.0 {
                chars.collect()
            } else {
                chars.take(len as usize).collect()
            }))
        }
        "$strcasecmp" => {
            let values = eval_args(arg, doc)?;
            arity(op, &values, 2)?;
            let a = to_string_value(&values[0]).to_lowercase();
            let b = to_string_value(&values[1]).to_lowercase();
            Ok(Value::from(ordering_value(a.cmp(&b))))
        }
        "$strLenBytes" | "$strLenCP" => match eval(single(arg), doc)? {
            Value::String(s) if op == "$strLenBytes" => Ok(Value::from(s.len() as u64)),
            Value::String(s) => Ok(Value::from(s.chars().count() as u64)),
            other => Err(mismatch(op, arg, format!("expected a string, got {}", other))),
        },
        "$indexOfBytes" => {
            let values = eval_args(arg, doc)?;
            match (values.first(), values.get(1)) {
                (Some(Value::Null), _) => Ok(Value::Null),
                (Some(Value::String(s)), Some(Value::String(sub))) => {
                    Ok(Value::from(s.find(sub.as_str()).map_or(-1, |i| i as i64)))
                }
                _ => Err(mismatch(op, arg, "requires two strings")),
            }
        }
        "$toString" => match eval(single(arg), doc)? {
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(to_string_value(&other))),
        },
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$cmp" => {
            let values = eval_args(arg, doc)?;
            arity(op, &values, 2)?;
            let ord = compare_values(&values[0], &values[1]);
            Ok(match op {
                "$eq" => Value::Bool(values_equal(&values[0], &values[1])),
                "$ne" => Value::Bool(!values_equal(&values[0], &values[1])),
                "$gt" => Value::Bool(ord == Ordering::Greater),
                "$gte" => Value::Bool(ord != Ordering::Less),
                "$lt" => Value::Bool(ord == Ordering::Less),
                "$lte" => Value::Bool(ord != Ordering::Greater),
                _ => Value::from(ordering_value(ord)),
            })
        }
        "$and" => Ok(Value::Bool(eval_args(arg, doc)?.iter().all(truthy))),
        "$or" => Ok(Value::Bool(eval_args(arg, doc)?.iter().any(truthy))),
        "$not" => Ok(Value::Bool(!truthy(&eval(single(arg), doc)?))),
        "$cond" => {
            let (cond, then, otherwise) = match arg {
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Value::Object(map) => match (map.get("if"), map.get("then"), map.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => return Err(StoreError::InvalidPipeline("$cond requires if/then/else".to_string())),
                },
                _ => return Err(StoreError::InvalidPipeline("$cond requires 3 arguments".to_string())),
            };
            if truthy(&eval(cond, doc)?) {
                eval(then, doc)
            } else {
                eval(otherwise, doc)
            }
        }
        "$ifNull" => {
            for value in eval_args(arg, doc)? {
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Ok(Value::Null)
        }
        "$year" | "$month" | "$dayOfMonth" | "$hour" | "$minute" | "$second" | "$millisecond"
        | "$dayOfYear" | "$dayOfWeek" | "$week" | "$isoWeek" | "$isoWeekYear"
        | "$isoDayOfWeek" => {
            let target = match arg {
                Value::Object(map) if map.contains_key("date") => &map["date"],
                other => single(other),
            };
            let value = eval(target, doc)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let dt = parse_date(&value)
                .ok_or_else(|| mismatch(op, target, format!("can't convert {} to a date", value)))?;
            Ok(Value::from(date_part(op, &dt)))
        }
        other => Err(StoreError::UnsupportedOperator(other.to_string())),
    }
}

fn single(arg: &Value) -> &Value {
    match arg {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

fn ordering_value(ord: Ordering) -> i64 {
    match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn to_string_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn date_part(op: &str, dt: &NaiveDateTime) -> i64 {
    let dow_from_sunday = dt.weekday().num_days_from_sunday() as i64;
    match op {
        "$year" => dt.year() as i64,
        "$month" => dt.month() as i64,
        "$dayOfMonth" => dt.day() as i64,
        "$hour" => dt.hour() as i64,
        "$minute" => dt.minute() as i64,
        "$second" => dt.second() as i64,
        "$millisecond" => (dt.nanosecond() / 1_000_000).min(999) as i64,
        "$dayOfYear" => dt.ordinal() as i64,
        "$dayOfWeek" => dow_from_sunday + 1,
        // weeks start on Sunday, days before the first Sunday are week 0
        "$week" => (dt.ordinal0() as i64 + 7 - dow_from_sunday) / 7,
        "$isoWeek" => dt.iso_week().week() as i64,
        "$isoWeekYear" => dt.iso_week().year() as i64,
        _ => dt.weekday().number_from_monday() as i64,
    }
}

/// Interpret a value as a UTC timestamp: RFC 3339 / `YYYY-MM-DD[ HH:MM:SS]`
/// strings or `{"$date": string | millis}`
pub fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(dt);
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        Value::Object(map) => match map.get("$date")? {
            Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?).map(|dt| dt.naive_utc()),
            inner => parse_date(inner),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::doc;
    use serde_json::json;

    fn ev(expr: Value, d: Value) -> StoreResult<Value> {
        eval(&expr, &doc(d))
    }

    #[test]
    fn test_field_refs() {
        let d = json!({"a": {"b": 3}, "items": [{"v": 1}, {"v": 2}]});
        assert_eq!(ev(json!("$a.b"), d.clone()).unwrap(), json!(3));
        assert_eq!(ev(json!("$items.v"), d.clone()).unwrap(), json!([1, 2]));
        assert_eq!(ev(json!("$missing"), d.clone()).unwrap(), Value::Null);
        assert_eq!(eval_field(&json!("$missing"), &doc(d)).unwrap(), None);
    }

    #[test]
    fn test_arithmetic() {
        let d = json!({"x": 4, "y": 2.5});
        assert_eq!(ev(json!({"$multiply": ["$x", 5]}), d.clone()).unwrap(), json!(20));
        assert_eq!(ev(json!({"$add": ["$x", "$y"]}), d.clone()).unwrap(), json!(6.5));
        assert_eq!(ev(json!({"$divide": ["$x", 8]}), d.clone()).unwrap(), json!(0.5));
        assert_eq!(
            ev(json!({"$floor": {"$divide": ["$x", 3]}}), d.clone()).unwrap(),
            json!(1.0)
        );
        assert_eq!(ev(json!({"$add": ["$nope", 1]}), d).unwrap(), Value::Null);
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let err = ev(json!({"$multiply": ["$name", 2]}), json!({"name": "bob"})).unwrap_err();
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_strings() {
        let d = json!({"s": "Hello World"});
        assert_eq!(ev(json!({"$toUpper": "$s"}), d.clone()).unwrap(), json!("HELLO WORLD"));
        assert_eq!(ev(json!({"$split": ["$s", " "]}), d.clone()).unwrap(), json!(["Hello", "World"]));
        assert_eq!(ev(json!({"$substr": ["$s", 6, 5]}), d.clone()).unwrap(), json!("World"));
        assert_eq!(ev(json!({"$indexOfBytes": ["$s", "o"]}), d.clone()).unwrap(), json!(4));
        assert_eq!(ev(json!({"$strcasecmp": ["$s", "hello world"]}), d).unwrap(), json!(0));
    }

    #[test]
    fn test_dates() {
        let d = json!({"t": "2021-03-14 15:09:26.535"});
        assert_eq!(ev(json!({"$year": "$t"}), d.clone()).unwrap(), json!(2021));
        assert_eq!(ev(json!({"$dayOfMonth": "$t"}), d.clone()).unwrap(), json!(14));
        assert_eq!(ev(json!({"$millisecond": "$t"}), d.clone()).unwrap(), json!(535));
        // 2021-03-14 is a Sunday
        assert_eq!(ev(json!({"$dayOfWeek": "$t"}), d.clone()).unwrap(), json!(1));
        assert_eq!(ev(json!({"$isoDayOfWeek": "$t"}), d.clone()).unwrap(), json!(7));
        assert_eq!(ev(json!({"$isoWeek": "$t"}), d.clone()).unwrap(), json!(10));
        assert_eq!(ev(json!({"$week": "$t"}), d).unwrap(), json!(11));
    }

    #[test]
    fn test_array_ops() {
        let d = json!({"v": [10, 20, 30]});
        assert_eq!(ev(json!({"$arrayElemAt": ["$v", 1]}), d.clone()).unwrap(), json!(20));
        assert_eq!(ev(json!({"$arrayElemAt": ["$v", -1]}), d.clone()).unwrap(), json!(30));
        assert_eq!(ev(json!({"$arrayElemAt": ["$v", 5]}), d.clone()).unwrap(), Value::Null);
        assert_eq!(ev(json!({"$size": "$v"}), d).unwrap(), json!(3));
    }
}

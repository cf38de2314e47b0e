// src/store/matcher.rs
//
// Filter-document evaluation for the in-process driver.

use super::error::{StoreError, StoreResult};
use super::expr;
use crate::core::value::{as_f64, compare_values, is_integer, same_bracket, values_equal, Document, Value};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

/// Mean earth radius in meters used for spherical distances
const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// Check whether a document satisfies a filter
pub fn matches(doc: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in filter_list(key, cond)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in filter_list(key, cond)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in filter_list(key, cond)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            "$expr" => expr::truthy(&expr::eval(cond, doc)?),
            "$text" => match_text(doc, cond)?,
            "$comment" => true,
            op if op.starts_with('$') => {
                return Err(StoreError::UnsupportedOperator(op.to_string()));
            }
            path => match_field(doc, path, cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn filter_list<'a>(op: &str, cond: &'a Value) -> StoreResult<Vec<&'a Document>> {
    let items = cond
        .as_array()
        .ok_or_else(|| StoreError::InvalidFilter(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| StoreError::InvalidFilter(format!("{} entries must be documents", op)))
        })
        .collect()
}

/// Values reached by a dotted path, descending into arrays of subdocuments
pub fn leaves<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(parts[0]) {
        resolve_all(first, &parts[1..], &mut out);
    }
    out
}

fn resolve_all<'a>(current: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    match parts.split_first() {
        None => out.push(current),
        Some((head, rest)) => match current {
            Value::Object(map) => {
                if let Some(v) = map.get(*head) {
                    resolve_all(v, rest, out);
                }
            }
            Value::Array(items) => {
                if let Ok(i) = head.parse::<usize>() {
                    if let Some(v) = items.get(i) {
                        resolve_all(v, rest, out);
                    }
                } else {
                    for item in items.iter().filter(|i| i.is_object()) {
                        resolve_all(item, parts, out);
                    }
                }
            }
            _ => {}
        },
    }
}

/// Leaf values plus the elements of array leaves
fn candidates<'a>(leaves: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for leaf in leaves {
        out.push(*leaf);
        if let Value::Array(items) = leaf {
            out.extend(items.iter());
        }
    }
    out
}

fn is_operator_doc(cond: &Value) -> Option<&Document> {
    match cond {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => Some(map),
        _ => None,
    }
}

fn match_field(doc: &Document, path: &str, cond: &Value) -> StoreResult<bool> {
    let found = leaves(doc, path);
    match is_operator_doc(cond) {
        Some(ops) => match_operators(path, &found, ops),
        None => Ok(eq_any(&found, cond)),
    }
}

fn eq_any(found: &[&Value], target: &Value) -> bool {
    if target.is_null() && found.iter().all(|v| v.is_null()) {
        return true;
    }
    candidates(found).iter().any(|v| values_equal(v, target))
}

fn compare_any(found: &[&Value], target: &Value, accept: fn(Ordering) -> bool) -> bool {
    candidates(found)
        .iter()
        .any(|v| same_bracket(v, target) && accept(compare_values(v, target)))
}

fn match_operators(path: &str, found: &[&Value], ops: &Document) -> StoreResult<bool> {
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => eq_any(found, arg),
            "$ne" => !eq_any(found, arg),
            "$gt" => compare_any(found, arg, |o| o == Ordering::Greater),
            "$gte" => compare_any(found, arg, |o| o != Ordering::Less),
            "$lt" => compare_any(found, arg, |o| o == Ordering::Less),
            "$lte" => compare_any(found, arg, |o| o != Ordering::Greater),
            "$in" => in_list(op, found, arg)?,
            "$nin" => !in_list(op, found, arg)?,
            "$all" => {
                let items = arg
                    .as_array()
                    .ok_or_else(|| StoreError::InvalidFilter("$all expects an array".to_string()))?;
                !items.is_empty() && items.iter().all(|item| eq_any(found, item))
            }
            "$elemMatch" => elem_match(path, found, arg)?,
            "$size" => {
                let n = arg.as_u64();
                found
                    .iter()
                    .any(|v| matches!(v, Value::Array(items) if Some(items.len() as u64) == n))
            }
            "$exists" => found.is_empty() != expr::truthy(arg),
            "$type" => {
                let wanted: Vec<&Value> = match arg {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                let mut any = false;
                for v in candidates(found) {
                    for t in &wanted {
                        if type_matches(v, t)? {
                            any = true;
                        }
                    }
                }
                any
            }
            "$regex" => {
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                let re = compile_regex(path, arg, options)?;
                regex_any(found, &re)
            }
            "$not" => match is_operator_doc(arg) {
                Some(inner) => !match_operators(path, found, inner)?,
                None => {
                    let re = compile_regex(path, arg, "")?;
                    !regex_any(found, &re)
                }
            },
            "$near" | "$nearSphere" => {
                let (point, max, min) = parse_near(ops)?;
                found.iter().any(|v| {
                    point_of(v).map_or(false, |p| {
                        let d = haversine(point, p);
                        max.map_or(true, |m| d <= m) && min.map_or(true, |m| d >= m)
                    })
                })
            }
            "$options" | "$maxDistance" | "$minDistance" => true,
            other => return Err(StoreError::UnsupportedOperator(other.to_string())),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(op: &str, found: &[&Value], arg: &Value) -> StoreResult<bool> {
    let items = arg
        .as_array()
        .ok_or_else(|| StoreError::InvalidFilter(format!("{} expects an array", op)))?;
    Ok(items.iter().any(|item| eq_any(found, item)))
}

fn elem_match(path: &str, found: &[&Value], arg: &Value) -> StoreResult<bool> {
    let sub = arg
        .as_object()
        .ok_or_else(|| StoreError::InvalidFilter("$elemMatch expects a document".to_string()))?;
    for leaf in found {
        if let Value::Array(items) = leaf {
            for item in items {
                let ok = match is_operator_doc(arg) {
                    Some(ops) => match_operators(path, &[item], ops)?,
                    None => match item {
                        Value::Object(inner) => matches(inner, sub)?,
                        _ => false,
                    },
                };
                if ok {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn compile_regex(path: &str, pattern: &Value, options: &str) -> StoreResult<Regex> {
    let pattern = pattern.as_str().ok_or_else(|| StoreError::InvalidRegex {
        field: path.to_string(),
        message: "pattern must be a string".to_string(),
    })?;
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|e| StoreError::InvalidRegex {
            field: path.to_string(),
            message: e.to_string(),
        })
}

fn regex_any(found: &[&Value], re: &Regex) -> bool {
    candidates(found)
        .iter()
        .any(|v| v.as_str().map_or(false, |s| re.is_match(s)))
}

fn type_matches(value: &Value, wanted: &Value) -> StoreResult<bool> {
    let name = match wanted {
        Value::String(s) => s.as_str(),
        Value::Number(n) => match n.as_i64() {
            Some(1) => "double",
            Some(2) => "string",
            Some(3) => "object",
            Some(4) => "array",
            Some(8) => "bool",
            Some(9) => "date",
            Some(10) => "null",
            Some(16) => "int",
            Some(18) => "long",
            _ => return Err(StoreError::InvalidFilter(format!("unknown $type {}", n))),
        },
        other => return Err(StoreError::InvalidFilter(format!("unknown $type {}", other))),
    };
    Ok(match name {
        "double" => value.is_f64(),
        "int" | "long" => is_integer(value),
        "number" => value.is_number(),
        "string" => value.is_string(),
        "object" => value.is_object() && value.get("$date").is_none(),
        "array" => value.is_array(),
        "bool" => value.is_boolean(),
        "date" => expr::parse_date(value).is_some(),
        "null" => value.is_null(),
        other => return Err(StoreError::InvalidFilter(format!("unknown $type {}", other))),
    })
}

fn match_text(doc: &Document, cond: &Value) -> StoreResult<bool> {
    let search = cond
        .get("$search")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidFilter("$text requires $search".to_string()))?
        .to_lowercase();
    let terms: Vec<&str> = search.split_whitespace().collect();
    Ok(doc.values().any(|v| {
        v.as_str().map_or(false, |s| {
            let s = s.to_lowercase();
            terms.iter().any(|t| s.contains(t))
        })
    }))
}

/// Longitude/latitude of a GeoJSON point or `[lon, lat]` pair
pub fn point_of(value: &Value) -> Option<(f64, f64)> {
    let coords = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("coordinates")?.as_array()?,
        _ => return None,
    };
    Some((as_f64(coords.first()?)?, as_f64(coords.get(1)?)?))
}

/// Great-circle distance in meters
pub fn haversine(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lon2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let h = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn parse_near(ops: &Document) -> StoreResult<((f64, f64), Option<f64>, Option<f64>)> {
    let near = ops
        .get("$near")
        .or_else(|| ops.get("$nearSphere"))
        .ok_or_else(|| StoreError::InvalidFilter("missing $near".to_string()))?;
    let (geometry, inner) = match near {
        Value::Object(map) => (map.get("$geometry").unwrap_or(near), Some(map)),
        other => (other, None),
    };
    let point = point_of(geometry)
        .ok_or_else(|| StoreError::InvalidFilter("$near requires a point".to_string()))?;
    let bound = |key: &str| {
        inner
            .and_then(|m| m.get(key))
            .or_else(|| ops.get(key))
            .and_then(as_f64)
    };
    Ok((point, bound("$maxDistance"), bound("$minDistance")))
}

/// The field and reference point of a top-level `$near` condition, if any
pub fn near_point(filter: &Document) -> StoreResult<Option<(String, (f64, f64))>> {
    for (key, cond) in filter {
        if let Some(ops) = is_operator_doc(cond) {
            if ops.contains_key("$near") || ops.contains_key("$nearSphere") {
                let (point, _, _) = parse_near(ops)?;
                return Ok(Some((key.clone(), point)));
            }
        }
    }
    Ok(None)
}

/// Distance of a document's location field to a point; unlocated documents sort last
pub fn distance_to(doc: &Document, path: &str, point: (f64, f64)) -> f64 {
    leaves(doc, path)
        .iter()
        .filter_map(|v| point_of(v))
        .map(|p| haversine(point, p))
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::doc;
    use serde_json::json;

    fn check(d: Value, f: Value) -> bool {
        matches(&doc(d), &doc(f)).unwrap()
    }

    #[test]
    fn test_equality_and_ranges() {
        assert!(check(json!({"a": 1}), json!({"a": 1.0})));
        assert!(check(json!({"a": 5}), json!({"a": {"$gt": 1, "$lte": 5}})));
        assert!(!check(json!({"a": "5"}), json!({"a": {"$gt": 1}})));
        assert!(check(json!({"a": [1, 7]}), json!({"a": {"$gt": 5}})));
        assert!(check(json!({"b": 1}), json!({"a": null})));
    }

    #[test]
    fn test_logical_operators() {
        let d = json!({"a": 1, "b": 2});
        assert!(check(d.clone(), json!({"$or": [{"a": 2}, {"b": 2}]})));
        assert!(!check(d.clone(), json!({"$nor": [{"a": 1}]})));
        assert!(check(d, json!({"$and": [{"a": 1}, {"b": {"$in": [2, 3]}}]})));
    }

    #[test]
    fn test_nested_paths() {
        let d = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert!(check(d.clone(), json!({"a.b.c": 2})));
        assert!(check(d.clone(), json!({"a.b": {"$elemMatch": {"c": {"$gte": 2}}}})));
        assert!(check(d, json!({"a.b": {"$size": 2}})));
    }

    #[test]
    fn test_regex_and_types() {
        let d = json!({"name": "Alice", "n": 1.5});
        assert!(check(d.clone(), json!({"name": {"$regex": "^al", "$options": "i"}})));
        assert!(check(d.clone(), json!({"n": {"$type": "double"}})));
        assert!(!check(d.clone(), json!({"name": {"$type": "number"}})));
        let err = matches(&doc(d), &doc(json!({"name": {"$regex": "(["}}))).unwrap_err();
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_near() {
        let d = json!({"loc": {"type": "Point", "coordinates": [8.54, 47.37]}});
        let near = json!({"loc": {"$near": {"$geometry": {"type": "Point", "coordinates": [8.55, 47.37]}, "$maxDistance": 2000}}});
        assert!(check(d.clone(), near));
        let far = json!({"loc": {"$near": {"$geometry": {"type": "Point", "coordinates": [9.0, 47.0]}, "$maxDistance": 2000}}});
        assert!(!check(d, far));
    }

    #[test]
    fn test_unknown_operator() {
        let err = matches(&doc(json!({"a": 1})), &doc(json!({"$where": "true"}))).unwrap_err();
        assert_eq!(err, StoreError::UnsupportedOperator("$where".to_string()));
    }
}

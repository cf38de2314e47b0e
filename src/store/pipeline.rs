// src/store/pipeline.rs
//
// Aggregation stage evaluator for the in-process driver.

use super::error::{StoreError, StoreResult};
use super::{expr, matcher};
use crate::core::value::{
    as_f64, compare_values, float_value, get_path, is_integer, number_value, remove_path,
    set_path, value_key, values_equal, Document, Value,
};
use std::collections::HashMap;

/// Access to sibling collections for `$lookup` and `$out`
pub trait PipelineHost {
    fn load(&self, collection: &str) -> StoreResult<Vec<Document>>;

    fn replace(&self, collection: &str, docs: Vec<Document>) -> StoreResult<()>;
}

/// Run a pipeline over a document stream
pub fn run(
    docs: Vec<Document>,
    pipeline: &[Document],
    host: &dyn PipelineHost,
) -> StoreResult<Vec<Document>> {
    let mut docs = docs;
    for stage in pipeline {
        let (name, spec) = single_key(stage)?;
        tracing::trace!(stage = %name, input = docs.len(), "executing stage");
        docs = match name.as_str() {
            "$match" => {
                let filter = as_doc(name, spec)?;
                let mut out = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matcher::matches(&doc, filter)? {
                        out.push(doc);
                    }
                }
                out
            }
            "$project" => {
                let spec = as_doc(name, spec)?;
                docs.iter()
                    .map(|doc| project(doc, spec))
                    .collect::<StoreResult<Vec<_>>>()?
            }
            "$addFields" | "$set" => {
                let spec = as_doc(name, spec)?;
                let mut out = Vec::with_capacity(docs.len());
                for mut doc in docs {
                    for (key, e) in spec {
                        if let Some(v) = expr::eval_field(e, &doc)? {
                            set_path(&mut doc, key, v);
                        }
                    }
                    out.push(doc);
                }
                out
            }
            "$group" => group(&docs, as_doc(name, spec)?)?,
            "$sort" => sort_docs(docs, as_doc(name, spec)?)?,
            "$skip" => {
                let n = count_arg(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = count_arg(name, spec)?;
                docs.into_iter().take(n).collect()
            }
            "$facet" => {
                let mut out = Document::new();
                for (branch, stages) in as_doc(name, spec)? {
                    let stages = stages
                        .as_array()
                        .ok_or_else(|| invalid(format!("$facet branch '{}' must be an array", branch)))?
                        .iter()
                        .map(|s| as_doc("$facet", s).cloned())
                        .collect::<StoreResult<Vec<_>>>()?;
                    let result = run(docs.clone(), &stages, host)?;
                    out.insert(
                        branch.clone(),
                        Value::Array(result.into_iter().map(Value::Object).collect()),
                    );
                }
                vec![out]
            }
            "$unwind" => unwind(docs, spec)?,
            "$lookup" => lookup(docs, as_doc(name, spec)?, host)?,
            "$out" => {
                let target = match spec {
                    Value::String(s) => s.as_str(),
                    Value::Object(map) => map
                        .get("coll")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid("$out requires a collection name"))?,
                    _ => return Err(invalid("$out requires a collection name")),
                };
                host.replace(target, docs)?;
                Vec::new()
            }
            "$replaceRoot" | "$replaceWith" => {
                let new_root = if name == "$replaceRoot" {
                    as_doc(name, spec)?
                        .get("newRoot")
                        .ok_or_else(|| invalid("$replaceRoot requires newRoot"))?
                } else {
                    spec
                };
                docs.iter()
                    .map(|doc| match expr::eval(new_root, doc)? {
                        Value::Object(map) => Ok(map),
                        other => Err(invalid(format!(
                            "'newRoot' must evaluate to a document, got {}",
                            other
                        ))),
                    })
                    .collect::<StoreResult<Vec<_>>>()?
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .ok_or_else(|| invalid("$count requires a field name"))?;
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Document::new();
                    out.insert(field.to_string(), Value::from(docs.len() as u64));
                    vec![out]
                }
            }
            other => return Err(StoreError::UnsupportedOperator(other.to_string())),
        };
    }
    Ok(docs)
}

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidPipeline(msg.into())
}

fn single_key(stage: &Document) -> StoreResult<(&String, &Value)> {
    match (stage.len(), stage.iter().next()) {
        (1, Some(kv)) => Ok(kv),
        _ => Err(invalid(format!(
            "a stage must have exactly one key, got {}",
            Value::Object(stage.clone())
        ))),
    }
}

fn as_doc<'a>(stage: &str, spec: &'a Value) -> StoreResult<&'a Document> {
    spec.as_object()
        .ok_or_else(|| invalid(format!("{} requires a document", stage)))
}

fn count_arg(stage: &str, spec: &Value) -> StoreResult<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(format!("{} requires a non-negative integer", stage)))
}

/// Inclusion/exclusion flag of a projection entry
fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().map_or(false, |f| f != 0.0)),
        _ => None,
    }
}

/// Apply a `$project` (or find projection) to one document
pub fn project(doc: &Document, spec: &Document) -> StoreResult<Document> {
    let fields: Vec<(&String, &Value)> = spec.iter().filter(|(k, _)| *k != "_id").collect();
    let exclusion = fields.iter().all(|(_, v)| flag(v) == Some(false))
        && (!fields.is_empty() || spec.get("_id").and_then(flag) == Some(false));

    if exclusion {
        let mut out = doc.clone();
        for (key, _) in spec.iter().filter(|(_, v)| flag(v) == Some(false)) {
            remove_path(&mut out, key);
        }
        return Ok(out);
    }

    let mut out = Document::new();
    match spec.get("_id") {
        None => {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        Some(v) => match flag(v) {
            Some(true) => {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id".to_string(), id.clone());
                }
            }
            Some(false) => {}
            None => {
                if let Some(id) = expr::eval_field(v, doc)? {
                    out.insert("_id".to_string(), id);
                }
            }
        },
    }
    for (key, value) in fields {
        match flag(value) {
            Some(true) => {
                if let Some(v) = get_path(doc, key) {
                    set_path(&mut out, key, v.clone());
                }
            }
            Some(false) => {
                return Err(invalid(format!(
                    "cannot exclude '{}' in an inclusion projection",
                    key
                )))
            }
            None => {
                if let Some(v) = expr::eval_field(value, doc)? {
                    set_path(&mut out, key, v);
                }
            }
        }
    }
    Ok(out)
}

/// Stable multi-key sort
pub fn sort_docs(mut docs: Vec<Document>, spec: &Document) -> StoreResult<Vec<Document>> {
    let keys = spec
        .iter()
        .map(|(k, v)| match v.as_i64() {
            Some(1) => Ok((k.as_str(), false)),
            Some(-1) => Ok((k.as_str(), true)),
            _ => Err(invalid(format!("sort direction of '{}' must be 1 or -1", k))),
        })
        .collect::<StoreResult<Vec<_>>>()?;
    let null = Value::Null;
    docs.sort_by(|a, b| {
        for (key, desc) in &keys {
            let ord = compare_values(
                get_path(a, key).unwrap_or(&null),
                get_path(b, key).unwrap_or(&null),
            );
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(docs)
}

enum AccState {
    Sum { total: f64, all_int: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
    StdDev { values: Vec<f64>, sample: bool },
}

impl AccState {
    fn new(op: &str) -> StoreResult<Self> {
        Ok(match op {
            "$sum" => AccState::Sum {
                total: 0.0,
                all_int: true,
            },
            "$avg" => AccState::Avg {
                total: 0.0,
                count: 0,
            },
            "$min" => AccState::Min(None),
            "$max" => AccState::Max(None),
            "$first" => AccState::First(None),
            "$last" => AccState::Last(None),
            "$push" => AccState::Push(Vec::new()),
            "$addToSet" => AccState::AddToSet(Vec::new()),
            "$stdDevSamp" => AccState::StdDev {
                values: Vec::new(),
                sample: true,
            },
            "$stdDevPop" => AccState::StdDev {
                values: Vec::new(),
                sample: false,
            },
            other => return Err(StoreError::UnsupportedOperator(other.to_string())),
        })
    }

    fn update(&mut self, value: Option<Value>) {
        let want_less = matches!(self, AccState::Min(_));
        match self {
            AccState::Sum { total, all_int } => {
                if let Some(v) = value {
                    if let Some(f) = as_f64(&v) {
                        *total += f;
                        *all_int &= is_integer(&v);
                    }
                }
            }
            AccState::Avg { total, count } => {
                if let Some(f) = value.as_ref().and_then(as_f64) {
                    *total += f;
                    *count += 1;
                }
            }
            AccState::Min(current) | AccState::Max(current) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    let replace = match current {
                        None => true,
                        Some(cur) => {
                            let ord = compare_values(&v, cur);
                            if want_less {
                                ord == std::cmp::Ordering::Less
                            } else {
                                ord == std::cmp::Ordering::Greater
                            }
                        }
                    };
                    if replace {
                        *current = Some(v);
                    }
                }
            }
            AccState::First(current) => {
                if current.is_none() {
                    *current = Some(value.unwrap_or(Value::Null));
                }
            }
            AccState::Last(current) => *current = Some(value.unwrap_or(Value::Null)),
            AccState::Push(items) => {
                if let Some(v) = value {
                    items.push(v);
                }
            }
            AccState::AddToSet(items) => {
                if let Some(v) = value {
                    if !items.iter().any(|i| values_equal(i, &v)) {
                        items.push(v);
                    }
                }
            }
            AccState::StdDev { values, .. } => {
                if let Some(f) = value.as_ref().and_then(as_f64) {
                    values.push(f);
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            AccState::Sum { total, all_int } => number_value(total, all_int),
            AccState::Avg { total, count } if count > 0 => float_value(total / count as f64),
            AccState::Avg { .. } => Value::Null,
            AccState::Min(v) | AccState::Max(v) | AccState::First(v) | AccState::Last(v) => {
                v.unwrap_or(Value::Null)
            }
            AccState::Push(items) | AccState::AddToSet(items) => Value::Array(items),
            AccState::StdDev { values, sample } => {
                let n = values.len() as f64;
                let dof = if sample { n - 1.0 } else { n };
                if dof <= 0.0 {
                    return Value::Null;
                }
                let mean = values.iter().sum::<f64>() / n;
                let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
                float_value((ss / dof).sqrt())
            }
        }
    }
}

fn group(docs: &[Document], spec: &Document) -> StoreResult<Vec<Document>> {
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| invalid("$group requires an _id"))?;
    let accumulators = spec
        .iter()
        .filter(|(k, _)| *k != "_id")
        .map(|(name, acc)| {
            let acc = acc
                .as_object()
                .filter(|m| m.len() == 1)
                .ok_or_else(|| invalid(format!("accumulator '{}' must be a single-operator document", name)))?;
            let (op, arg) = acc.iter().next().ok_or_else(|| invalid("empty accumulator"))?;
            Ok((name.clone(), op.clone(), arg))
        })
        .collect::<StoreResult<Vec<_>>>()?;

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Value, Vec<AccState>)> = HashMap::new();
    for doc in docs {
        let key = expr::eval(id_expr, doc)?;
        let key_str = value_key(&key);
        if !groups.contains_key(&key_str) {
            let states = accumulators
                .iter()
                .map(|(_, op, _)| AccState::new(op))
                .collect::<StoreResult<Vec<_>>>()?;
            order.push(key_str.clone());
            groups.insert(key_str.clone(), (key, states));
        }
        if let Some((_, states)) = groups.get_mut(&key_str) {
            for ((_, _, arg), state) in accumulators.iter().zip(states.iter_mut()) {
                state.update(expr::eval_field(arg, doc)?);
            }
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key_str in order {
        if let Some((key, states)) = groups.remove(&key_str) {
            let mut doc = Document::new();
            doc.insert("_id".to_string(), key);
            for ((name, _, _), state) in accumulators.iter().zip(states) {
                doc.insert(name.clone(), state.finish());
            }
            out.push(doc);
        }
    }
    Ok(out)
}

fn unwind(docs: Vec<Document>, spec: &Value) -> StoreResult<Vec<Document>> {
    let (path, index_field, preserve) = match spec {
        Value::String(s) => (s.as_str(), None, false),
        Value::Object(map) => (
            map.get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("$unwind requires a path"))?,
            map.get("includeArrayIndex").and_then(Value::as_str),
            map.get("preserveNullAndEmptyArrays")
                .map_or(false, expr::truthy),
        ),
        _ => return Err(invalid("$unwind requires a path")),
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| invalid("$unwind path must start with '$'"))?;

    let mut out = Vec::new();
    for doc in docs {
        match get_path(&doc, path).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (i, item) in items.into_iter().enumerate() {
                    let mut d = doc.clone();
                    set_path(&mut d, path, item);
                    if let Some(field) = index_field {
                        d.insert(field.to_string(), Value::from(i as u64));
                    }
                    out.push(d);
                }
            }
            Some(Value::Array(_)) => {
                if preserve {
                    let mut d = doc;
                    remove_path(&mut d, path);
                    if let Some(field) = index_field {
                        d.insert(field.to_string(), Value::Null);
                    }
                    out.push(d);
                }
            }
            Some(Value::Null) | None => {
                if preserve {
                    let mut d = doc;
                    if let Some(field) = index_field {
                        d.insert(field.to_string(), Value::Null);
                    }
                    out.push(d);
                }
            }
            Some(_) => {
                let mut d = doc;
                if let Some(field) = index_field {
                    d.insert(field.to_string(), Value::Null);
                }
                out.push(d);
            }
        }
    }
    Ok(out)
}

fn lookup(
    docs: Vec<Document>,
    spec: &Document,
    host: &dyn PipelineHost,
) -> StoreResult<Vec<Document>> {
    let field = |key: &str| {
        spec.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("$lookup requires '{}'", key)))
    };
    let (from, local, foreign, as_field) = (
        field("from")?,
        field("localField")?,
        field("foreignField")?,
        field("as")?,
    );
    let others = host.load(from)?;
    let null = Value::Null;

    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let local_values: Vec<Value> = match get_path(&doc, local) {
            Some(Value::Array(items)) => items.clone(),
            Some(v) => vec![v.clone()],
            None => vec![Value::Null],
        };
        let joined: Vec<Value> = others
            .iter()
            .filter(|other| {
                let found = matcher::leaves(other, foreign);
                local_values.iter().any(|lv| {
                    if found.is_empty() {
                        return values_equal(lv, &null);
                    }
                    found.iter().any(|fv| match fv {
                        Value::Array(items) => items.iter().any(|i| values_equal(i, lv)),
                        v => values_equal(v, lv),
                    })
                })
            })
            .map(|other| Value::Object(other.clone()))
            .collect();
        set_path(&mut doc, as_field, Value::Array(joined));
        out.push(doc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::doc;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Host {
        other: Vec<Document>,
        written: Mutex<Option<(String, usize)>>,
    }

    impl PipelineHost for Host {
        fn load(&self, _collection: &str) -> StoreResult<Vec<Document>> {
            Ok(self.other.clone())
        }

        fn replace(&self, collection: &str, docs: Vec<Document>) -> StoreResult<()> {
            if let Ok(mut w) = self.written.lock() {
                *w = Some((collection.to_string(), docs.len()));
            }
            Ok(())
        }
    }

    fn docs(values: Value) -> Vec<Document> {
        values
            .as_array()
            .map(|items| items.iter().cloned().map(doc).collect())
            .unwrap_or_default()
    }

    fn stages(values: Value) -> Vec<Document> {
        docs(values)
    }

    #[test]
    fn test_group_sum_and_sort() {
        let input = docs(json!([{"x": 2, "y": 1}, {"x": 1, "y": 1}, {"x": 2, "y": 1}]));
        let out = run(
            input,
            &stages(json!([
                {"$group": {"_id": {"x": "$x"}, "y": {"$sum": "$y"}, "n": {"$sum": 1}}},
                {"$sort": {"_id.x": 1}}
            ])),
            &Host::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["_id"], json!({"x": 1}));
        assert_eq!(out[1]["y"], json!(2));
        assert_eq!(out[1]["n"], json!(2));
    }

    #[test]
    fn test_project_modes() {
        let d = doc(json!({"_id": 1, "a": 1, "b": {"c": 2}}));
        let inc = project(&d, &doc(json!({"b.c": 1, "z": {"$add": ["$a", 1]}}))).unwrap();
        assert_eq!(Value::Object(inc), json!({"_id": 1, "b": {"c": 2}, "z": 2}));
        let exc = project(&d, &doc(json!({"_id": 0, "a": 0}))).unwrap();
        assert_eq!(Value::Object(exc), json!({"b": {"c": 2}}));
    }

    #[test]
    fn test_unwind_preserves_index() {
        let input = docs(json!([{"a": [1, 2]}, {"a": []}, {"b": 1}]));
        let spec = json!({"$unwind": {"path": "$a", "includeArrayIndex": "_index_a"}});
        let out = run(input.clone(), &stages(json!([spec])), &Host::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["_index_a"], json!(1));

        let spec = json!({"$unwind": {"path": "$a", "preserveNullAndEmptyArrays": true}});
        let out = run(input, &stages(json!([spec])), &Host::default()).unwrap();
        assert_eq!(out.len(), 4);
        assert!(!out[2].contains_key("a"));
    }

    #[test]
    fn test_facet_and_flatten() {
        let input = docs(json!([{"x": 3}, {"x": 1}, {"x": 2}]));
        let out = run(
            input,
            &stages(json!([
                {"$facet": {
                    "lo": [{"$sort": {"x": 1}}, {"$limit": 1}],
                    "hi": [{"$sort": {"x": -1}}, {"$limit": 1}]
                }},
                {"$project": {"value": {"$objectToArray": "$$CURRENT"}}},
                {"$unwind": "$value"},
                {"$replaceRoot": {"newRoot": {"k": "$value.k", "v": "$value.v"}}}
            ])),
            &Host::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["k"], json!("lo"));
        assert_eq!(out[1]["v"], json!([{"x": 3}]));
    }

    #[test]
    fn test_lookup_and_out() {
        let host = Host {
            other: docs(json!([{"k": 1, "v": "a"}, {"k": 2, "v": "b"}])),
            ..Default::default()
        };
        let input = docs(json!([{"k": 2}, {"k": 3}]));
        let out = run(
            input,
            &stages(json!([
                {"$lookup": {"from": "right", "localField": "k", "foreignField": "k", "as": "r"}},
                {"$out": "joined"}
            ])),
            &host,
        )
        .unwrap();
        assert!(out.is_empty());
        let written = host.written.lock().unwrap().clone();
        assert_eq!(written, Some(("joined".to_string(), 2)));
    }

    #[test]
    fn test_std_dev_and_count() {
        let input = docs(json!([{"x": 2}, {"x": 4}, {"x": 4}, {"x": 4}, {"x": 5}, {"x": 5}, {"x": 7}, {"x": 9}]));
        let out = run(
            input.clone(),
            &stages(json!([{"$group": {"_id": null, "s": {"$stdDevPop": "$x"}}}])),
            &Host::default(),
        )
        .unwrap();
        assert_eq!(out[0]["s"], json!(2.0));
        let out = run(input, &stages(json!([{"$count": "n"}])), &Host::default()).unwrap();
        assert_eq!(out[0]["n"], json!(8));
    }

    #[test]
    fn test_unknown_stage() {
        let err = run(vec![], &stages(json!([{"$bogus": {}}])), &Host::default()).unwrap_err();
        assert_eq!(err, StoreError::UnsupportedOperator("$bogus".to_string()));
    }
}

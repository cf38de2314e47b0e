// src/query/mongoq.rs
//
// Composable filter expressions compiled into native filter documents.
//
// Composition is recorded, not normalized: `a & b` appends `(And, b)` to a
// copy of `a`, and compilation folds the list left to right. Consecutive
// links with the same combinator share one `$and`/`$or` list, a change of
// combinator wraps everything accumulated so far. `(a & b) | c` and
// `a & (b | c)` therefore compile to different documents.

use super::ops::{self, NearSpec};
use crate::core::value::{as_f64, without_keys, Document, Value};
use crate::engine::error::{EngineError, Result};
use std::ops::{BitAnd, BitOr, Not};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    fn key(self) -> &'static str {
        match self {
            Combinator::And => "$and",
            Combinator::Or => "$or",
        }
    }
}

/// Condition operators accepted as `field__op` suffixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
    All,
    ElemMatch,
    Exists,
    Type,
    Regex,
    Between,
    IsNull,
    Near,
    Contains,
    StartsWith,
    EndsWith,
    IsString,
    IsArray,
    IsDouble,
    IsObject,
    IsDate,
    IsBool,
    IsInt,
}

const OPS: &[(&str, Op)] = &[
    ("eq", Op::Eq),
    ("ne", Op::Ne),
    ("lt", Op::Lt),
    ("lte", Op::Lte),
    ("gt", Op::Gt),
    ("gte", Op::Gte),
    ("in", Op::In),
    ("nin", Op::Nin),
    ("all", Op::All),
    ("elemmatch", Op::ElemMatch),
    ("exists", Op::Exists),
    ("type", Op::Type),
    ("regex", Op::Regex),
    ("between", Op::Between),
    ("isnull", Op::IsNull),
    ("near", Op::Near),
    ("contains", Op::Contains),
    ("startswith", Op::StartsWith),
    ("endswith", Op::EndsWith),
    ("isstring", Op::IsString),
    ("isarray", Op::IsArray),
    ("isdouble", Op::IsDouble),
    ("isobject", Op::IsObject),
    ("isdate", Op::IsDate),
    ("isbool", Op::IsBool),
    ("isint", Op::IsInt),
    ("islong", Op::IsInt),
];

impl Op {
    fn lookup(name: &str) -> Option<Op> {
        OPS.iter().find(|(n, _)| *n == name).map(|(_, op)| *op)
    }
}

/// Split `a__b__op` into (`a.b`, `op`); dunder-prefixed names are plain columns
fn parse_key(key: &str) -> (String, Option<String>) {
    if key.contains("__") && !key.starts_with("__") {
        let parts: Vec<&str> = key.split("__").collect();
        let (op, field) = parts.split_last().map_or(("", &parts[..]), |(op, f)| (*op, f));
        (field.join("."), Some(op.to_string()))
    } else {
        (key.to_string(), None)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Seed {
    Conditions(Vec<(String, Value)>),
    Group(Box<MongoQ>),
}

/// A boolean filter expression over document fields.
///
/// Conditions of one `MongoQ` are ANDed. Keys are `field` or `field__op`,
/// e.g. `MongoQ::new().with("year__gte", 2015)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MongoQ {
    seed: Seed,
    qlist: Vec<(Combinator, MongoQ)>,
    negate: bool,
}

impl Default for MongoQ {
    fn default() -> Self {
        Self::new()
    }
}

impl MongoQ {
    /// An empty expression, matching everything
    pub fn new() -> Self {
        Self {
            seed: Seed::Conditions(Vec::new()),
            qlist: Vec::new(),
            negate: false,
        }
    }

    /// Add a condition
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self.seed {
            Seed::Conditions(conditions) if self.qlist.is_empty() && !self.negate => {
                conditions.push((key.into(), value.into()));
                self
            }
            _ => self & MongoQ::new().with(key, value),
        }
    }

    /// Conditions from a document of `field__op: value` pairs
    pub fn from_document(doc: &Document) -> Self {
        doc.iter()
            .fold(MongoQ::new(), |q, (k, v)| q.with(k.clone(), v.clone()))
    }

    /// Explicit grouping: all of the given expressions, each compiled as a unit
    pub fn all_of(queries: impl IntoIterator<Item = MongoQ>) -> Self {
        Self::grouped(queries, Combinator::And)
    }

    /// Explicit grouping: any of the given expressions, each compiled as a unit
    pub fn any_of(queries: impl IntoIterator<Item = MongoQ>) -> Self {
        Self::grouped(queries, Combinator::Or)
    }

    fn grouped(queries: impl IntoIterator<Item = MongoQ>, combinator: Combinator) -> Self {
        let mut iter = queries.into_iter();
        let Some(first) = iter.next() else {
            return MongoQ::new();
        };
        Self {
            seed: Seed::Group(Box::new(first)),
            qlist: iter.map(|q| (combinator, q)).collect(),
            negate: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.seed, Seed::Conditions(c) if c.is_empty())
            && self.qlist.is_empty()
            && !self.negate
    }

    fn combine(self, combinator: Combinator, other: MongoQ) -> Self {
        // a negated expression is closed: further links apply to the negation as a whole
        let mut q = if self.negate {
            Self {
                seed: Seed::Group(Box::new(self)),
                qlist: Vec::new(),
                negate: false,
            }
        } else {
            self
        };
        q.qlist.push((combinator, other));
        q
    }

    pub fn and(self, other: MongoQ) -> Self {
        self.combine(Combinator::And, other)
    }

    pub fn or(self, other: MongoQ) -> Self {
        self.combine(Combinator::Or, other)
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Compile into a native filter document
    pub fn compile(&self) -> Result<Document> {
        let mut query = match &self.seed {
            Seed::Conditions(conditions) => build_conditions(conditions)?,
            Seed::Group(q) => q.compile()?,
        };
        let mut current: Option<Combinator> = None;
        for (combinator, q) in &self.qlist {
            let other = Value::Object(q.compile()?);
            let key = combinator.key();
            match query.get_mut(key) {
                Some(Value::Array(items)) if current == Some(*combinator) => items.push(other),
                _ => {
                    let mut wrapped = Document::new();
                    wrapped.insert(
                        key.to_string(),
                        Value::Array(vec![Value::Object(query), other]),
                    );
                    query = wrapped;
                    current = Some(*combinator);
                }
            }
        }
        if self.negate {
            query = ops::nor(vec![query]);
        }
        Ok(query)
    }

    /// Whether results come back in an operator-implied order (`$near` distance)
    pub fn sorted(&self) -> bool {
        self.compile()
            .map(|q| contains_key(&Value::Object(q), "$near"))
            .unwrap_or(false)
    }
}

fn contains_key(value: &Value, key: &str) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(k, v)| k == key || contains_key(v, key)),
        Value::Array(items) => items.iter().any(|v| contains_key(v, key)),
        _ => false,
    }
}

/// Add a condition, moving both into `$and` when the key is already present
fn addq(query: &mut Document, key: &str, value: Value) {
    if !query.contains_key(key) {
        query.insert(key.to_string(), value);
        return;
    }
    let previous = query.get(key).cloned().unwrap_or(Value::Null);
    *query = without_keys(query, &[key]);
    let mut items = match query.get("$and") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    for v in [previous, value] {
        match v {
            Value::Array(list) if key == "$and" => items.extend(list),
            other => {
                let mut cond = Document::new();
                cond.insert(key.to_string(), other);
                items.push(Value::Object(cond));
            }
        }
    }
    query.insert("$and".to_string(), Value::Array(items));
}

fn op_doc(op: &str, value: Value) -> Value {
    let mut doc = Document::new();
    doc.insert(op.to_string(), value);
    Value::Object(doc)
}

fn require_array(field: &str, op: &str, value: &Value) -> Result<()> {
    if value.is_array() {
        Ok(())
    } else {
        Err(EngineError::Compile(format!(
            "{}__{} expects a list, got {}",
            field, op, value
        )))
    }
}

fn build_conditions(conditions: &[(String, Value)]) -> Result<Document> {
    let mut query = Document::new();
    for (key, value) in conditions {
        let (field, op_name) = parse_key(key);
        let Some(op_name) = op_name else {
            addq(&mut query, &field, value.clone());
            continue;
        };
        let Some(op) = Op::lookup(&op_name) else {
            // not an operator: a nested attribute, e.g. key__subkey=value
            addq(&mut query, &format!("{}.{}", field, op_name), value.clone());
            continue;
        };
        let v = value.clone();
        match op {
            Op::Eq => addq(&mut query, &field, v),
            Op::Ne => addq(&mut query, &field, op_doc("$ne", v)),
            Op::Lt => addq(&mut query, &field, op_doc("$lt", v)),
            Op::Lte => addq(&mut query, &field, op_doc("$lte", v)),
            Op::Gt => addq(&mut query, &field, op_doc("$gt", v)),
            Op::Gte => addq(&mut query, &field, op_doc("$gte", v)),
            Op::In | Op::Nin | Op::All => {
                require_array(&field, &op_name, &v)?;
                let name = match op {
                    Op::In => "$in",
                    Op::Nin => "$nin",
                    _ => "$all",
                };
                addq(&mut query, &field, op_doc(name, v));
            }
            Op::ElemMatch => addq(&mut query, &field, op_doc("$elemMatch", v)),
            Op::Exists => addq(&mut query, &field, op_doc("$exists", v)),
            Op::Type => addq(&mut query, &field, op_doc("$type", v)),
            Op::Regex => addq(&mut query, &field, op_doc("$regex", v)),
            Op::Between => {
                let bounds = v.as_array().filter(|b| b.len() == 2).ok_or_else(|| {
                    EngineError::Compile(format!(
                        "{}__between expects [low, high], got {}",
                        field, v
                    ))
                })?;
                let lower = Value::Object(
                    [(field.clone(), op_doc("$gte", bounds[0].clone()))].into_iter().collect(),
                );
                let upper = Value::Object(
                    [(field.clone(), op_doc("$lte", bounds[1].clone()))].into_iter().collect(),
                );
                addq(&mut query, "$and", Value::Array(vec![lower, upper]));
            }
            Op::IsNull => {
                let cond = if crate::store::expr::truthy(&v) {
                    op_doc("$eq", Value::Null)
                } else {
                    op_doc("$ne", Value::Null)
                };
                addq(&mut query, &field, cond);
            }
            Op::Near => addq(&mut query, &field, ops::near(parse_near(&field, &v)?)),
            Op::Contains | Op::StartsWith | Op::EndsWith => {
                let text = match &v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let pattern = match op {
                    Op::Contains => format!(".*{}.*", text),
                    Op::StartsWith => format!("^{}.*", text),
                    _ => format!(".*{}$", text),
                };
                addq(&mut query, &field, op_doc("$regex", Value::String(pattern)));
            }
            Op::IsString => addq(&mut query, &field, op_doc("$type", Value::from("string"))),
            Op::IsArray => addq(&mut query, &field, op_doc("$type", Value::from("array"))),
            Op::IsDouble => addq(&mut query, &field, op_doc("$type", Value::from("double"))),
            Op::IsObject => addq(&mut query, &field, op_doc("$type", Value::from("object"))),
            Op::IsDate => addq(&mut query, &field, op_doc("$type", Value::from("date"))),
            Op::IsBool => addq(&mut query, &field, op_doc("$type", Value::from("bool"))),
            Op::IsInt => addq(&mut query, &field, op_doc("$type", Value::from("long"))),
        }
    }
    Ok(query)
}

fn coordinates(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Array(items) if items.len() == 2 => Some((as_f64(&items[0])?, as_f64(&items[1])?)),
        Value::Object(map) => coordinates(
            map.get("coordinates")
                .or_else(|| map.get("geometry").and_then(|g| g.get("coordinates")))?,
        ),
        Value::String(s) => {
            let (lon, lat) = s.split_once(',')?;
            Some((lon.trim().parse().ok()?, lat.trim().parse().ok()?))
        }
        _ => None,
    }
}

/// `{location, maxd, mind}`, `[lon, lat]`, `[lon, lat, maxd]` or `[lon, lat, mind, maxd]`
fn parse_near(field: &str, value: &Value) -> Result<NearSpec> {
    let invalid = || EngineError::Compile(format!("{}__near: invalid location {}", field, value));
    let num = |v: &Value| as_f64(v).ok_or_else(invalid);
    match value {
        Value::Object(map) if map.contains_key("location") => {
            let (lon, lat) = map.get("location").and_then(coordinates).ok_or_else(invalid)?;
            Ok(NearSpec {
                lon,
                lat,
                max_distance: map.get("maxd").map(&num).transpose()?,
                min_distance: map.get("mind").map(&num).transpose()?,
            })
        }
        Value::Array(items) => {
            let (lon, lat, min, max) = match items.as_slice() {
                [lon, lat] => (num(lon)?, num(lat)?, None, None),
                [lon, lat, maxd] => (num(lon)?, num(lat)?, None, Some(num(maxd)?)),
                [lon, lat, mind, maxd] => (num(lon)?, num(lat)?, Some(num(mind)?), Some(num(maxd)?)),
                _ => return Err(invalid()),
            };
            Ok(NearSpec {
                lon,
                lat,
                max_distance: max,
                min_distance: min,
            })
        }
        other => {
            let (lon, lat) = coordinates(other).ok_or_else(invalid)?;
            Ok(NearSpec {
                lon,
                lat,
                max_distance: None,
                min_distance: None,
            })
        }
    }
}

impl BitAnd for MongoQ {
    type Output = MongoQ;

    fn bitand(self, rhs: MongoQ) -> MongoQ {
        self.and(rhs)
    }
}

impl BitOr for MongoQ {
    type Output = MongoQ;

    fn bitor(self, rhs: MongoQ) -> MongoQ {
        self.or(rhs)
    }
}

impl Not for MongoQ {
    type Output = MongoQ;

    fn not(self) -> MongoQ {
        self.negated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn q(key: &str, value: Value) -> MongoQ {
        MongoQ::new().with(key, value)
    }

    fn compiled(q: &MongoQ) -> Value {
        Value::Object(q.compile().unwrap())
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(parse_key("a"), ("a".to_string(), None));
        assert_eq!(parse_key("a__gt"), ("a".to_string(), Some("gt".to_string())));
        assert_eq!(parse_key("a__b__gt"), ("a.b".to_string(), Some("gt".to_string())));
        assert_eq!(parse_key("__dunder"), ("__dunder".to_string(), None));
    }

    #[test]
    fn test_unknown_suffix_is_nested_field() {
        assert_eq!(compiled(&q("a__sub", json!(1))), json!({"a.sub": 1}));
    }

    #[test]
    fn test_duplicate_field_moves_into_and() {
        let query = MongoQ::new().with("a", 1).with("a__gt", 0);
        assert_eq!(compiled(&query), json!({"$and": [{"a": 1}, {"a": {"$gt": 0}}]}));
    }

    #[test]
    fn test_between_and_isnull() {
        assert_eq!(
            compiled(&q("x__between", json!([1, 5]))),
            json!({"$and": [{"x": {"$gte": 1}}, {"x": {"$lte": 5}}]})
        );
        assert_eq!(compiled(&q("x__isnull", json!(true))), json!({"x": {"$eq": null}}));
        assert_eq!(compiled(&q("x__isnull", json!(false))), json!({"x": {"$ne": null}}));
        assert!(matches!(
            q("x__between", json!([1])).compile(),
            Err(EngineError::Compile(_))
        ));
    }

    #[test]
    fn test_string_ops() {
        assert_eq!(compiled(&q("s__startswith", json!("ab"))), json!({"s": {"$regex": "^ab.*"}}));
        assert_eq!(compiled(&q("s__endswith", json!("ab"))), json!({"s": {"$regex": ".*ab$"}}));
        assert_eq!(compiled(&q("s__contains", json!("ab"))), json!({"s": {"$regex": ".*ab.*"}}));
    }

    #[test]
    fn test_near_forms() {
        let near = q("loc__near", json!({"location": [8.5, 47.3], "maxd": 100}));
        assert_eq!(
            compiled(&near),
            json!({"loc": {"$near": {"$geometry": {"type": "Point", "coordinates": [8.5, 47.3]}, "$maxDistance": 100.0}}})
        );
        assert!(near.sorted());
        let arr = q("loc__near", json!([8.5, 47.3, 10, 100]));
        assert_eq!(compiled(&arr)["loc"]["$near"]["$minDistance"], json!(10.0));
        assert!(q("loc__near", json!("nowhere")).compile().is_err());
        assert!(!q("a", json!(1)).sorted());
    }

    #[test]
    fn test_and_or_fold() {
        let a = q("a", json!(1));
        let b = q("b", json!(2));
        let c = q("c", json!(3));
        assert_eq!(compiled(&(a.clone() & b.clone())), json!({"$and": [{"a": 1}, {"b": 2}]}));
        assert_eq!(
            compiled(&(a.clone() & b.clone() & c.clone())),
            json!({"$and": [{"a": 1}, {"b": 2}, {"c": 3}]})
        );
        let left = (a.clone() & b.clone()) | c.clone();
        let right = a & (b | c);
        assert_eq!(
            compiled(&left),
            json!({"$or": [{"$and": [{"a": 1}, {"b": 2}]}, {"c": 3}]})
        );
        assert_eq!(
            compiled(&right),
            json!({"$and": [{"a": 1}, {"$or": [{"b": 2}, {"c": 3}]}]})
        );
        assert_ne!(compiled(&left), compiled(&right));
    }

    #[test]
    fn test_negation() {
        let a = q("a", json!(1));
        assert_eq!(compiled(&!a.clone()), json!({"$nor": [{"a": 1}]}));
        let excl = a.clone() & !q("b", json!(2));
        assert_eq!(
            compiled(&excl),
            json!({"$and": [{"a": 1}, {"$nor": [{"b": 2}]}]})
        );
        let neg_first = !a & q("b", json!(2));
        assert_eq!(
            compiled(&neg_first),
            json!({"$and": [{"$nor": [{"a": 1}]}, {"b": 2}]})
        );
    }

    #[test]
    fn test_explicit_grouping() {
        let any = MongoQ::any_of([q("a", json!(1)), q("b", json!(2)), q("c", json!(3))]);
        assert_eq!(
            compiled(&any),
            json!({"$or": [{"a": 1}, {"b": 2}, {"c": 3}]})
        );
        assert!(MongoQ::all_of(Vec::new()).is_empty());
    }

    #[test]
    fn test_compile_is_idempotent() {
        let query = (q("a__gt", json!(1)) | q("b", json!(2))) & q("c__in", json!([1, 2]));
        assert_eq!(query.compile().unwrap(), query.compile().unwrap());
    }
}

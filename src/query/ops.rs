// src/query/ops.rs
//
// Stage and operator builders for the native aggregation language.

use crate::core::value::{Document, Value};
use crate::engine::error::{EngineError, Result};
use crate::store::IndexDirection;
use serde_json::json;
use std::fmt;

/// Pipeline stage kinds produced by the builders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Match,
    Project,
    Group,
    Sort,
    Skip,
    Limit,
    Facet,
    Unwind,
    Lookup,
    Out,
    Set,
    ReplaceRoot,
}

const STAGES: &[(StageKind, &str)] = &[
    (StageKind::Match, "$match"),
    (StageKind::Project, "$project"),
    (StageKind::Group, "$group"),
    (StageKind::Sort, "$sort"),
    (StageKind::Skip, "$skip"),
    (StageKind::Limit, "$limit"),
    (StageKind::Facet, "$facet"),
    (StageKind::Unwind, "$unwind"),
    (StageKind::Lookup, "$lookup"),
    (StageKind::Out, "$out"),
    (StageKind::Set, "$set"),
    (StageKind::ReplaceRoot, "$replaceRoot"),
];

impl StageKind {
    pub fn name(self) -> &'static str {
        STAGES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map_or("", |(_, name)| name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        STAGES.iter().find(|(_, n)| *n == name).map(|(kind, _)| *kind)
    }

    /// Kind of a single-key stage document
    pub fn of(stage: &Document) -> Option<Self> {
        match stage.len() {
            1 => stage.keys().next().and_then(|k| Self::from_name(k)),
            _ => None,
        }
    }

    /// Build a stage document of this kind
    pub fn stage(self, spec: Value) -> Document {
        let mut doc = Document::new();
        doc.insert(self.name().to_string(), spec);
        doc
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Body of a stage document, if it is of the given kind
pub fn stage_body(stage: &Document, kind: StageKind) -> Option<&Value> {
    (StageKind::of(stage) == Some(kind))
        .then(|| stage.get(kind.name()))
        .flatten()
}

/// Mutable body of a stage document, if it is of the given kind
pub fn stage_body_mut(stage: &mut Document, kind: StageKind) -> Option<&mut Document> {
    if StageKind::of(stage) != Some(kind) {
        return None;
    }
    stage.get_mut(kind.name()).and_then(Value::as_object_mut)
}

fn wrap(op: &str, value: Value) -> Document {
    let mut doc = Document::new();
    doc.insert(op.to_string(), value);
    doc
}

pub fn match_stage(filter: Document) -> Document {
    StageKind::Match.stage(Value::Object(filter))
}

pub fn or(filters: Vec<Document>) -> Document {
    wrap("$or", Value::Array(filters.into_iter().map(Value::Object).collect()))
}

pub fn and(filters: Vec<Document>) -> Document {
    wrap("$and", Value::Array(filters.into_iter().map(Value::Object).collect()))
}

pub fn nor(filters: Vec<Document>) -> Document {
    wrap("$nor", Value::Array(filters.into_iter().map(Value::Object).collect()))
}

pub fn not(condition: Value) -> Document {
    wrap("$not", condition)
}

pub fn sum(expr: Value) -> Value {
    Value::Object(wrap("$sum", expr))
}

pub fn count() -> Value {
    sum(Value::from(1))
}

/// `$group` keyed by the given columns (`a__b` refers to `a.b`); no columns groups everything
pub fn group(columns: &[&str], accumulators: Document) -> Document {
    let id = if columns.is_empty() {
        Value::Null
    } else {
        Value::Object(
            columns
                .iter()
                .map(|c| (c.to_string(), Value::String(format!("${}", c.replace("__", ".")))))
                .collect(),
        )
    };
    let mut spec = Document::new();
    spec.insert("_id".to_string(), id);
    spec.extend(accumulators);
    StageKind::Group.stage(Value::Object(spec))
}

/// `$sort` from a key/direction document
pub fn sort(keys: Document) -> Document {
    StageKind::Sort.stage(Value::Object(keys))
}

/// `$project` including (or excluding) the given fields
pub fn project(fields: &[&str], include: bool) -> Document {
    let flag = if include { 1 } else { 0 };
    StageKind::Project.stage(Value::Object(
        fields
            .iter()
            .map(|f| (f.to_string(), Value::from(flag)))
            .collect(),
    ))
}

pub fn skip(n: usize) -> Document {
    StageKind::Skip.stage(Value::from(n as u64))
}

pub fn limit(n: usize) -> Document {
    StageKind::Limit.stage(Value::from(n as u64))
}

/// `$facet` with one sub-pipeline per branch
pub fn facet(branches: Vec<(String, Vec<Document>)>) -> Document {
    StageKind::Facet.stage(Value::Object(
        branches
            .into_iter()
            .map(|(name, stages)| {
                (
                    name,
                    Value::Array(stages.into_iter().map(Value::Object).collect()),
                )
            })
            .collect(),
    ))
}

/// `$lookup` joining `other` on `left_key == right_key` into `target`
/// (default `<other>_<right_key>`)
pub fn lookup(other: &str, left_key: &str, right_key: &str, target: Option<&str>) -> Document {
    let target = target
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}_{}", other, right_key));
    StageKind::Lookup.stage(json!({
        "from": other,
        "localField": left_key,
        "foreignField": right_key,
        "as": target,
    }))
}

#[derive(Debug, Clone, Copy)]
pub struct UnwindOptions {
    /// Emit documents whose array is missing, null or empty
    pub preserve_null_and_empty: bool,
    /// Record the array position as `_index_<field>`
    pub include_index: bool,
}

impl Default for UnwindOptions {
    fn default() -> Self {
        Self {
            preserve_null_and_empty: false,
            include_index: true,
        }
    }
}

/// Name of the array-position field written by `unwind`
pub fn unwind_index_field(field: &str) -> String {
    format!("_index_{}", field)
}

pub fn unwind(field: &str, options: UnwindOptions) -> Document {
    let mut spec = Document::new();
    spec.insert("path".to_string(), Value::String(format!("${}", field)));
    spec.insert(
        "preserveNullAndEmptyArrays".to_string(),
        Value::Bool(options.preserve_null_and_empty),
    );
    if options.include_index {
        spec.insert(
            "includeArrayIndex".to_string(),
            Value::String(unwind_index_field(field)),
        );
    }
    StageKind::Unwind.stage(Value::Object(spec))
}

pub fn out(collection: &str) -> Document {
    StageKind::Out.stage(Value::String(collection.to_string()))
}

pub fn set(column: &str, value: Value) -> Document {
    StageKind::Set.stage(json!({ column: value }))
}

pub fn replace_root(field: &str) -> Document {
    StageKind::ReplaceRoot.stage(json!({ "newRoot": format!("${}", field) }))
}

/// Full-text search condition
pub fn search(text: &str) -> Document {
    wrap("$text", json!({ "$search": text }))
}

/// Substring condition
pub fn contains(text: &str) -> Value {
    json!({ "$regex": format!(".*{}.*", text) })
}

/// A `$near` condition around a point, distances in meters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearSpec {
    pub lon: f64,
    pub lat: f64,
    pub max_distance: Option<f64>,
    pub min_distance: Option<f64>,
}

pub fn near(spec: NearSpec) -> Value {
    let mut inner = Document::new();
    inner.insert(
        "$geometry".to_string(),
        json!({ "type": "Point", "coordinates": [spec.lon, spec.lat] }),
    );
    if let Some(max) = spec.max_distance {
        inner.insert("$maxDistance".to_string(), json!(max));
    }
    if let Some(min) = spec.min_distance {
        inner.insert("$minDistance".to_string(), json!(min));
    }
    Value::Object(wrap("$near", Value::Object(inner)))
}

/// Index keys plus a name that is stable for the same column specs
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub keys: Document,
    pub name: String,
}

fn parse_column_spec(spec: &str) -> Result<(String, IndexDirection)> {
    let (direction, column) = match spec.chars().next() {
        Some('+') => (IndexDirection::Ascending, &spec[1..]),
        Some('-') => (IndexDirection::Descending, &spec[1..]),
        Some('@') => (IndexDirection::Geo2dSphere, &spec[1..]),
        _ => (IndexDirection::Ascending, spec),
    };
    if column.is_empty() {
        return Err(EngineError::Compile(format!("invalid column spec '{}'", spec)));
    }
    Ok((column.to_string(), direction))
}

/// Index specification from `+col` / `-col` / `@col` specs (no prefix means ascending)
pub fn make_index(columns: &[&str]) -> Result<IndexSpec> {
    if columns.is_empty() {
        return Err(EngineError::Compile("an index needs at least one column".to_string()));
    }
    let mut keys = Document::new();
    for spec in columns {
        let (column, direction) = parse_column_spec(spec)?;
        keys.insert(column, direction.to_value());
    }
    let name = humanize_index(&keys);
    Ok(IndexSpec { keys, name })
}

/// Sort key document from `+col` / `-col` specs
pub fn make_sortkey(columns: &[&str]) -> Result<Document> {
    let mut keys = Document::new();
    for spec in columns {
        match parse_column_spec(spec)? {
            (_, IndexDirection::Geo2dSphere) | (_, IndexDirection::Text) => {
                return Err(EngineError::Compile(format!("'{}' is not a sort key", spec)))
            }
            (column, direction) => {
                keys.insert(column, direction.to_value());
            }
        }
    }
    Ok(keys)
}

/// Readable index name, e.g. `asc_a_desc_b`
pub fn humanize_index(keys: &Document) -> String {
    keys.iter()
        .map(|(column, direction)| {
            let label = match direction {
                Value::String(s) if s == "2dsphere" => "geo",
                Value::String(s) if s == "text" => "text",
                v if v.as_i64() == Some(-1) => "desc",
                _ => "asc",
            };
            format!("{}_{}", label, column)
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// All keys of a document and its nested documents, depth-first
pub fn flatten_keys(doc: &Document) -> Vec<String> {
    let mut keys: Vec<String> = doc.keys().cloned().collect();
    for value in doc.values() {
        if let Value::Object(inner) = value {
            keys.extend(flatten_keys(inner));
        }
    }
    keys
}

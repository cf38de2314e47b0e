// src/store/memory.rs

use super::error::{StoreError, StoreResult};
use super::pipeline::{self, PipelineHost};
use super::{
    matcher, AggregateOptions, Collection, Cursor, Database, FindOptions, IndexInfo,
    IndexOptions,
};
use crate::core::value::{
    as_f64, get_path, number_value, is_integer, remove_path, set_path, values_equal, Document,
    Value,
};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeMap<String, CollectionData>,
    next_id: u64,
}

impl Inner {
    fn assign_id(&mut self, doc: Document) -> Document {
        if doc.contains_key("_id") {
            return doc;
        }
        self.next_id += 1;
        let mut out = Document::new();
        out.insert("_id".to_string(), Value::from(self.next_id));
        out.extend(doc);
        out
    }
}

/// In-process database executing the native query and aggregation language.
///
/// Handles are cheap clones sharing the same data; locks are only held while
/// reading or writing collection contents, never while a pipeline runs.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    name: String,
    inner: Arc<RwLock<Inner>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Shared handle, usable wherever a `Database` is expected
    pub fn handle(&self) -> Arc<dyn Database> {
        Arc::new(self.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> StoreResult<T> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> StoreResult<T> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut guard))
    }

    fn snapshot(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.read(|inner| {
            inner
                .collections
                .get(collection)
                .map(|c| c.docs.clone())
                .unwrap_or_default()
        })
    }
}

impl PipelineHost for MemoryDatabase {
    fn load(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.snapshot(collection)
    }

    fn replace(&self, collection: &str, docs: Vec<Document>) -> StoreResult<()> {
        self.write(|inner| {
            let docs: Vec<Document> = docs.into_iter().map(|d| inner.assign_id(d)).collect();
            inner.collections.entry(collection.to_string()).or_default().docs = docs;
        })
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MemoryCollection {
            db: self.clone(),
            name: name.to_string(),
        })
    }

    fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.write(|inner| {
            inner.collections.remove(name);
        })
    }

    fn list_collection_names(&self) -> StoreResult<Vec<String>> {
        self.read(|inner| inner.collections.keys().cloned().collect())
    }

    fn relink(&self) -> Arc<dyn Database> {
        tracing::trace!(db = %self.name, "relinking connection");
        Arc::new(self.clone())
    }
}

/// Collection handle of a `MemoryDatabase`
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    db: MemoryDatabase,
    name: String,
}

impl MemoryCollection {
    fn matching(&self, filter: &Document) -> StoreResult<Vec<Document>> {
        let mut out = Vec::new();
        for doc in self.db.snapshot(&self.name)? {
            if matcher::matches(&doc, filter)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Positions of matching documents inside the stored vector
    fn positions(docs: &[Document], filter: &Document, first_only: bool) -> StoreResult<Vec<usize>> {
        let mut out = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            if matcher::matches(doc, filter)? {
                out.push(i);
                if first_only {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn with_docs<T>(
        &self,
        f: impl FnOnce(&mut Vec<Document>, &mut u64) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.db.write(|inner| {
            let Inner {
                collections,
                next_id,
            } = inner;
            let data = collections.entry(self.name.clone()).or_default();
            f(&mut data.docs, next_id)
        })?
    }
}

/// Apply `$set`, `$unset`, `$inc` and `$push` update operators
fn apply_update(doc: &mut Document, update: &Document) -> StoreResult<()> {
    for (op, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| StoreError::InvalidFilter(format!("{} requires a document", op)))?;
        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$unset" => remove_path(doc, path),
                "$inc" => {
                    let current = get_path(doc, path).cloned().unwrap_or(Value::from(0));
                    let (a, b) = match (as_f64(&current), as_f64(value)) {
                        (Some(a), Some(b)) => (a, b),
                        _ => {
                            return Err(StoreError::TypeMismatch {
                                operator: "$inc".to_string(),
                                field: path.clone(),
                                message: "only numbers can be incremented".to_string(),
                            })
                        }
                    };
                    let all_int = is_integer(&current) && is_integer(value);
                    set_path(doc, path, number_value(a + b, all_int));
                }
                "$push" => {
                    let mut items = match get_path(doc, path) {
                        Some(Value::Array(items)) => items.clone(),
                        None => Vec::new(),
                        Some(_) => {
                            return Err(StoreError::TypeMismatch {
                                operator: "$push".to_string(),
                                field: path.clone(),
                                message: "target is not an array".to_string(),
                            })
                        }
                    };
                    items.push(value.clone());
                    set_path(doc, path, Value::Array(items));
                }
                other => return Err(StoreError::UnsupportedOperator(other.to_string())),
            }
        }
    }
    Ok(())
}

fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}_{}", k, s),
            other => format!("{}_{}", k, other),
        })
        .collect::<Vec<_>>()
        .join("_")
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn database(&self) -> Arc<dyn Database> {
        self.db.handle()
    }

    fn find(&self, filter: &Document, options: FindOptions) -> StoreResult<Cursor> {
        let mut docs = self.matching(filter)?;
        match &options.sort {
            Some(sort) => docs = pipeline::sort_docs(docs, sort)?,
            None => {
                if let Some((path, point)) = matcher::near_point(filter)? {
                    let mut keyed: Vec<(f64, Document)> = docs
                        .into_iter()
                        .map(|d| (matcher::distance_to(&d, &path, point), d))
                        .collect();
                    keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
                    docs = keyed.into_iter().map(|(_, d)| d).collect();
                }
            }
        }
        let docs = docs
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX));
        let docs = match &options.projection {
            Some(projection) if !projection.is_empty() => docs
                .map(|d| pipeline::project(&d, projection))
                .collect::<StoreResult<Vec<_>>>()?,
            _ => docs.collect(),
        };
        Ok(Cursor::new(docs))
    }

    fn aggregate(&self, pipeline: &[Document], _options: AggregateOptions) -> StoreResult<Cursor> {
        let docs = self.db.snapshot(&self.name)?;
        Ok(Cursor::new(pipeline::run(docs, pipeline, &self.db)?))
    }

    fn insert_many(&self, docs: Vec<Document>) -> StoreResult<usize> {
        self.db.write(|inner| {
            let docs: Vec<Document> = docs.into_iter().map(|d| inner.assign_id(d)).collect();
            let n = docs.len();
            inner
                .collections
                .entry(self.name.clone())
                .or_default()
                .docs
                .extend(docs);
            n
        })
    }

    fn count_documents(&self, filter: &Document) -> StoreResult<usize> {
        Ok(self.matching(filter)?.len())
    }

    fn estimated_document_count(&self) -> StoreResult<usize> {
        self.db.read(|inner| {
            inner
                .collections
                .get(&self.name)
                .map_or(0, |c| c.docs.len())
        })
    }

    fn distinct(&self, key: &str, filter: &Document) -> StoreResult<Vec<Value>> {
        let mut out: Vec<Value> = Vec::new();
        for doc in self.matching(filter)? {
            for leaf in matcher::leaves(&doc, key) {
                let values: Vec<&Value> = match leaf {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for v in values {
                    if !out.iter().any(|o| values_equal(o, v)) {
                        out.push(v.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    fn create_index(&self, keys: &Document, options: IndexOptions) -> StoreResult<String> {
        let name = options.name.unwrap_or_else(|| default_index_name(keys));
        self.db.write(|inner| {
            let data = inner.collections.entry(self.name.clone()).or_default();
            if !data.indexes.iter().any(|i| i.name == name) {
                data.indexes.push(IndexInfo {
                    name: name.clone(),
                    keys: keys.clone(),
                    unique: options.unique,
                });
            }
        })?;
        Ok(name)
    }

    fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>> {
        self.db.read(|inner| match inner.collections.get(&self.name) {
            None => Vec::new(),
            Some(data) => {
                let mut id_key = Document::new();
                id_key.insert("_id".to_string(), Value::from(1));
                let mut out = vec![IndexInfo {
                    name: "_id_".to_string(),
                    keys: id_key,
                    unique: true,
                }];
                out.extend(data.indexes.iter().cloned());
                out
            }
        })
    }

    fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
    ) -> StoreResult<Option<Document>> {
        if !update.keys().all(|k| k.starts_with('$')) {
            return Err(StoreError::InvalidFilter(
                "update document requires update operators".to_string(),
            ));
        }
        self.with_docs(|docs, _| {
            let Some(&pos) = Self::positions(docs, filter, true)?.first() else {
                return Ok(None);
            };
            let original = docs[pos].clone();
            apply_update(&mut docs[pos], update)?;
            Ok(Some(original))
        })
    }

    fn find_one_and_replace(
        &self,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        self.with_docs(|docs, next_id| {
            match Self::positions(docs, filter, true)?.first() {
                Some(&pos) => {
                    let original = docs[pos].clone();
                    let mut doc = Document::new();
                    if let Some(id) = original.get("_id") {
                        doc.insert("_id".to_string(), id.clone());
                    }
                    doc.extend(replacement.into_iter().filter(|(k, _)| k != "_id"));
                    docs[pos] = doc;
                    Ok(Some(original))
                }
                None if upsert => {
                    let mut doc = Document::new();
                    if !replacement.contains_key("_id") {
                        *next_id += 1;
                        doc.insert("_id".to_string(), Value::from(*next_id));
                    }
                    doc.extend(replacement);
                    docs.push(doc);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn find_one_and_delete(&self, filter: &Document) -> StoreResult<Option<Document>> {
        self.with_docs(|docs, _| {
            Ok(Self::positions(docs, filter, true)?
                .first()
                .map(|&pos| docs.remove(pos)))
        })
    }

    fn update_many(&self, filter: &Document, update: &Document) -> StoreResult<usize> {
        self.with_docs(|docs, _| {
            let positions = Self::positions(docs, filter, false)?;
            for &pos in &positions {
                apply_update(&mut docs[pos], update)?;
            }
            Ok(positions.len())
        })
    }

    fn delete_many(&self, filter: &Document) -> StoreResult<usize> {
        self.with_docs(|docs, _| {
            let positions = Self::positions(docs, filter, false)?;
            let before = docs.len();
            let mut i = 0;
            docs.retain(|_| {
                let keep = !positions.contains(&i);
                i += 1;
                keep
            });
            Ok(before - docs.len())
        })
    }

    fn drop(&self) -> StoreResult<()> {
        self.db.drop_collection(&self.name)
    }
}

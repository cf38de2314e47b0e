// src/store/filtered.rs

use super::{
    AggregateOptions, Collection, Cursor, Database, FindOptions, IndexInfo, IndexOptions,
};
use crate::core::value::{Document, Value};
use crate::engine::error::{EngineError, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Per-call filter, optionally carrying a signature from `FilteredCollection::trust`
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    filter: Document,
    signature: Option<String>,
}

impl CallFilter {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            signature: None,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// A filter vouched for by the collection that signed it
    pub fn trusted(filter: Document, signature: String) -> Self {
        Self {
            filter,
            signature: Some(signature),
        }
    }
}

impl From<Document> for CallFilter {
    fn from(filter: Document) -> Self {
        CallFilter::new(filter)
    }
}

/// A collection with a permanent base filter.
///
/// Every read merges the base filter with the per-call filter (per-call keys
/// win). Per-call filters lose their top-level operator keys unless signed by
/// `trust`. Legacy mutation methods are refused so the base filter cannot be
/// bypassed.
#[derive(Clone)]
pub struct FilteredCollection {
    collection: Arc<dyn Collection>,
    query: Document,
    secret: Arc<str>,
}

impl std::fmt::Debug for FilteredCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteredCollection")
            .field("collection", &self.collection.name())
            .field("query", &self.query)
            .finish()
    }
}

impl FilteredCollection {
    pub fn new(collection: Arc<dyn Collection>, query: Document) -> Self {
        Self {
            collection,
            query,
            secret: uuid::Uuid::new_v4().to_string().into(),
        }
    }

    /// A filtered view over the same raw collection with an additional
    /// condition; filtered collections never wrap each other
    pub fn narrow(&self, query: &Document) -> Self {
        let merged = if query.is_empty() {
            self.query.clone()
        } else if self.query.is_empty() {
            query.clone()
        } else if query.keys().any(|k| self.query.contains_key(k)) {
            let mut both = Document::new();
            both.insert(
                "$and".to_string(),
                Value::Array(vec![
                    Value::Object(self.query.clone()),
                    Value::Object(query.clone()),
                ]),
            );
            both
        } else {
            let mut merged = self.query.clone();
            merged.extend(query.clone());
            merged
        };
        Self {
            collection: self.collection.clone(),
            query: merged,
            secret: self.secret.clone(),
        }
    }

    /// The same base filter over another raw collection handle
    pub fn relinked(&self, collection: Arc<dyn Collection>) -> Self {
        Self {
            collection,
            query: self.query.clone(),
            secret: self.secret.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.collection.database()
    }

    /// The unfiltered collection
    pub fn collection(&self) -> Arc<dyn Collection> {
        self.collection.clone()
    }

    /// The base filter
    pub fn query(&self) -> &Document {
        &self.query
    }

    /// Sign a filter so it passes through unsanitized
    pub fn trust(&self, filter: &Document) -> String {
        let mut hasher = DefaultHasher::new();
        self.secret.hash(&mut hasher);
        Value::Object(filter.clone()).to_string().hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Base filter merged with the (sanitized) per-call filter
    pub fn effective_filter(&self, call: CallFilter) -> Document {
        let trusted = call
            .signature
            .as_deref()
            .map_or(false, |sig| sig == self.trust(&call.filter));
        let call_filter: Document = if trusted {
            call.filter
        } else {
            let (kept, stripped): (Vec<_>, Vec<_>) =
                call.filter.into_iter().partition(|(k, _)| !k.starts_with('$'));
            if !stripped.is_empty() {
                tracing::warn!(
                    collection = %self.name(),
                    keys = ?stripped.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                    "stripped operator keys from untrusted filter"
                );
            }
            kept.into_iter().collect()
        };
        let mut merged = self.query.clone();
        for (k, v) in call_filter {
            merged.insert(k, v);
        }
        merged
    }

    pub fn find(&self, filter: impl Into<CallFilter>, options: FindOptions) -> Result<Cursor> {
        let query = self.effective_filter(filter.into());
        let logged = Value::Object(query.clone());
        tracing::debug!(collection = %self.name(), filter = %logged, "find");
        Ok(self.collection.find(&query, options)?)
    }

    pub fn find_one(&self, filter: impl Into<CallFilter>) -> Result<Option<Document>> {
        let query = self.effective_filter(filter.into());
        Ok(self.collection.find_one(&query)?)
    }

    /// Run a pipeline behind a leading `$match` on the merged filter
    pub fn aggregate(&self, pipeline: &[Document], filter: impl Into<CallFilter>) -> Result<Cursor> {
        let query = self.effective_filter(filter.into());
        let mut full = Vec::with_capacity(pipeline.len() + 1);
        let mut stage = Document::new();
        stage.insert("$match".to_string(), Value::Object(query));
        full.push(stage);
        full.extend(pipeline.iter().cloned());
        let logged = Value::Array(full.iter().cloned().map(Value::Object).collect());
        tracing::debug!(collection = %self.name(), pipeline = %logged, "aggregate");
        Ok(self.collection.aggregate(
            &full,
            AggregateOptions {
                allow_disk_use: true,
            },
        )?)
    }

    pub fn count_documents(&self, filter: impl Into<CallFilter>) -> Result<usize> {
        let query = self.effective_filter(filter.into());
        Ok(self.collection.count_documents(&query)?)
    }

    pub fn estimated_document_count(&self) -> Result<usize> {
        Ok(self.collection.estimated_document_count()?)
    }

    pub fn distinct(&self, key: &str, filter: impl Into<CallFilter>) -> Result<Vec<Value>> {
        let query = self.effective_filter(filter.into());
        Ok(self.collection.distinct(key, &query)?)
    }

    pub fn find_one_and_update(
        &self,
        update: &Document,
        filter: impl Into<CallFilter>,
    ) -> Result<Option<Document>> {
        let query = self.effective_filter(filter.into());
        Ok(self.collection.find_one_and_update(&query, update)?)
    }

    pub fn find_one_and_replace(
        &self,
        replacement: Document,
        filter: impl Into<CallFilter>,
        upsert: bool,
    ) -> Result<Option<Document>> {
        let query = self.effective_filter(filter.into());
        Ok(self.collection.find_one_and_replace(&query, replacement, upsert)?)
    }

    pub fn find_one_and_delete(&self, filter: impl Into<CallFilter>) -> Result<Option<Document>> {
        let query = self.effective_filter(filter.into());
        Ok(self.collection.find_one_and_delete(&query)?)
    }

    pub fn create_index(&self, keys: &Document, options: IndexOptions) -> Result<String> {
        Ok(self.collection.create_index(keys, options)?)
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        Ok(self.collection.list_indexes()?)
    }

    pub fn insert(&self, _doc: Document) -> Result<()> {
        Err(EngineError::NotImplemented("insert".to_string()))
    }

    pub fn update(&self, _filter: Document, _update: Document) -> Result<()> {
        Err(EngineError::NotImplemented("update".to_string()))
    }

    pub fn remove(&self, _filter: Document) -> Result<()> {
        Err(EngineError::NotImplemented("remove".to_string()))
    }

    pub fn save(&self, _doc: Document) -> Result<()> {
        Err(EngineError::NotImplemented("save".to_string()))
    }

    pub fn find_and_modify(&self, _filter: Document, _update: Document) -> Result<()> {
        Err(EngineError::NotImplemented("find_and_modify".to_string()))
    }

    pub fn ensure_index(&self, _keys: Document) -> Result<()> {
        Err(EngineError::NotImplemented("ensure_index".to_string()))
    }
}

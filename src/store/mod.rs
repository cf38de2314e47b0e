// src/store/mod.rs
//
// Driver-facing contract: the native document query and aggregation
// language is passed through verbatim, documents are ordered JSON maps.

pub mod error;
pub mod expr;
pub mod filtered;
pub mod matcher;
pub mod memory;
pub mod pipeline;

pub use error::{StoreError, StoreResult};
pub use filtered::{CallFilter, FilteredCollection};
pub use memory::MemoryDatabase;

use crate::core::value::{Document, Value};
use std::sync::Arc;

/// Options for `Collection::find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    pub allow_disk_use: bool,
}

/// Key direction of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Ascending,
    Descending,
    Geo2dSphere,
    Text,
}

impl IndexDirection {
    pub fn to_value(self) -> Value {
        match self {
            IndexDirection::Ascending => Value::from(1),
            IndexDirection::Descending => Value::from(-1),
            IndexDirection::Geo2dSphere => Value::from("2dsphere"),
            IndexDirection::Text => Value::from("text"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
}

/// Materialized result of a find or aggregate call
#[derive(Debug, Default)]
pub struct Cursor {
    docs: std::vec::IntoIter<Document>,
}

impl Cursor {
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            docs: docs.into_iter(),
        }
    }

    pub fn into_vec(self) -> Vec<Document> {
        self.docs.collect()
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next()
    }
}

/// A native collection handle
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// The database this collection lives in, for `$lookup`/`$out` targets
    fn database(&self) -> Arc<dyn Database>;

    fn find(&self, filter: &Document, options: FindOptions) -> StoreResult<Cursor>;

    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        Ok(self.find(filter, FindOptions::default().limit(1))?.next())
    }

    fn aggregate(&self, pipeline: &[Document], options: AggregateOptions) -> StoreResult<Cursor>;

    /// Insert documents, returning how many were written
    fn insert_many(&self, docs: Vec<Document>) -> StoreResult<usize>;

    fn count_documents(&self, filter: &Document) -> StoreResult<usize>;

    fn estimated_document_count(&self) -> StoreResult<usize>;

    fn distinct(&self, key: &str, filter: &Document) -> StoreResult<Vec<Value>>;

    /// Create an index, returning its name
    fn create_index(&self, keys: &Document, options: IndexOptions) -> StoreResult<String>;

    fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>>;

    /// Apply an update document to the first match, returning the original
    fn find_one_and_update(&self, filter: &Document, update: &Document)
        -> StoreResult<Option<Document>>;

    fn find_one_and_replace(
        &self,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>>;

    fn find_one_and_delete(&self, filter: &Document) -> StoreResult<Option<Document>>;

    fn update_many(&self, filter: &Document, update: &Document) -> StoreResult<usize>;

    fn delete_many(&self, filter: &Document) -> StoreResult<usize>;

    fn drop(&self) -> StoreResult<()>;
}

/// A native database handle
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    fn collection(&self, name: &str) -> Arc<dyn Collection>;

    fn drop_collection(&self, name: &str) -> StoreResult<()>;

    fn list_collection_names(&self) -> StoreResult<Vec<String>>;

    /// A fresh connection to the same database, safe to move into a worker
    fn relink(&self) -> Arc<dyn Database>;
}

/// Build a document from a JSON object literal; other values give an empty document
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

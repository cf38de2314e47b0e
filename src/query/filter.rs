// src/query/filter.rs

use super::mongoq::MongoQ;
use crate::core::frame::{Frame, FrameOptions};
use crate::core::value::Document;
use crate::engine::error::Result;
use crate::store::{CallFilter, FilteredCollection, FindOptions};
use std::ops::{BitAnd, BitOr, Not};

/// A `MongoQ` bound to a collection.
///
/// ```ignore
/// let flt = Filter::new(coll, MongoQ::new().with("year__gte", 2015))
///     .exclude(MongoQ::new().with("status", "retired"));
/// let frame = flt.value()?;
/// ```
#[derive(Debug, Clone)]
pub struct Filter {
    collection: FilteredCollection,
    q: MongoQ,
    trace: bool,
}

impl Filter {
    pub fn new(collection: FilteredCollection, q: MongoQ) -> Self {
        Self {
            collection,
            q,
            trace: false,
        }
    }

    /// Filter from a document of `field__op: value` conditions
    pub fn from_document(collection: FilteredCollection, conditions: &Document) -> Self {
        Self::new(collection, MongoQ::from_document(conditions))
    }

    /// Propagate raw store errors instead of field-attributed ones
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn q(&self) -> &MongoQ {
        &self.q
    }

    pub fn collection(&self) -> &FilteredCollection {
        &self.collection
    }

    /// AND-extend with more conditions
    pub fn filter(mut self, q: MongoQ) -> Self {
        self.q = if self.q.is_empty() { q } else { self.q & q };
        self
    }

    /// AND-extend with the negation of the given conditions
    pub fn exclude(mut self, q: MongoQ) -> Self {
        self.q = if self.q.is_empty() { !q } else { self.q & !q };
        self
    }

    /// The compiled filter document
    pub fn query(&self) -> Result<Document> {
        self.q.compile()
    }

    /// Number of matching documents
    pub fn count(&self) -> Result<usize> {
        let query = self.query()?;
        let signature = self.collection.trust(&query);
        self.collection
            .count_documents(CallFilter::trusted(query, signature))
            .map_err(|e| e.attributed(self.trace))
    }

    /// Execute and reconstruct the matching rows.
    ///
    /// Insertion order is restored from the row id unless the query implies its
    /// own order (`near`), then the row id is dropped and flattened index columns
    /// are restored.
    pub fn value(&self) -> Result<Frame> {
        let query = self.query()?;
        tracing::debug!(
            collection = %self.collection.name(),
            filter = %serde_json::Value::Object(query.clone()),
            "filter"
        );
        let signature = self.collection.trust(&query);
        let cursor = self
            .collection
            .find(CallFilter::trusted(query, signature), FindOptions::default())
            .map_err(|e| e.attributed(self.trace))?;
        let options = FrameOptions {
            rowid_sort: !self.q.sorted(),
            ..FrameOptions::default()
        };
        Ok(Frame::from_documents(cursor.into_vec(), &options))
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        Filter {
            q: self.q & rhs.q,
            ..self
        }
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        Filter {
            q: self.q | rhs.q,
            ..self
        }
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter {
            q: !self.q,
            ..self
        }
    }
}

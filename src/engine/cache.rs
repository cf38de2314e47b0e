// src/engine/cache.rs

use super::error::{EngineError, Result};
use crate::core::value::{Document, Value};
use crate::query::ops::{self, StageKind};
use crate::store::{Collection, Database, FindOptions};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Where the result of a cached pipeline lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source collection the pipeline ran on
    pub collection: String,
    /// Collection holding the pipeline output
    pub result: String,
}

/// Content-addressed cache of persisted pipeline results.
///
/// Entries are `{key, value: CacheEntry}` documents in a collection of the
/// source database. Entries never expire; `remove` and
/// `remove_for_collection` are the only invalidation.
#[derive(Clone)]
pub struct PipelineCache {
    collection: Arc<dyn Collection>,
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("collection", &self.collection.name())
            .finish()
    }
}

impl PipelineCache {
    pub fn new(db: &Arc<dyn Database>, collection: &str) -> Self {
        Self {
            collection: db.collection(collection),
        }
    }

    /// The same cache through another database handle
    pub fn relinked(&self, db: &Arc<dyn Database>) -> Self {
        Self::new(db, self.collection.name())
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// Cache key of a pipeline run on `collection` behind `filter`.
    ///
    /// A trailing `$out` is not part of the key. Stage and key order are.
    pub fn key(collection: &str, filter: &Document, pipeline: &[Document]) -> String {
        let body = match pipeline.split_last() {
            Some((last, rest)) if StageKind::of(last) == Some(StageKind::Out) => rest,
            _ => pipeline,
        };
        let stages: Vec<Value> = std::iter::once(ops::match_stage(filter.clone()))
            .chain(body.iter().cloned())
            .map(Value::Object)
            .collect();
        let mut hasher = DefaultHasher::new();
        collection.hash(&mut hasher);
        Value::Array(stages).to_string().hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Output collection for a key, the same for every run of a pipeline
    pub fn result_name(key: &str) -> String {
        format!("_cache.{}", key)
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(doc) = self.collection.find_one(&key_filter(key))? else {
            tracing::debug!(key = %key, "cache miss");
            return Ok(None);
        };
        let value = doc.get("value").cloned().unwrap_or(Value::Null);
        let entry: CacheEntry = serde_json::from_value(value)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        tracing::debug!(key = %key, result = %entry.result, "cache hit");
        Ok(Some(entry))
    }

    pub fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let value =
            serde_json::to_value(entry).map_err(|e| EngineError::Serialization(e.to_string()))?;
        let mut doc = key_filter(key);
        doc.insert("value".to_string(), value);
        self.collection
            .find_one_and_replace(&key_filter(key), doc, true)?;
        tracing::debug!(key = %key, source = %entry.collection, result = %entry.result, "cache record");
        Ok(())
    }

    /// Remove one entry and its result collection; false if there was none
    pub fn remove(&self, key: &str) -> Result<bool> {
        let Some(entry) = self.get(key)? else {
            return Ok(false);
        };
        self.collection.database().drop_collection(&entry.result)?;
        self.collection.delete_many(&key_filter(key))?;
        Ok(true)
    }

    /// Remove every entry computed from `collection`, returning how many
    pub fn remove_for_collection(&self, collection: &str) -> Result<usize> {
        let mut filter = Document::new();
        filter.insert("value.collection".to_string(), Value::from(collection));
        let entries = self.collection.find(&filter, FindOptions::default())?;
        let db = self.collection.database();
        for doc in entries {
            if let Some(result) = doc
                .get("value")
                .and_then(|v| v.get("result"))
                .and_then(Value::as_str)
            {
                db.drop_collection(result)?;
            }
        }
        let removed = self.collection.delete_many(&filter)?;
        tracing::debug!(collection = %collection, removed, "cache reset");
        Ok(removed)
    }
}

fn key_filter(key: &str) -> Document {
    let mut filter = Document::new();
    filter.insert("key".to_string(), Value::from(key));
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{doc, MemoryDatabase};
    use serde_json::json;

    #[test]
    fn test_key_ignores_trailing_out() {
        let filter = Document::new();
        let pipeline = vec![doc(json!({"$project": {"x": 1}}))];
        let mut with_out = pipeline.clone();
        with_out.push(ops::out("target"));
        assert_eq!(
            PipelineCache::key("c", &filter, &pipeline),
            PipelineCache::key("c", &filter, &with_out)
        );
    }

    #[test]
    fn test_key_depends_on_content_and_order() {
        let filter = Document::new();
        let a = doc(json!({"$skip": 1}));
        let b = doc(json!({"$limit": 2}));
        let k1 = PipelineCache::key("c", &filter, &[a.clone(), b.clone()]);
        assert_ne!(k1, PipelineCache::key("c", &filter, &[b.clone(), a.clone()]));
        assert_ne!(k1, PipelineCache::key("d", &filter, &[a.clone(), b.clone()]));
        assert_ne!(
            k1,
            PipelineCache::key("c", &doc(json!({"x": 1})), &[a, b])
        );
    }

    #[test]
    fn test_set_get_remove() {
        let db = MemoryDatabase::new("test").handle();
        let cache = PipelineCache::new(&db, "_cache");
        let entry = CacheEntry {
            collection: "src".to_string(),
            result: PipelineCache::result_name("k1"),
        };
        assert_eq!(cache.get("k1").unwrap(), None);
        cache.set("k1", &entry).unwrap();
        cache.set("k1", &entry).unwrap();
        assert_eq!(cache.get("k1").unwrap(), Some(entry));
        assert_eq!(db.collection("_cache").count_documents(&Document::new()).unwrap(), 1);
        assert!(cache.remove("k1").unwrap());
        assert!(!cache.remove("k1").unwrap());
    }

    #[test]
    fn test_remove_for_collection() {
        let db = MemoryDatabase::new("test").handle();
        let cache = PipelineCache::new(&db, "_cache");
        for (key, source) in [("a", "src"), ("b", "src"), ("c", "other")] {
            let entry = CacheEntry {
                collection: source.to_string(),
                result: PipelineCache::result_name(key),
            };
            db.collection(&entry.result)
                .insert_many(vec![doc(json!({"x": 1}))])
                .unwrap();
            cache.set(key, &entry).unwrap();
        }
        assert_eq!(cache.remove_for_collection("src").unwrap(), 2);
        assert!(cache.get("c").unwrap().is_some());
        let names = db.list_collection_names().unwrap();
        assert!(!names.contains(&PipelineCache::result_name("a")));
        assert!(names.contains(&PipelineCache::result_name("c")));
    }
}

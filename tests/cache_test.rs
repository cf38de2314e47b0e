// tests/cache_test.rs
// Persisted pipeline results are reused until the cache is reset

use mdframe::store::{doc, Collection, Database, MemoryDatabase};
use mdframe::{ApplyOutput, EngineConfig, EngineError, MDataFrame};
use serde_json::json;
use std::sync::Arc;

fn cached_names(db: &Arc<dyn Database>) -> Vec<String> {
    db.list_collection_names()
        .unwrap()
        .into_iter()
        .filter(|n| n.starts_with("_cache."))
        .collect()
}

fn grouped(db: &Arc<dyn Database>) -> MDataFrame {
    let coll = db.collection("events");
    coll.insert_many(
        (0..20)
            .map(|i| doc(json!({"kind": if i % 4 == 0 { "rare" } else { "common" }, "n": 1})))
            .collect(),
    )
    .unwrap();
    MDataFrame::new(coll, Arc::new(EngineConfig::default()))
        .unwrap()
        .apply(|ctx| {
            ctx.groupby(&["kind"], doc(json!({"total": {"$sum": "$n"}})));
            Ok(ApplyOutput::Context)
        })
}

#[test]
fn test_persist_is_idempotent() {
    let db = MemoryDatabase::new("cache").handle();
    let mdf = grouped(&db);
    let first = mdf.persist().unwrap();
    let second = mdf.persist().unwrap();
    assert_eq!(first, second);
    assert_eq!(cached_names(&db), vec![first.clone()]);

    let frame = mdf.value().unwrap();
    assert_eq!(frame.column_f64("total").unwrap(), vec![15.0, 5.0]);
    assert_eq!(db.collection(&first).count_documents(&Default::default()).unwrap(), 2);
}

#[test]
fn test_value_is_served_from_cache_until_reset() {
    let db = MemoryDatabase::new("cache").handle();
    let mdf = grouped(&db);
    mdf.persist().unwrap();

    db.collection("events")
        .insert_many((0..3).map(|_| doc(json!({"kind": "late", "n": 1}))).collect())
        .unwrap();
    let cached = mdf.value().unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached.column_f64("total").unwrap(), vec![15.0, 5.0]);

    assert_eq!(mdf.reset_cache(false).unwrap(), 1);
    let fresh = mdf.value().unwrap();
    assert_eq!(
        fresh.column("kind").unwrap(),
        vec![json!("common"), json!("late"), json!("rare")]
    );
    assert_eq!(fresh.column_f64("total").unwrap(), vec![15.0, 3.0, 5.0]);
}

#[test]
fn test_reset_cache() {
    let db = MemoryDatabase::new("cache").handle();
    let mdf = grouped(&db);
    mdf.persist().unwrap();
    assert_eq!(mdf.reset_cache(false).unwrap(), 1);
    assert!(cached_names(&db).is_empty());
    assert_eq!(mdf.reset_cache(false).unwrap(), 0);

    mdf.persist().unwrap();
    assert_eq!(mdf.reset_cache(true).unwrap(), 1);
    assert!(cached_names(&db).is_empty());
    assert_eq!(mdf.value().unwrap().len(), 2);
}

#[test]
fn test_persist_needs_cache_and_pipeline() {
    let db = MemoryDatabase::new("cache").handle();
    let mdf = grouped(&db);
    assert!(matches!(mdf.noapply().persist(), Err(EngineError::InvalidOp(_))));
    assert!(matches!(mdf.nocache().persist(), Err(EngineError::InvalidOp(_))));
}

// tests/parallel_test.rs
// Chunked transforms over a collection larger than one chunk

use mdframe::engine::{ChunkInput, Resolve};
use mdframe::store::{doc, Collection, Database, MemoryDatabase};
use mdframe::{EngineConfig, MDataFrame};
use serde_json::{json, Value};
use std::sync::Arc;

fn source(n: usize) -> MDataFrame {
    let db = MemoryDatabase::new("jobs").handle();
    let coll = db.collection("rows");
    coll.insert_many((0..n).map(|i| doc(json!({"_om#rowid": i, "x": i}))).collect())
        .unwrap();
    MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap()
}

#[test]
fn test_chunks_of_a_large_source() {
    let mdf = source(10_050);
    let transform = mdf
        .transform(|input, _| {
            let frame = input.resolve()?;
            Ok(Some(frame.map_values(|v| match v.as_i64() {
                Some(x) => Value::from(x * 2),
                None => v.clone(),
            })))
        })
        .chunksize(5_000)
        .n_jobs(2);
    assert_eq!(
        transform.chunks().unwrap(),
        vec![(0, 5_000), (5_000, 5_000), (10_000, 50)]
    );
    let out = transform.persist().unwrap();
    assert_eq!(out.name(), "_tmprows_");
    let frame = out.value().unwrap();
    assert_eq!(frame.len(), 10_050);
    let xs = frame.column("x").unwrap();
    assert_eq!(xs[0], json!(0));
    assert_eq!(xs[10_049], json!(20_098));
}

#[test]
fn test_function_resolves_views() {
    let mdf = source(30);
    let frame = mdf
        .transform(|input, _| {
            assert!(matches!(input, ChunkInput::View(_)));
            Ok(Some(input.resolve()?.take(1)))
        })
        .resolve(Resolve::Function)
        .chunksize(10)
        .outname("firsts")
        .value()
        .unwrap();
    assert_eq!(frame.column("x").unwrap(), vec![json!(0), json!(10), json!(20)]);
}

#[test]
fn test_append_keeps_previous_output() {
    let mdf = source(10);
    let transform = mdf.transform(|_, _| Ok(None)).chunksize(5).outname("copy");
    assert_eq!(transform.run().unwrap(), 10);
    assert_eq!(transform.clone().append(true).run().unwrap(), 10);
    assert_eq!(mdf.database().collection("copy").count_documents(&Default::default()).unwrap(), 20);
    assert_eq!(transform.run().unwrap(), 10);
    assert_eq!(mdf.database().collection("copy").count_documents(&Default::default()).unwrap(), 10);
}

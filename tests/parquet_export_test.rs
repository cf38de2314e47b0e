// tests/parquet_export_test.rs
// Views exported to Parquet read back with the same rows

use mdframe::store::{doc, Collection, Database, MemoryDatabase};
use mdframe::{EngineConfig, MDataFrame, MongoQ};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::json;
use std::fs::File;
use std::sync::Arc;

fn view() -> MDataFrame {
    let db = MemoryDatabase::new("export").handle();
    let coll = db.collection("items");
    coll.insert_many(
        (0..25)
            .map(|i| doc(json!({"_om#rowid": i, "id": i, "price": i as f64 * 1.5, "name": format!("item{}", i)})))
            .collect(),
    )
    .unwrap();
    MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap()
}

fn read_rows(path: &std::path::Path) -> (usize, Vec<String>) {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap()).unwrap();
    let names = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let rows = builder.build().unwrap().map(|batch| batch.unwrap().num_rows()).sum();
    (rows, names)
}

#[test]
fn test_export_in_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.parquet");
    assert_eq!(view().to_parquet(&path, 10).unwrap(), 25);
    let (rows, names) = read_rows(&path);
    assert_eq!(rows, 25);
    assert_eq!(names, vec!["id".to_string(), "price".to_string(), "name".to_string()]);
}

#[test]
fn test_export_of_an_empty_selection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("none.parquet");
    let empty = view().query(MongoQ::new().with("id__gt", 100)).unwrap();
    assert_eq!(empty.to_parquet(&path, 10).unwrap(), 0);
    let (rows, names) = read_rows(&path);
    assert_eq!(rows, 0);
    assert_eq!(names.len(), 3);
}

// tests/apply_stats_test.rs
// Statistics computed as $facet pipelines over larger inputs

use mdframe::core::value::as_f64;
use mdframe::store::{doc, Collection, Database, MemoryDatabase};
use mdframe::{EngineConfig, MDataFrame, MongoQ, Statistics};
use serde_json::json;
use std::sync::Arc;

fn series(n: i64) -> MDataFrame {
    let db = MemoryDatabase::new("stats").handle();
    let coll = db.collection("xy");
    coll.insert_many((0..n).map(|i| doc(json!({"x": i, "y": 2 * i}))).collect())
        .unwrap();
    MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap()
}

#[test]
fn test_median_of_a_thousand() {
    let frame = series(1000).quantile(&[0.5]).unwrap().value().unwrap();
    assert_eq!(frame.len(), 1);
    assert_eq!(frame.get(0, "x").and_then(as_f64), Some(500.0));
    assert_eq!(frame.get(0, "y").and_then(as_f64), Some(1000.0));
}

#[test]
fn test_quantiles_respect_the_filter() {
    let view = series(1000).query(MongoQ::new().with("x__lt", 100)).unwrap();
    let frame = view.select(&["x"]).unwrap().quantile(&[0.25, 0.75]).unwrap().value().unwrap();
    assert_eq!(frame.column_f64("x").unwrap(), vec![25.0, 75.0]);
}

#[test]
fn test_correlation_is_symmetric() {
    let frame = series(1000).corr().unwrap().value().unwrap();
    let rho = |row: usize, col: &str| frame.get(row, col).and_then(as_f64).unwrap();
    assert!((rho(0, "x") - 1.0).abs() < 1e-9);
    assert!((rho(0, "y") - 1.0).abs() < 1e-9);
    assert!((rho(0, "y") - rho(1, "x")).abs() < 1e-12);
}

#[test]
fn test_covariance_scales() {
    let frame = series(10).cov().unwrap().value().unwrap();
    let cov = |row: usize, col: &str| frame.get(row, col).and_then(as_f64).unwrap();
    let var_x = cov(0, "x");
    assert!((var_x - 9.166_666_666_666_666).abs() < 1e-9);
    assert!((cov(0, "y") - 2.0 * var_x).abs() < 1e-9);
    assert!((cov(1, "y") - 4.0 * var_x).abs() < 1e-9);
}

#[test]
fn test_covariance_of_underscored_columns() {
    let db = MemoryDatabase::new("stats").handle();
    let coll = db.collection("underscored");
    coll.insert_many(
        (0..5)
            .map(|i| doc(json!({"a": i, "b": 2 * i, "a_b": 3 * i, "b_b": -i})))
            .collect(),
    )
    .unwrap();
    let frame = MDataFrame::new(coll, Arc::new(EngineConfig::default()))
        .unwrap()
        .cov()
        .unwrap()
        .value()
        .unwrap();
    let cov = |row: &str, col: &str| {
        let at = (0..frame.len())
            .find(|&i| frame.index_of(i).first() == Some(&json!(row)))
            .unwrap();
        frame.get(at, col).and_then(as_f64).unwrap()
    };
    assert_eq!(frame.len(), 4);
    assert!((cov("a_b", "b") - 15.0).abs() < 1e-9);
    assert!((cov("a", "b_b") + 2.5).abs() < 1e-9);
}

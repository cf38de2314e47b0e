// tests/mdataframe_test.rs
// End-to-end scenarios on views over the in-memory store

use mdframe::apply::{ApplyAccumulators, ApplyArithmetic, StatOp};
use mdframe::store::{doc, Collection, Database, MemoryDatabase};
use mdframe::{
    ApplyOutput, EngineConfig, Frame, JoinKind, Loc, MDataFrame, MergeOptions, MongoQ,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn database() -> Arc<dyn Database> {
    MemoryDatabase::new("test").handle()
}

/// x = 1..=10, s = "s1".."s10", g alternating a/b, stamped with row ids
fn numbers(db: &Arc<dyn Database>) -> MDataFrame {
    let coll = db.collection("numbers");
    coll.insert_many(
        (1..=10)
            .map(|i| {
                let g = if i % 2 == 0 { "b" } else { "a" };
                doc(json!({"_om#rowid": i - 1, "x": i, "s": format!("s{}", i), "g": g}))
            })
            .collect(),
    )
    .unwrap();
    MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap()
}

fn row_of(frame: &Frame, label: &str) -> usize {
    (0..frame.len())
        .find(|&i| frame.index_of(i).first() == Some(&json!(label)))
        .unwrap()
}

#[test]
fn test_apply_multiplies_every_value() {
    let mdf = numbers(&database()).select(&["x"]).unwrap();
    let plain = mdf.value().unwrap().column_f64("x").unwrap();
    let scaled = mdf
        .apply(|ctx| {
            ctx.mul(5)?;
            Ok(ApplyOutput::Context)
        })
        .value()
        .unwrap()
        .column_f64("x")
        .unwrap();
    let expected: Vec<f64> = plain.iter().map(|v| v * 5.0).collect();
    assert_eq!(scaled, expected);
}

#[test]
fn test_context_groupby() {
    let db = database();
    let coll = db.collection("groups");
    coll.insert_many(
        (0..10)
            .map(|i| doc(json!({"x": if i < 5 { 1 } else { 2 }, "y": 1})))
            .collect(),
    )
    .unwrap();
    let mdf = MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap();
    let frame = mdf
        .apply(|ctx| {
            ctx.groupby(&["x"], doc(json!({"y_sum": {"$sum": "$y"}})));
            Ok(ApplyOutput::Context)
        })
        .value()
        .unwrap();
    assert_eq!(frame.len(), 2);
    assert_eq!(frame.column("x").unwrap(), vec![json!(1), json!(2)]);
    assert_eq!(frame.column_f64("y_sum").unwrap(), vec![5.0, 5.0]);
}

#[test]
fn test_context_groupby_then_accumulator() {
    let db = database();
    let coll = db.collection("keyed");
    coll.insert_many(
        (1..=4)
            .map(|i| doc(json!({"k": if i % 2 == 0 { "b" } else { "a" }, "x": i})))
            .collect(),
    )
    .unwrap();
    let mdf = MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap();
    let frame = mdf
        .apply(|ctx| {
            ctx.groupby(&["k"], doc(json!({})));
            ctx.stat(StatOp::Max, Some(&["x"]))?;
            Ok(ApplyOutput::Context)
        })
        .value()
        .unwrap();
    assert_eq!(frame.column("k").unwrap(), vec![json!("a"), json!("b")]);
    assert_eq!(frame.column_f64("x_max").unwrap(), vec![3.0, 4.0]);
}

#[test]
fn test_sorted_window_on_applied_view() {
    let mdf = numbers(&database()).select(&["x"]).unwrap();
    let plain = mdf.clone().sort(&["-x"]).head(2).value().unwrap();
    let applied = mdf
        .sort(&["-x"])
        .head(2)
        .apply(|_ctx| Ok(ApplyOutput::Context))
        .value()
        .unwrap();
    assert_eq!(plain.column("x").unwrap(), vec![json!(10), json!(9)]);
    assert_eq!(applied.column("x").unwrap(), plain.column("x").unwrap());
}

#[test]
fn test_grouper_agg_on_empty_source_keeps_columns() {
    let db = database();
    let mdf = MDataFrame::new(db.collection("empty"), Arc::new(EngineConfig::default())).unwrap();
    let keyed = mdf.groupby(&["g"]).agg(&[("x", "sum"), ("x", "max")]).unwrap();
    assert!(keyed.is_empty());
    assert_eq!(keyed.index_names(), vec!["g".to_string()]);
    assert_eq!(keyed.columns(), vec!["x_sum".to_string(), "x_max".to_string()]);

    let total = mdf.groupby(&[]).agg(&[("x", "sum")]).unwrap();
    assert!(total.is_empty());
    assert!(total.index_names().is_empty());
    assert_eq!(total.columns(), vec!["x_sum".to_string()]);
}

#[test]
fn test_groupby_on_empty_source() {
    let db = database();
    let mdf = MDataFrame::new(db.collection("empty"), Arc::new(EngineConfig::default())).unwrap();
    assert!(mdf.columns().is_empty());
    let frame = mdf
        .apply(|ctx| {
            ctx.groupby(&["x"], doc(json!({"y_sum": {"$sum": "$y"}})));
            Ok(ApplyOutput::Context)
        })
        .value()
        .unwrap();
    assert!(frame.is_empty());
}

#[test]
fn test_query_sort_and_window() {
    let mdf = numbers(&database());
    let evens = mdf.query(MongoQ::new().with("g", "b")).unwrap();
    assert_eq!(evens.len().unwrap(), 5);

    let top = evens.clone().sort(&["-x"]).head(2).value().unwrap();
    assert_eq!(top.column("x").unwrap(), vec![json!(10), json!(8)]);

    let tail = mdf.clone().tail(3).unwrap().value().unwrap();
    assert_eq!(tail.column("x").unwrap(), vec![json!(8), json!(9), json!(10)]);
    assert_eq!(mdf.shape().unwrap(), (10, 3));
}

#[test]
fn test_grouper_and_series() {
    let mdf = numbers(&database());
    let sums = mdf.groupby(&["g"]).agg(&[("x", "sum")]).unwrap();
    assert_eq!(sums.index_names(), vec!["g".to_string()]);
    assert_eq!(sums.column_f64("x_sum").unwrap(), vec![25.0, 30.0]);

    let series = mdf.column("g").unwrap();
    let mut unique = series.unique().unwrap();
    unique.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    assert_eq!(unique, vec![json!("a"), json!("b")]);
}

#[test]
fn test_count_and_statistics() {
    let db = database();
    let coll = db.collection("sparse");
    coll.insert_many(vec![
        doc(json!({"x": 1, "y": 2})),
        doc(json!({"x": 3, "y": null})),
        doc(json!({"x": 5, "y": 4})),
    ])
    .unwrap();
    let mdf = MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap();
    let counts = mdf.count().unwrap();
    assert_eq!(counts.get(0, "x").and_then(Value::as_f64), Some(3.0));
    assert_eq!(counts.get(0, "y").and_then(Value::as_f64), Some(2.0));
    let sums = mdf.sum().unwrap();
    assert_eq!(sums.get(0, "x").and_then(Value::as_f64), Some(9.0));
    let maxes = mdf.max().unwrap();
    assert_eq!(maxes.get(0, "y").and_then(Value::as_f64), Some(4.0));
}

#[test]
fn test_describe() {
    let frame = numbers(&database()).describe(&[0.5]).unwrap();
    assert_eq!(frame.columns(), vec!["x".to_string()]);
    let at = |label: &str| frame.get(row_of(&frame, label), "x").and_then(Value::as_f64);
    assert_eq!(at("count"), Some(10.0));
    assert_eq!(at("mean"), Some(5.5));
    assert_eq!(at("min"), Some(1.0));
    assert_eq!(at("max"), Some(10.0));
    assert_eq!(at("50%"), Some(6.0));
}

#[test]
fn test_loc_iloc_and_chunks() {
    let mdf = numbers(&database());
    let by_label = mdf.clone().set_index(&["s"]).loc(&[Loc::from("s4")]).unwrap();
    assert_eq!(by_label.value().unwrap().get(0, "x"), Some(&json!(4)));

    let window = mdf.iloc(2, Some(5)).unwrap().value().unwrap();
    assert_eq!(window.column("x").unwrap(), vec![json!(3), json!(4), json!(5)]);

    let sizes: Vec<usize> = mdf
        .iterchunks(4)
        .map(|chunk| chunk.unwrap().len())
        .collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[test]
fn test_merge_scenario() {
    let db = database();
    let left = numbers(&db);
    let labels = db.collection("labels");
    labels
        .insert_many(vec![
            doc(json!({"g": "a", "label": "odd"})),
            doc(json!({"g": "b", "label": "even"})),
        ])
        .unwrap();
    let right = MDataFrame::new(labels, left.config().clone()).unwrap();
    let merged = left
        .query(MongoQ::new().with("x__lte", 3))
        .unwrap()
        .merge(&right, MergeOptions::default().on("g").how(JoinKind::Left).sort(false))
        .unwrap();
    let frame = merged.value().unwrap();
    assert_eq!(frame.len(), 3);
    assert_eq!(
        frame.column("label").unwrap(),
        vec![json!("odd"), json!("even"), json!("odd")]
    );
}

#[test]
fn test_inspect_and_indexes() {
    let mdf = numbers(&database())
        .query(MongoQ::new().with("x__gt", 2))
        .unwrap()
        .head(3);
    let plan = mdf.inspect().unwrap();
    assert_eq!(plan["collection"], json!("numbers"));
    assert_eq!(plan["query"], json!({"x": {"$gt": 2}}));
    assert_eq!(plan["limit"], json!(3));
    assert!(!plan.contains_key("pipeline"));

    let name = mdf.create_index(&["+x", "-s"]).unwrap();
    assert_eq!(mdf.create_index(&["+x", "-s"]).unwrap(), name);
    let indexes = mdf.list_indexes().unwrap();
    assert!(indexes.iter().any(|i| i.name == name));
}

// Benchmarks for query compilation and pipeline execution on the in-memory store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mdframe::store::{doc, Collection, Database, MemoryDatabase};
use mdframe::{ApplyOutput, EngineConfig, MDataFrame, MongoQ};
use serde_json::json;
use std::sync::Arc;

fn view(rows: usize) -> MDataFrame {
    let db = MemoryDatabase::new("bench").handle();
    let coll = db.collection("rows");
    coll.insert_many(
        (0..rows)
            .map(|i| doc(json!({"_om#rowid": i, "x": i, "g": i % 10, "s": format!("user{}", i)})))
            .collect(),
    )
    .unwrap();
    MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap()
}

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("mongoq_compile", |bench| {
        let query = (MongoQ::new().with("x__gt", 10) & MongoQ::new().with("g__in", json!([1, 2, 3])))
            | !MongoQ::new().with("s__startswith", "user9");
        bench.iter(|| black_box(&query).compile().unwrap());
    });
}

fn value_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_value");
    for rows in [100, 1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |bench, &rows| {
            let mdf = view(rows)
                .query(MongoQ::new().with("g__lt", 5))
                .unwrap()
                .head(500);
            bench.iter(|| black_box(mdf.value().unwrap()));
        });
    }
    group.finish();
}

fn groupby_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("groupby");
    for rows in [1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |bench, &rows| {
            let mdf = view(rows).nocache().apply(|ctx| {
                ctx.groupby(&["g"], doc(json!({"total": {"$sum": "$x"}})));
                Ok(ApplyOutput::Context)
            });
            bench.iter(|| black_box(mdf.value().unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, compile_benchmark, value_benchmark, groupby_benchmark);
criterion_main!(benches);

// src/apply/statistics.rs

use crate::core::config::Capability;
use crate::core::frame::Frame;
use crate::core::value::{as_f64, Document};
use crate::engine::error::{EngineError, Result};
use crate::engine::mdataframe::{MDataFrame, PrepareFn};
use crate::query::ops::{self, UnwindOptions};
use crate::store::doc;
use serde_json::json;
use std::sync::Arc;

/// Statistics computed in one `$facet` pipeline, one branch per column or
/// column pair, reshaped locally into a table.
pub trait Statistics {
    /// Rows indexed by `percentile`, one column per view column
    fn quantile(&self, quantiles: &[f64]) -> Result<MDataFrame>;

    /// Sample covariance matrix
    fn cov(&self) -> Result<MDataFrame>;

    /// Pearson correlation matrix; null where a column has no variance
    fn corr(&self) -> Result<MDataFrame>;
}

/// Element at `floor(n * q)` of the sorted values of `column`
pub fn percentile_pipeline(column: &str, q: f64) -> Vec<Document> {
    let field = format!("${}", column);
    vec![
        ops::sort(doc(json!({ column: 1 }))),
        ops::group(&[], doc(json!({ "values": { "$push": field } }))),
        ops::StageKind::Project.stage(json!({
            "var": { "$literal": column },
            "percentile": { "$literal": q },
            "value": { "$arrayElemAt": [
                "$values",
                { "$floor": { "$multiply": [{ "$size": "$values" }, q] } }
            ] },
        })),
    ]
}

/// Sample covariance of two columns given their means and the row count
pub fn covariance_pipeline(x: &str, y: &str, mean_x: f64, mean_y: f64, n: usize) -> Vec<Document> {
    let denominator = n.saturating_sub(1).max(1) as f64;
    vec![
        ops::group(
            &[],
            doc(json!({ "value": { "$sum": { "$multiply": [
                { "$subtract": [format!("${}", x), mean_x] },
                { "$subtract": [format!("${}", y), mean_y] },
            ] } } })),
        ),
        ops::StageKind::Project.stage(json!({
            "cov": { "$divide": ["$value", denominator] },
            "x": { "$literal": x },
            "y": { "$literal": y },
        })),
    ]
}

/// Pearson correlation of two columns from running sums
pub fn pearson_pipeline(x: &str, y: &str) -> Vec<Document> {
    let (fx, fy) = (format!("${}", x), format!("${}", y));
    let variance = |sum_sq: &str, sum: &str| {
        json!({ "$subtract": [
            { "$multiply": [sum_sq, "$count"] },
            { "$multiply": [sum, sum] },
        ] })
    };
    let product = json!({ "$multiply": [
        variance("$sumxsquared", "$sumx"),
        variance("$sumysquared", "$sumy"),
    ] });
    vec![
        ops::group(
            &[],
            doc(json!({
                "count": { "$sum": 1 },
                "sumx": { "$sum": fx },
                "sumy": { "$sum": fy },
                "sumxsquared": { "$sum": { "$multiply": [fx, fx] } },
                "sumysquared": { "$sum": { "$multiply": [fy, fy] } },
                "sumxy": { "$sum": { "$multiply": [fx, fy] } },
            })),
        ),
        ops::StageKind::Project.stage(json!({
            "rho": { "$cond": [
                { "$lte": [product, 0] },
                null,
                { "$divide": [
                    { "$subtract": [
                        { "$multiply": ["$sumxy", "$count"] },
                        { "$multiply": ["$sumx", "$sumy"] },
                    ] },
                    { "$sqrt": product },
                ] },
            ] },
            "x": { "$literal": x },
            "y": { "$literal": y },
        })),
    ]
}

fn require(view: &MDataFrame) -> Result<()> {
    if view.config().has_capability(Capability::Statistics) {
        Ok(())
    } else {
        Err(EngineError::CapabilityDisabled(
            Capability::Statistics.name().to_string(),
        ))
    }
}

/// `$facet` over the branches, then one document per branch result
/// One `$facet` branch per pipeline, each yielding a single row, flattened
/// into one document per row. Branches are named by position since the rows
/// carry their own labels.
fn facet_rows(pipelines: Vec<Vec<Document>>) -> Vec<Document> {
    let branches: Vec<(String, Vec<Document>)> = pipelines
        .into_iter()
        .enumerate()
        .map(|(i, pipeline)| (format!("_{}", i), pipeline))
        .collect();
    let names: Vec<String> = branches.iter().map(|(name, _)| name.clone()).collect();
    let plain = UnwindOptions {
        include_index: false,
        ..UnwindOptions::default()
    };
    let mut stages = vec![ops::facet(branches)];
    for name in &names {
        stages.push(ops::unwind(name, plain));
    }
    stages.push(ops::StageKind::Project.stage(json!({
        "_id": 0,
        "value": { "$objectToArray": "$$CURRENT" },
    })));
    stages.push(ops::unwind("value", plain));
    stages.push(ops::replace_root("value.v"));
    stages
}

fn pivoted(index: &'static str, columns: &'static str, values: &'static str) -> PrepareFn {
    Arc::new(move |frame: Frame| {
        if frame.is_empty() {
            return Ok(frame);
        }
        frame
            .pivot(index, columns, values)
            .map_err(EngineError::InvalidOp)
    })
}

/// Every ordered pair of columns, self-pairs included
fn column_pairs(columns: &[String]) -> Vec<(String, String)> {
    columns
        .iter()
        .flat_map(|x| columns.iter().map(move |y| (x.clone(), y.clone())))
        .collect()
}

impl Statistics for MDataFrame {
    fn quantile(&self, quantiles: &[f64]) -> Result<MDataFrame> {
        require(self)?;
        if let Some(q) = quantiles.iter().find(|q| !(0.0..1.0).contains(*q)) {
            return Err(EngineError::Compile(format!(
                "quantile {} is outside [0, 1)",
                q
            )));
        }
        let branches = self
            .columns
            .iter()
            .flat_map(|col| quantiles.iter().map(move |q| percentile_pipeline(col, *q)))
            .collect();
        Ok(self.with_pipeline(
            facet_rows(branches),
            pivoted("percentile", "var", "value"),
        ))
    }

    fn cov(&self) -> Result<MDataFrame> {
        require(self)?;
        let mut accumulators = Document::new();
        accumulators.insert("_count".to_string(), ops::count());
        for col in &self.columns {
            accumulators.insert(col.clone(), json!({ "$avg": format!("${}", col) }));
        }
        let mut stages = self.window_stages()?;
        stages.push(ops::group(&[], accumulators));
        let means = self.aggregate(&stages)?.pop().unwrap_or_default();
        let n = means.get("_count").and_then(as_f64).unwrap_or(0.0) as usize;
        let mean = |col: &str| means.get(col).and_then(as_f64).unwrap_or(0.0);

        let branches = column_pairs(&self.columns)
            .into_iter()
            .map(|(x, y)| covariance_pipeline(&x, &y, mean(&x), mean(&y), n))
            .collect();
        Ok(self.with_pipeline(facet_rows(branches), pivoted("x", "y", "cov")))
    }

    fn corr(&self) -> Result<MDataFrame> {
        require(self)?;
        let branches = column_pairs(&self.columns)
            .into_iter()
            .map(|(x, y)| pearson_pipeline(&x, &y))
            .collect();
        Ok(self.with_pipeline(facet_rows(branches), pivoted("x", "y", "rho")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::store::{Collection, Database, MemoryDatabase};
    use serde_json::Value;

    fn view(config: EngineConfig) -> MDataFrame {
        let db = MemoryDatabase::new("test").handle();
        let coll = db.collection("s");
        coll.insert_many(
            (0..100)
                .map(|i| doc(json!({"x": i, "y": 2 * i, "z": 100 - i})))
                .collect(),
        )
        .unwrap();
        MDataFrame::new(coll, Arc::new(config)).unwrap()
    }

    #[test]
    fn test_facet_rows_name_branches_by_position() {
        let stages = facet_rows(vec![percentile_pipeline("a_b", 0.5), percentile_pipeline("a", 0.5)]);
        let names: Vec<&String> = stages[0]["$facet"].as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["_0", "_1"]);
        assert_eq!(
            Value::Object(stages[1].clone()),
            json!({"$unwind": {"path": "$_0", "preserveNullAndEmptyArrays": false}})
        );
    }

    #[test]
    fn test_quantile_frame() {
        let frame = view(EngineConfig::default())
            .select(&["x", "y"])
            .unwrap()
            .quantile(&[0.5, 0.9])
            .unwrap()
            .value()
            .unwrap();
        assert_eq!(frame.index_names(), vec!["percentile".to_string()]);
        assert_eq!(frame.columns(), vec!["x".to_string(), "y".to_string()]);
        assert_eq!(frame.get(0, "x").and_then(as_f64), Some(50.0));
        assert_eq!(frame.get(1, "y").and_then(as_f64), Some(180.0));
        assert!(matches!(
            view(EngineConfig::default()).quantile(&[1.5]),
            Err(EngineError::Compile(_))
        ));
    }

    #[test]
    fn test_corr_and_cov() {
        let mdf = view(EngineConfig::default());
        let corr = mdf.corr().unwrap().value().unwrap();
        let rho = |row: usize, col: &str| corr.get(row, col).and_then(as_f64).unwrap();
        assert!((rho(0, "y") - 1.0).abs() < 1e-9);
        assert!((rho(0, "z") + 1.0).abs() < 1e-9);
        assert_eq!(rho(0, "y"), rho(1, "x"));

        let cov = mdf.select(&["x"]).unwrap().cov().unwrap().value().unwrap();
        let var = cov.get(0, "x").and_then(as_f64).unwrap();
        assert!((var - 841.666_666_666_666_7).abs() < 1e-6);
    }

    #[test]
    fn test_capability_gate() {
        let mut config = EngineConfig::default();
        config.apply.capabilities.retain(|c| *c != Capability::Statistics);
        assert!(matches!(
            view(config).corr(),
            Err(EngineError::CapabilityDisabled(_))
        ));
    }
}

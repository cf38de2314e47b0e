// src/engine/grouper.rs

use super::error::{EngineError, Result};
use super::mdataframe::MDataFrame;
use crate::core::frame::{Frame, FrameOptions};
use crate::core::value::{Document, Value};
use crate::query::ops;

/// (name, accumulator) of the statistics a grouper computes
const GROUP_STATS: &[(&str, &str)] = &[
    ("sum", "$sum"),
    ("mean", "$avg"),
    ("avg", "$avg"),
    ("min", "$min"),
    ("max", "$max"),
    ("std", "$stdDevSamp"),
    ("first", "$first"),
    ("last", "$last"),
];

fn accumulator_of(stat: &str) -> Result<&'static str> {
    GROUP_STATS
        .iter()
        .find(|(name, _)| *name == stat)
        .map(|(_, acc)| *acc)
        .ok_or_else(|| EngineError::Compile(format!("{} is not a known group statistic", stat)))
}

/// Grouped view of an `MDataFrame`. Aggregations run as one `$group` stage
/// and come back indexed by the group columns.
#[derive(Debug, Clone)]
pub struct MGrouper {
    view: MDataFrame,
    by: Vec<String>,
    sort: bool,
}

impl MGrouper {
    pub fn new(view: MDataFrame, by: &[&str]) -> Self {
        Self {
            view,
            by: by.iter().map(|c| c.to_string()).collect(),
            sort: true,
        }
    }

    /// Order groups by their keys (the default) or leave them in arrival order
    pub fn sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    pub fn by(&self) -> &[String] {
        &self.by
    }

    /// Columns aggregated by the shortcut statistics
    fn value_columns(&self) -> Vec<String> {
        self.view
            .columns
            .iter()
            .filter(|c| !self.by.contains(c))
            .cloned()
            .collect()
    }

    /// `(column, statistic)` pairs; outputs are named `<column>_<statistic>`
    pub fn agg(&self, specs: &[(&str, &str)]) -> Result<Frame> {
        let mut accumulators = Document::new();
        for (col, stat) in specs {
            let mut acc = Document::new();
            acc.insert(accumulator_of(stat)?.to_string(), Value::String(format!("${}", col)));
            accumulators.insert(format!("{}_{}", col, stat), Value::Object(acc));
        }
        self.aggregate(accumulators)
    }

    fn stat_all(&self, stat: &str) -> Result<Frame> {
        let columns = self.value_columns();
        let specs: Vec<(&str, &str)> = columns.iter().map(|c| (c.as_str(), stat)).collect();
        self.agg(&specs)
    }

    pub fn mean(&self) -> Result<Frame> {
        self.stat_all("mean")
    }

    pub fn std(&self) -> Result<Frame> {
        self.stat_all("std")
    }

    pub fn min(&self) -> Result<Frame> {
        self.stat_all("min")
    }

    pub fn max(&self) -> Result<Frame> {
        self.stat_all("max")
    }

    pub fn sum(&self) -> Result<Frame> {
        self.stat_all("sum")
    }

    /// Rows per group, one count column per value column (or a single
    /// `count` column when every column is a group key)
    pub fn count(&self) -> Result<Frame> {
        let mut columns = self.value_columns();
        if columns.is_empty() {
            columns.push("count".to_string());
        }
        let accumulators: Document = columns
            .into_iter()
            .map(|c| (c, ops::count()))
            .collect();
        self.aggregate(accumulators)
    }

    /// The stages computing `accumulators` per group
    pub fn pipeline(&self, accumulators: Document) -> Result<Vec<Document>> {
        let by: Vec<&str> = self.by.iter().map(String::as_str).collect();
        let mut stages = self.view.window_stages()?;
        stages.push(ops::group(&by, accumulators));
        if self.sort && !by.is_empty() {
            stages.push(ops::sort(
                by.iter()
                    .map(|c| (format!("_id.{}", c), Value::from(1)))
                    .collect(),
            ));
        }
        Ok(stages)
    }

    fn aggregate(&self, accumulators: Document) -> Result<Frame> {
        let mut force_columns = self.by.clone();
        force_columns.extend(accumulators.keys().cloned());
        let docs = self.view.aggregate(&self.pipeline(accumulators)?)?;
        let rows: Vec<Document> = docs
            .into_iter()
            .map(|doc| self.lift_keys(doc))
            .collect();
        let frame = Frame::from_documents(
            rows,
            &FrameOptions {
                force_columns,
                ..FrameOptions::default()
            },
        );
        if self.by.is_empty() {
            return Ok(frame);
        }
        let by: Vec<&str> = self.by.iter().map(String::as_str).collect();
        frame.set_index(&by).map_err(EngineError::ColumnNotFound)
    }

    /// Move `_id.<col>` group keys to top-level columns, keys first
    fn lift_keys(&self, doc: Document) -> Document {
        let mut row = Document::new();
        let id = doc.get("_id").and_then(Value::as_object);
        for col in &self.by {
            let value = id.and_then(|key| key.get(col)).cloned().unwrap_or(Value::Null);
            row.insert(col.clone(), value);
        }
        for (k, v) in doc {
            if k != "_id" {
                row.insert(k, v);
            }
        }
        row
    }

    /// Distinct group keys, each as `{col: value}`
    pub fn keys(&self) -> Result<Vec<Document>> {
        let docs = self.view.aggregate(&self.pipeline(Document::new())?)?;
        Ok(docs
            .into_iter()
            .map(|doc| {
                let mut row = self.lift_keys(doc);
                row.retain(|k, _| self.by.contains(k));
                row
            })
            .collect())
    }

    /// One view per group, narrowed to that group's key values
    pub fn groups(&self) -> Result<Vec<(Document, MDataFrame)>> {
        Ok(self
            .keys()?
            .into_iter()
            .map(|key| {
                let criteria: Document = key
                    .iter()
                    .map(|(col, v)| (col.replace("__", "."), v.clone()))
                    .collect();
                let mut view = self.view.clone();
                view.narrow(criteria);
                (key, view)
            })
            .collect())
    }
}

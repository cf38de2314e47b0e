// src/engine/mdataframe.rs

use super::cache::{CacheEntry, PipelineCache};
use super::error::{EngineError, Result};
use super::grouper::MGrouper;
use super::parallel::{ChunkInput, ParallelTransform};
use super::series::MSeries;
use crate::apply::{ApplyContext, ApplyOutput, FacetBranch, StatOp};
use crate::core::config::EngineConfig;
use crate::core::frame::{is_reserved, parse_idx_column, Frame, FrameOptions, Row, ROWID};
use crate::core::value::{as_f64, value_key, without_keys, Document, Value};
use crate::query::mongoq::MongoQ;
use crate::query::ops::{self, StageKind};
use crate::store::{
    CallFilter, Collection, Database, FilteredCollection, FindOptions, IndexInfo, IndexOptions,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Builds the pipeline of a view from an `ApplyContext`
pub type ApplyFn = Arc<dyn Fn(&mut ApplyContext) -> Result<ApplyOutput> + Send + Sync>;

/// Post-processes a materialized frame, e.g. pivoting statistics rows
pub type PrepareFn = Arc<dyn Fn(Frame) -> Result<Frame> + Send + Sync>;

/// Statistics reported by `describe`, in row order
const DESCRIBE_STATS: &[&str] = &["count", "mean", "std", "min", "max"];

/// Lazy, chainable tabular view of a collection.
///
/// Nothing runs until `value()` (or a sizing call). Without an apply function
/// the view is a plain find honoring projection, sort, skip and limit; with
/// one it is an aggregation pipeline built by that function.
///
/// ```ignore
/// let mdf = MDataFrame::new(db.collection("sales"), config)?;
/// let top = mdf
///     .query(MongoQ::new().with("region", "EU"))?
///     .sort(&["-amount"])
///     .head(10)
///     .value()?;
/// ```
#[derive(Clone)]
pub struct MDataFrame {
    pub(crate) collection: FilteredCollection,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) columns: Vec<String>,
    pub(crate) filter_criteria: Document,
    pub(crate) sort_order: Vec<String>,
    pub(crate) head_limit: Option<usize>,
    pub(crate) skip_topn: Option<usize>,
    /// Columns moved into the index after materialization
    pub(crate) index_columns: Vec<String>,
    /// Flattened `_idx#` columns stored in the collection
    pub(crate) stored_index: Vec<String>,
    pub(crate) has_rowid: bool,
    pub(crate) force_columns: Vec<String>,
    /// The filter implies its own order (`near`)
    pub(crate) sorted: bool,
    pub(crate) raw: bool,
    pub(crate) apply_fn: Option<ApplyFn>,
    pub(crate) prepare_fn: Option<PrepareFn>,
    pub(crate) cache: Option<PipelineCache>,
}

impl std::fmt::Debug for MDataFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MDataFrame")
            .field("collection", &self.collection)
            .field("columns", &self.columns)
            .field("filter_criteria", &self.filter_criteria)
            .field("sort_order", &self.sort_order)
            .field("head_limit", &self.head_limit)
            .field("skip_topn", &self.skip_topn)
            .field("index_columns", &self.index_columns)
            .field("apply", &self.apply_fn.is_some())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Stages of an applied view, ready to run
struct Compiled {
    stages: Vec<Document>,
    facets: bool,
}

impl MDataFrame {
    pub fn new(collection: Arc<dyn Collection>, config: Arc<EngineConfig>) -> Result<Self> {
        Self::from_filtered(FilteredCollection::new(collection, Document::new()), config)
    }

    /// A view over a filtered collection; columns come from a sample document
    pub fn from_filtered(collection: FilteredCollection, config: Arc<EngineConfig>) -> Result<Self> {
        let sample = collection.find_one(CallFilter::none())?;
        let mut columns = Vec::new();
        let mut stored_index: Vec<(usize, String)> = Vec::new();
        let mut has_rowid = false;
        for key in sample.iter().flat_map(|doc| doc.keys()) {
            if key == ROWID {
                has_rowid = true;
            } else if let Some((pos, _)) = parse_idx_column(key) {
                stored_index.push((pos, key.clone()));
            } else if !is_reserved(key) {
                columns.push(key.clone());
            }
        }
        stored_index.sort_by_key(|(pos, _)| *pos);
        let cache = config
            .cache
            .enabled
            .then(|| PipelineCache::new(&collection.database(), &config.cache.collection));
        Ok(Self {
            collection,
            config,
            columns,
            filter_criteria: Document::new(),
            sort_order: Vec::new(),
            head_limit: None,
            skip_topn: None,
            index_columns: Vec::new(),
            stored_index: stored_index.into_iter().map(|(_, name)| name).collect(),
            has_rowid,
            force_columns: Vec::new(),
            sorted: false,
            raw: false,
            apply_fn: None,
            prepare_fn: None,
            cache,
        })
    }

    pub fn name(&self) -> &str {
        self.collection.name()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.collection.database()
    }

    /// The collection with this view's filter criteria applied
    pub fn filtered(&self) -> FilteredCollection {
        self.collection.narrow(&self.filter_criteria)
    }

    /// Keep `_id` in materialized frames
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Columns that must appear in materialized frames, null when absent
    pub fn force_columns(mut self, columns: &[&str]) -> Self {
        self.force_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn select(&self, columns: &[&str]) -> Result<MDataFrame> {
        if let Some(missing) = columns.iter().find(|c| !self.columns.iter().any(|k| k == *c)) {
            return Err(EngineError::ColumnNotFound(missing.to_string()));
        }
        let mut view = self.clone();
        view.columns = columns.iter().map(|c| c.to_string()).collect();
        Ok(view)
    }

    pub fn column(&self, name: &str) -> Result<MSeries> {
        self.select(&[name]).map(MSeries::new)
    }

    pub fn query(&self, q: MongoQ) -> Result<MDataFrame> {
        let mut view = self.clone();
        view.query_inplace(q)?;
        Ok(view)
    }

    /// Narrow the view; repeated queries AND together
    pub fn query_inplace(&mut self, q: MongoQ) -> Result<&mut Self> {
        let compiled = q.compile()?;
        self.sorted |= q.sorted();
        self.narrow(compiled);
        Ok(self)
    }

    pub(crate) fn narrow(&mut self, criteria: Document) {
        let current = std::mem::take(&mut self.filter_criteria);
        self.filter_criteria = merge_criteria(current, criteria);
    }

    /// Sort by `+col` / `-col` specs
    pub fn sort(mut self, specs: &[&str]) -> Self {
        self.sort_order = specs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn head(mut self, n: usize) -> Self {
        self.head_limit = Some(n);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip_topn = Some(n);
        self
    }

    pub fn set_index(mut self, columns: &[&str]) -> Self {
        self.index_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// The last n rows of the current selection
    pub fn tail(self, n: usize) -> Result<Self> {
        let len = self.input_len()?;
        let start = self.skip_topn.unwrap_or(0) + len.saturating_sub(n);
        let mut view = self.skip(start);
        view.head_limit = Some(n.min(len));
        Ok(view)
    }

    pub fn groupby(&self, by: &[&str]) -> MGrouper {
        MGrouper::new(self.clone(), by)
    }

    /// A view whose pipeline is built by `f`; replaces any previous apply function
    pub fn apply<F>(&self, f: F) -> MDataFrame
    where
        F: Fn(&mut ApplyContext) -> Result<ApplyOutput> + Send + Sync + 'static,
    {
        let mut view = self.clone();
        view.apply_inplace(f);
        view
    }

    pub fn apply_inplace<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut ApplyContext) -> Result<ApplyOutput> + Send + Sync + 'static,
    {
        self.apply_fn = Some(Arc::new(f));
        self
    }

    /// A view post-processing its frame with `f`
    pub fn with_prepare<F>(&self, f: F) -> MDataFrame
    where
        F: Fn(Frame) -> Result<Frame> + Send + Sync + 'static,
    {
        let mut view = self.clone();
        view.prepare_fn = Some(Arc::new(f));
        view
    }

    pub fn noapply(&self) -> MDataFrame {
        let mut view = self.clone();
        view.apply_fn = None;
        view.prepare_fn = None;
        view
    }

    pub fn nocache(&self) -> MDataFrame {
        let mut view = self.clone();
        view.cache = None;
        view
    }

    /// Drop filters, limits and ordering
    pub fn reset(&mut self) -> &mut Self {
        self.filter_criteria = Document::new();
        self.sort_order.clear();
        self.head_limit = None;
        self.skip_topn = None;
        self.force_columns.clear();
        self.sorted = false;
        self
    }

    /// A fixed pipeline view, e.g. for statistics
    pub(crate) fn with_pipeline(&self, stages: Vec<Document>, prepare: PrepareFn) -> MDataFrame {
        let mut view = self.clone();
        view.sort_order.clear();
        view.index_columns.clear();
        view.force_columns.clear();
        view.apply_fn = Some(Arc::new(move |_: &mut ApplyContext| {
            Ok(ApplyOutput::Pipeline(stages.clone()))
        }));
        view.prepare_fn = Some(prepare);
        view
    }

    /// A fresh context over this view's columns
    pub fn apply_context(&self) -> ApplyContext {
        ApplyContext::new(
            self.columns.clone(),
            self.stored_index
                .iter()
                .chain(&self.index_columns)
                .cloned()
                .collect(),
            self.config.apply.capabilities.clone(),
        )
    }

    /// Execute and reconstruct the result
    pub fn value(&self) -> Result<Frame> {
        let frame = match &self.apply_fn {
            None => {
                let docs = self.find_docs()?;
                self.reconstruct(docs, false)?
            }
            Some(apply_fn) => {
                let compiled = self.compile(apply_fn)?;
                let docs = self.run_cached(&compiled.stages)?;
                self.reconstruct(docs, compiled.facets)?
            }
        };
        match &self.prepare_fn {
            Some(prepare) => prepare(frame),
            None => Ok(frame),
        }
    }

    /// The pipeline `value()` runs after the leading `$match`, if any
    pub fn pipeline(&self) -> Result<Option<Vec<Document>>> {
        match &self.apply_fn {
            Some(apply_fn) => Ok(Some(self.compile(apply_fn)?.stages)),
            None => Ok(None),
        }
    }

    fn compile(&self, apply_fn: &ApplyFn) -> Result<Compiled> {
        let mut ctx = self.apply_context();
        let output = apply_fn(&mut ctx).map_err(|e| e.apply_failed(&ctx.stages()))?;
        let (body, facets) = match output {
            ApplyOutput::Context => (ctx.stages(), false),
            ApplyOutput::Pipeline(stages) => (stages, false),
            ApplyOutput::Facets(branches) => {
                let branches = branches
                    .into_iter()
                    .map(|(name, branch)| {
                        let stages = match branch {
                            FacetBranch::Context(branch_ctx) => {
                                let mut stages = branch_ctx.stages();
                                if let Some(col) = branch_ctx.columns.first() {
                                    let mut rename = Document::new();
                                    rename.insert(name.clone(), Value::String(format!("${}", col)));
                                    stages.push(StageKind::Project.stage(Value::Object(rename)));
                                }
                                stages
                            }
                            FacetBranch::Pipeline(stages) => stages,
                        };
                        (name, stages)
                    })
                    .collect();
                (vec![ops::facet(branches)], true)
            }
        };
        let mut stages = self.window_stages()?;
        stages.extend(body);
        if !self.sort_order.is_empty() && !facets {
            stages.push(ops::sort(self.sort_key()?));
        }
        Ok(Compiled { stages, facets })
    }

    /// `$skip`/`$limit` of the view, after the view's sort order or, failing
    /// that, the row id where there is one
    pub(crate) fn window_stages(&self) -> Result<Vec<Document>> {
        let mut stages = Vec::new();
        if self.skip_topn.is_none() && self.head_limit.is_none() {
            return Ok(stages);
        }
        if !self.sort_order.is_empty() {
            stages.push(ops::sort(self.sort_key()?));
        } else if self.has_rowid && !self.sorted {
            stages.push(ops::sort(rowid_order()));
        }
        if let Some(n) = self.skip_topn {
            stages.push(ops::skip(n));
        }
        if let Some(n) = self.head_limit {
            stages.push(ops::limit(n));
        }
        Ok(stages)
    }

    fn sort_key(&self) -> Result<Document> {
        let specs: Vec<&str> = self.sort_order.iter().map(String::as_str).collect();
        ops::make_sortkey(&specs)
    }

    fn find_docs(&self) -> Result<Vec<Document>> {
        let mut options = FindOptions::default();
        if !self.columns.is_empty() {
            let mut projection: Document = self
                .columns
                .iter()
                .chain(&self.stored_index)
                .map(|c| (c.clone(), Value::from(1)))
                .collect();
            projection.insert(ROWID.to_string(), Value::from(1));
            options = options.projection(projection);
        }
        if !self.sort_order.is_empty() {
            options = options.sort(self.sort_key()?);
        } else if self.has_rowid && !self.sorted {
            options = options.sort(rowid_order());
        }
        if let Some(n) = self.skip_topn {
            options = options.skip(n);
        }
        if let Some(n) = self.head_limit {
            options = options.limit(n);
        }
        let trace = self.config.query.trace;
        let cursor = self
            .filtered()
            .find(CallFilter::none(), options)
            .map_err(|e| e.attributed(trace))?;
        Ok(cursor.into_vec())
    }

    /// Run stages behind the view's filter
    pub(crate) fn aggregate(&self, stages: &[Document]) -> Result<Vec<Document>> {
        let trace = self.config.query.trace;
        let cursor = self
            .filtered()
            .aggregate(stages, CallFilter::none())
            .map_err(|e| e.attributed(trace))?;
        Ok(cursor.into_vec())
    }

    fn run_cached(&self, stages: &[Document]) -> Result<Vec<Document>> {
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&self.cache_key(stages))? {
                let result = self.database().collection(&entry.result);
                return Ok(result.find(&Document::new(), FindOptions::default())?.into_vec());
            }
        }
        self.aggregate(stages)
    }

    fn cache_key(&self, stages: &[Document]) -> String {
        PipelineCache::key(self.name(), self.filtered().query(), stages)
    }

    fn reconstruct(&self, docs: Vec<Document>, facets: bool) -> Result<Frame> {
        let docs = if facets { merge_facets(docs) } else { docs };
        let options = FrameOptions {
            index_names: None,
            rowid_sort: self.apply_fn.is_none() && !self.sorted && self.sort_order.is_empty(),
            raw: self.raw,
            force_columns: self.force_columns.clone(),
        };
        let frame = Frame::from_documents(docs, &options);
        let present: Vec<&str> = self
            .index_columns
            .iter()
            .filter(|c| frame.schema.get_field(c).is_some())
            .map(String::as_str)
            .collect();
        if present.is_empty() {
            return Ok(frame);
        }
        frame.set_index(&present).map_err(EngineError::ColumnNotFound)
    }

    /// Number of rows; applied views are materialized to count them
    pub fn len(&self) -> Result<usize> {
        match self.apply_fn {
            Some(_) => Ok(self.value()?.len()),
            None => self.input_len(),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Rows selected by filter, skip and limit, before any apply function
    pub(crate) fn input_len(&self) -> Result<usize> {
        let trace = self.config.query.trace;
        let total = self
            .filtered()
            .count_documents(CallFilter::none())
            .map_err(|e| e.attributed(trace))?;
        let n = total.saturating_sub(self.skip_topn.unwrap_or(0));
        Ok(self.head_limit.map_or(n, |limit| n.min(limit)))
    }

    /// (rows, columns)
    pub fn shape(&self) -> Result<(usize, usize)> {
        match self.apply_fn {
            Some(_) => Ok(self.value()?.shape()),
            None => Ok((self.input_len()?, self.columns.len())),
        }
    }

    /// Non-null values per column, as a single row
    pub fn count(&self) -> Result<Frame> {
        let doc = self.column_aggregate(&self.columns, |c| {
            json!({"$sum": {"$cond": [{"$eq": [format!("${}", c), null]}, 0, 1]}})
        })?;
        single_row(&self.columns, &doc, Value::from(0))
    }

    /// One statistic per column, as a single row
    pub fn stat(&self, op: StatOp) -> Result<Frame> {
        let doc = self.column_aggregate(&self.columns, |c| {
            let mut acc = Document::new();
            acc.insert(op.accumulator().to_string(), Value::String(format!("${}", c)));
            Value::Object(acc)
        })?;
        single_row(&self.columns, &doc, Value::Null)
    }

    pub fn mean(&self) -> Result<Frame> {
        self.stat(StatOp::Mean)
    }

    pub fn std(&self) -> Result<Frame> {
        self.stat(StatOp::Std)
    }

    pub fn min(&self) -> Result<Frame> {
        self.stat(StatOp::Min)
    }

    pub fn max(&self) -> Result<Frame> {
        self.stat(StatOp::Max)
    }

    pub fn sum(&self) -> Result<Frame> {
        self.stat(StatOp::Sum)
    }

    fn column_aggregate<F>(&self, columns: &[String], acc: F) -> Result<Document>
    where
        F: Fn(&str) -> Value,
    {
        let accumulators: Document = columns.iter().map(|c| (c.clone(), acc(c))).collect();
        let mut stages = self.window_stages()?;
        stages.push(ops::group(&[], accumulators));
        let mut docs = self.aggregate(&stages)?;
        Ok(docs
            .pop()
            .map(|doc| without_keys(&doc, &["_id"]))
            .unwrap_or_default())
    }

    /// Summary statistics of the numeric columns, one row per statistic and
    /// one per requested quantile (labelled `25%`, ...)
    pub fn describe(&self, quantiles: &[f64]) -> Result<Frame> {
        use crate::apply::Statistics;

        let sample = self.filtered().find_one(CallFilter::none())?.unwrap_or_default();
        let numeric: Vec<String> = self
            .columns
            .iter()
            .filter(|c| sample.get(c.as_str()).and_then(as_f64).is_some())
            .cloned()
            .collect();
        let mut accumulators = Document::new();
        for col in &numeric {
            let field = format!("${}", col);
            accumulators.insert(
                format!("{}_count", col),
                json!({"$sum": {"$cond": [{"$eq": [field, null]}, 0, 1]}}),
            );
            accumulators.insert(format!("{}_mean", col), json!({ "$avg": field }));
            accumulators.insert(format!("{}_std", col), json!({ "$stdDevSamp": field }));
            accumulators.insert(format!("{}_min", col), json!({ "$min": field }));
            accumulators.insert(format!("{}_max", col), json!({ "$max": field }));
        }
        let mut stages = self.window_stages()?;
        stages.push(ops::group(&[], accumulators));
        let summary = self.aggregate(&stages)?.pop().unwrap_or_default();

        let mut rows: Vec<Row> = DESCRIBE_STATS
            .iter()
            .map(|stat| Row {
                index: vec![Value::from(*stat)],
                values: numeric
                    .iter()
                    .map(|col| match summary.get(&format!("{}_{}", col, stat)) {
                        Some(v) => v.clone(),
                        None if *stat == "count" => Value::from(0),
                        None => Value::Null,
                    })
                    .collect(),
            })
            .collect();

        if !quantiles.is_empty() && !numeric.is_empty() {
            let names: Vec<&str> = numeric.iter().map(String::as_str).collect();
            let percentiles = self.select(&names)?.quantile(quantiles)?.value()?;
            for q in quantiles {
                let at = (0..percentiles.len())
                    .find(|&i| percentiles.index_of(i).first().and_then(as_f64) == Some(*q));
                rows.push(Row {
                    index: vec![Value::from(format!("{}%", (q * 10_000.0).round() / 100.0))],
                    values: numeric
                        .iter()
                        .map(|col| {
                            at.and_then(|i| percentiles.get(i, col))
                                .cloned()
                                .unwrap_or(Value::Null)
                        })
                        .collect(),
                });
            }
        }
        Frame::from_rows(vec!["stat".to_string()], numeric, rows).map_err(EngineError::InvalidOp)
    }

    /// Materialize in chunks of `chunksize` rows
    pub fn iterchunks(&self, chunksize: usize) -> Chunks {
        Chunks {
            view: self.clone(),
            chunksize: chunksize.max(1),
            offset: 0,
            done: false,
        }
    }

    /// What `value()` would run: collection, filter, projection, window and pipeline
    pub fn inspect(&self) -> Result<Document> {
        let mut out = Document::new();
        out.insert("collection".to_string(), Value::from(self.name()));
        out.insert(
            "query".to_string(),
            Value::Object(self.filtered().query().clone()),
        );
        out.insert(
            "projection".to_string(),
            Value::Array(self.columns.iter().cloned().map(Value::String).collect()),
        );
        if !self.sort_order.is_empty() {
            out.insert("sort".to_string(), Value::Object(self.sort_key()?));
        }
        if let Some(n) = self.skip_topn {
            out.insert("skip".to_string(), Value::from(n as u64));
        }
        if let Some(n) = self.head_limit {
            out.insert("limit".to_string(), Value::from(n as u64));
        }
        if let Some(stages) = self.pipeline()? {
            out.insert(
                "pipeline".to_string(),
                Value::Array(stages.into_iter().map(Value::Object).collect()),
            );
        }
        Ok(out)
    }

    /// Create an index from `+col` / `-col` / `@col` specs; idempotent
    pub fn create_index(&self, specs: &[&str]) -> Result<String> {
        let spec = ops::make_index(specs)?;
        self.collection.create_index(
            &spec.keys,
            IndexOptions {
                name: Some(spec.name),
                ..IndexOptions::default()
            },
        )
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        self.collection.list_indexes()
    }

    /// Run the apply pipeline into a cached result collection and return its
    /// name. An unchanged pipeline is not run again.
    pub fn persist(&self) -> Result<String> {
        let (Some(apply_fn), Some(cache)) = (&self.apply_fn, &self.cache) else {
            return Err(EngineError::InvalidOp(
                "persist requires an apply function and an enabled cache".to_string(),
            ));
        };
        let compiled = self.compile(apply_fn)?;
        let key = self.cache_key(&compiled.stages);
        if let Some(entry) = cache.get(&key)? {
            return Ok(entry.result);
        }
        let result = PipelineCache::result_name(&key);
        let mut stages = compiled.stages;
        stages.push(ops::out(&result));
        self.aggregate(&stages)?;
        cache.set(
            &key,
            &CacheEntry {
                collection: self.name().to_string(),
                result: result.clone(),
            },
        )?;
        Ok(result)
    }

    /// Forget the cached result of this pipeline, or with `full` every
    /// result computed from this collection
    pub fn reset_cache(&self, full: bool) -> Result<usize> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        if full {
            return cache.remove_for_collection(self.name());
        }
        match &self.apply_fn {
            Some(apply_fn) => {
                let compiled = self.compile(apply_fn)?;
                Ok(usize::from(cache.remove(&self.cache_key(&compiled.stages))?))
            }
            None => Ok(0),
        }
    }

    /// Chunked local transform of this view on a worker pool
    pub fn transform<F>(&self, f: F) -> ParallelTransform
    where
        F: Fn(&mut ChunkInput, usize) -> Result<Option<Frame>> + Send + Sync + 'static,
    {
        ParallelTransform::new(self.clone(), f)
    }

    /// The same view through another database connection
    pub fn relinked(&self, db: &Arc<dyn Database>) -> MDataFrame {
        let mut view = self.clone();
        view.collection = self.collection.relinked(db.collection(self.name()));
        view.cache = self.cache.as_ref().map(|c| c.relinked(db));
        view
    }

    /// Export to a Parquet file in chunks, returning the number of rows written
    pub fn to_parquet(&self, path: impl AsRef<Path>, chunksize: usize) -> Result<usize> {
        crate::core::io::write_parquet(self, path, chunksize)
    }
}

/// AND two filter documents, extending an existing `$and` list
fn merge_criteria(current: Document, more: Document) -> Document {
    if more.is_empty() {
        return current;
    }
    if current.is_empty() {
        return more;
    }
    if let (1, Some(Value::Array(list))) = (current.len(), current.get("$and")) {
        let mut list = list.clone();
        list.push(Value::Object(more));
        let mut out = Document::new();
        out.insert("$and".to_string(), Value::Array(list));
        return out;
    }
    if more.keys().any(|k| current.contains_key(k)) {
        return ops::and(vec![current, more]);
    }
    let mut merged = current;
    merged.extend(more);
    merged
}

fn rowid_order() -> Document {
    let mut order = Document::new();
    order.insert(ROWID.to_string(), Value::from(1));
    order
}

/// Join the branch arrays of `$facet` output into rows, aligned by `_id`
/// or else by position
fn merge_facets(docs: Vec<Document>) -> Vec<Document> {
    let mut rows: Vec<Document> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for facet in docs {
        for (branch, items) in facet {
            let Value::Array(items) = items else {
                continue;
            };
            if branch == "_id" {
                continue;
            }
            for (pos, item) in items.into_iter().enumerate() {
                let Value::Object(item) = item else {
                    continue;
                };
                let key = match item.get("_id") {
                    Some(id) => value_key(id),
                    None => format!("#{}", pos),
                };
                let at = *by_key.entry(key).or_insert_with(|| {
                    rows.push(Document::new());
                    rows.len() - 1
                });
                for (k, v) in item {
                    if k == "_id" && rows[at].contains_key("_id") {
                        continue;
                    }
                    rows[at].insert(k, v);
                }
            }
        }
    }
    rows
}

fn single_row(columns: &[String], doc: &Document, missing: Value) -> Result<Frame> {
    let row = Row {
        index: Vec::new(),
        values: columns
            .iter()
            .map(|c| doc.get(c).cloned().unwrap_or_else(|| missing.clone()))
            .collect(),
    };
    Frame::from_rows(Vec::new(), columns.to_vec(), vec![row]).map_err(EngineError::InvalidOp)
}

/// Iterator over consecutive chunks of a view
pub struct Chunks {
    view: MDataFrame,
    chunksize: usize,
    offset: usize,
    done: bool,
}

impl Iterator for Chunks {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let remaining = self
            .view
            .head_limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.offset));
        let size = self.chunksize.min(remaining);
        if size == 0 {
            self.done = true;
            return None;
        }
        let mut chunk = self.view.clone();
        chunk.skip_topn = Some(self.view.skip_topn.unwrap_or(0) + self.offset);
        chunk.head_limit = Some(size);
        match chunk.value() {
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
            Ok(frame) if frame.is_empty() => {
                self.done = true;
                None
            }
            Ok(frame) => {
                self.done = frame.len() < size;
                self.offset += size;
                Some(Ok(frame))
            }
        }
    }
}

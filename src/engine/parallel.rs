// src/engine/parallel.rs

use super::error::{EngineError, Result};
use super::mdataframe::MDataFrame;
use crate::core::config::EngineConfig;
use crate::core::frame::Frame;
use crate::store::Database;
use rayon::prelude::*;
use std::sync::Arc;

/// What a transform function receives for its chunk
#[derive(Debug, Clone)]
pub enum ChunkInput {
    /// The chunk, materialized by the worker
    Frame(Frame),
    /// The chunk as a view, resolved by the function itself
    View(MDataFrame),
}

impl ChunkInput {
    /// The chunk as a frame, materializing a view
    pub fn resolve(&self) -> Result<Frame> {
        match self {
            ChunkInput::Frame(frame) => Ok(frame.clone()),
            ChunkInput::View(view) => view.value(),
        }
    }
}

/// Who materializes the chunk before the function runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolve {
    #[default]
    Worker,
    Function,
}

/// Transform function: chunk input and chunk number to the rows to write.
/// `None` writes the input unchanged.
pub type TransformFn = Arc<dyn Fn(&mut ChunkInput, usize) -> Result<Option<Frame>> + Send + Sync>;

/// Chunked transform of a view on a bounded worker pool. Each chunk is read,
/// transformed and appended to the output collection independently.
#[derive(Clone)]
pub struct ParallelTransform {
    view: MDataFrame,
    func: TransformFn,
    n_jobs: i32,
    chunksize: usize,
    maxobs: Option<usize>,
    outname: String,
    append: bool,
    resolve: Resolve,
}

impl std::fmt::Debug for ParallelTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelTransform")
            .field("source", &self.view.name())
            .field("n_jobs", &self.n_jobs)
            .field("chunksize", &self.chunksize)
            .field("maxobs", &self.maxobs)
            .field("outname", &self.outname)
            .field("append", &self.append)
            .field("resolve", &self.resolve)
            .finish()
    }
}

impl ParallelTransform {
    pub fn new<F>(view: MDataFrame, func: F) -> Self
    where
        F: Fn(&mut ChunkInput, usize) -> Result<Option<Frame>> + Send + Sync + 'static,
    {
        let transform = view.config.transform.clone();
        let outname = format!("_tmp{}_", view.name());
        Self {
            view,
            func: Arc::new(func),
            n_jobs: transform.n_jobs,
            chunksize: transform.chunksize,
            maxobs: None,
            outname,
            append: false,
            resolve: Resolve::Worker,
        }
    }

    pub fn n_jobs(mut self, n_jobs: i32) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    pub fn chunksize(mut self, chunksize: usize) -> Self {
        self.chunksize = chunksize.max(1);
        self
    }

    /// Process at most this many rows of the source
    pub fn maxobs(mut self, maxobs: usize) -> Self {
        self.maxobs = Some(maxobs);
        self
    }

    pub fn outname(mut self, name: &str) -> Self {
        self.outname = name.to_string();
        self
    }

    /// Keep existing rows of the output collection
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn resolve(mut self, resolve: Resolve) -> Self {
        self.resolve = resolve;
        self
    }

    /// Rows to process and the (offset, size) of each chunk
    pub fn chunks(&self) -> Result<Vec<(usize, usize)>> {
        let mut total = self.view.input_len()?;
        if let Some(maxobs) = self.maxobs {
            total = total.min(maxobs);
        }
        Ok((0..total)
            .step_by(self.chunksize)
            .map(|offset| (offset, self.chunksize.min(total - offset)))
            .collect())
    }

    /// Run every chunk and return the number of rows written
    pub fn run(&self) -> Result<usize> {
        let db = self.view.database();
        if !self.append {
            db.drop_collection(&self.outname)?;
        }
        let chunks = self.chunks()?;
        let workers = EngineConfig::resolve_n_jobs(self.n_jobs);
        tracing::debug!(
            source = %self.view.name(),
            target = %self.outname,
            chunks = chunks.len(),
            workers,
            "transform start"
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| EngineError::InvalidOp(format!("cannot start worker pool: {}", e)))?;
        let results: Vec<Result<usize>> = pool.install(|| {
            chunks
                .par_iter()
                .enumerate()
                .map(|(i, &(offset, size))| {
                    self.run_chunk(i, offset, size)
                        .map_err(|e| EngineError::Chunk {
                            chunk: i,
                            source: Box::new(e),
                        })
                })
                .collect()
        });

        let total = results.len();
        let mut written = 0;
        let mut failed = 0;
        let mut first = None;
        for result in results {
            match result {
                Ok(n) => written += n,
                Err(e) => {
                    tracing::warn!(error = %e, "transform chunk failed");
                    failed += 1;
                    first.get_or_insert(e);
                }
            }
        }
        if let Some(first) = first {
            return Err(EngineError::Transform {
                failed,
                total,
                first: Box::new(first),
            });
        }
        tracing::debug!(target = %self.outname, written, "transform done");
        Ok(written)
    }

    fn run_chunk(&self, chunk: usize, offset: usize, size: usize) -> Result<usize> {
        let db = self.view.database().relink();
        let base = self.view.relinked(&db);
        let skip = base.skip_topn.unwrap_or(0) + offset;
        let view = base.skip(skip).head(size);
        let mut input = match self.resolve {
            Resolve::Worker => ChunkInput::Frame(view.value()?),
            Resolve::Function => ChunkInput::View(view),
        };
        let frame = match (self.func)(&mut input, chunk)? {
            Some(frame) => frame,
            None => input.resolve()?,
        };
        if frame.is_empty() {
            tracing::trace!(chunk, "transform chunk empty");
            return Ok(0);
        }
        let docs = frame.to_documents(offset);
        let written = db.collection(&self.outname).insert_many(docs)?;
        tracing::trace!(chunk, offset, written, "transform chunk written");
        Ok(written)
    }

    /// Run and materialize the output
    pub fn value(&self) -> Result<Frame> {
        self.persist()?.value()
    }

    /// Run and return a view of the output collection
    pub fn persist(&self) -> Result<MDataFrame> {
        self.run()?;
        let db = self.view.database();
        MDataFrame::new(db.collection(&self.outname), self.view.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{doc, Collection, MemoryDatabase};
    use serde_json::json;

    fn view(n: usize) -> MDataFrame {
        let db = MemoryDatabase::new("test").handle();
        let coll = db.collection("p");
        coll.insert_many((0..n).map(|i| doc(json!({"_om#rowid": i, "x": i}))).collect())
            .unwrap();
        MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap()
    }

    #[test]
    fn test_chunks_cover_rows() {
        let t = view(25).transform(|_, _| Ok(None)).chunksize(10);
        assert_eq!(t.chunks().unwrap(), vec![(0, 10), (10, 10), (20, 5)]);
        assert_eq!(t.clone().maxobs(12).chunks().unwrap(), vec![(0, 10), (10, 2)]);
    }

    #[test]
    fn test_identity_transform_keeps_order() {
        let frame = view(25)
            .transform(|_, _| Ok(None))
            .chunksize(7)
            .n_jobs(3)
            .value()
            .unwrap();
        assert_eq!(frame.len(), 25);
        let xs = frame.column("x").unwrap();
        assert_eq!(xs.first(), Some(&json!(0)));
        assert_eq!(xs.last(), Some(&json!(24)));
    }

    #[test]
    fn test_failed_chunks_are_counted() {
        let t = view(30)
            .transform(|_, chunk| {
                if chunk == 1 {
                    Err(EngineError::InvalidOp("bad chunk".to_string()))
                } else {
                    Ok(None)
                }
            })
            .chunksize(10)
            .n_jobs(2);
        match t.run() {
            Err(EngineError::Transform { failed, total, first }) => {
                assert_eq!((failed, total), (1, 3));
                assert!(matches!(*first, EngineError::Chunk { chunk: 1, .. }));
            }
            other => panic!("expected a transform error, got {:?}", other),
        }
    }
}

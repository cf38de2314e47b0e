// src/lib.rs

//! Lazy, pandas-like dataframe views over document collections.
//!
//! Views compile into the store's native filter documents and aggregation
//! pipelines; nothing runs until a view is materialized into a `Frame`.

pub mod apply;
pub mod core;
pub mod engine;
pub mod query;
pub mod store;

// Re-exports for a flat public API
pub use apply::{ApplyContext, ApplyOutput, FacetBranch, Statistics};
pub use core::{Capability, EngineConfig, Frame, Value};
pub use engine::{
    EngineError, JoinKind, Loc, MDataFrame, MGrouper, MSeries, MergeOptions, ParallelTransform,
    PipelineCache, Result,
};
pub use query::{Filter, MongoQ};
pub use store::{Collection, Database, FilteredCollection, MemoryDatabase};

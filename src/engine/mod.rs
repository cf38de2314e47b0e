pub mod cache;
pub mod error;
pub mod grouper;
pub mod loc;
pub mod mdataframe;
pub mod merge;
pub mod parallel;
pub mod series;

pub use cache::{CacheEntry, PipelineCache};
pub use error::{EngineError, Result};
pub use grouper::MGrouper;
pub use loc::Loc;
pub use mdataframe::{ApplyFn, Chunks, MDataFrame, PrepareFn};
pub use merge::{JoinKind, MergeOptions};
pub use parallel::{ChunkInput, ParallelTransform, Resolve, TransformFn};
pub use series::MSeries;

// src/engine/error.rs

use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed query or pipeline specification, raised before any store call
    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Execution failure attributed to a document field
    #[error("Query failed on field '{field}': {source}")]
    Query {
        field: String,
        #[source]
        source: StoreError,
    },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOp(String),

    /// A capability used by an apply function is not enabled
    #[error("Capability not enabled: {0}")]
    CapabilityDisabled(String),

    /// Failure inside an apply function, with the stages built so far
    #[error("apply function failed after {} stage(s): {source}", stages.len())]
    Apply {
        stages: Vec<serde_json::Value>,
        #[source]
        source: Box<EngineError>,
    },

    #[error("{0} is not implemented on a filtered collection")]
    NotImplemented(String),

    #[error("Chunk {chunk} failed: {source}")]
    Chunk {
        chunk: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("{failed} of {total} chunk(s) failed, first: {first}")]
    Transform {
        failed: usize,
        total: usize,
        first: Box<EngineError>,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Attribute a driver error to its field unless raw errors were requested
    pub fn from_store(e: StoreError, trace: bool) -> Self {
        match e.field() {
            Some(field) if !trace => EngineError::Query {
                field: field.to_string(),
                source: e,
            },
            _ => EngineError::Store(e),
        }
    }

    /// `from_store` for errors already lifted into `EngineError`
    pub fn attributed(self, trace: bool) -> Self {
        match self {
            EngineError::Store(e) => EngineError::from_store(e, trace),
            other => other,
        }
    }

    /// Wrap an apply function failure with the stages built before it
    pub fn apply_failed(self, stages: &[crate::core::value::Document]) -> Self {
        EngineError::Apply {
            stages: stages.iter().cloned().map(serde_json::Value::Object).collect(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

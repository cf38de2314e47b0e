// src/store/error.rs

use thiserror::Error;

/// Errors raised by a store driver while executing queries or pipelines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{operator} cannot be applied to field '{field}': {message}")]
    TypeMismatch {
        operator: String,
        field: String,
        message: String,
    },

    #[error("Invalid regular expression on field '{field}': {message}")]
    InvalidRegex { field: String, message: String },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// The document field the error refers to, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            StoreError::TypeMismatch { field, .. } | StoreError::InvalidRegex { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

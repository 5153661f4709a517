//! Error types for kernel ridge regression

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KrrError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Kernel evaluation failed: {0}")]
    KernelEvaluation(String),

    #[error("Preconditioner is singular: pivot {pivot:e} at index {index}")]
    PreconditionerSingular { index: usize, pivot: f64 },

    #[error("Resource exhausted: need at least {required} bytes, budget is {available} bytes")]
    ResourceExhausted { required: usize, available: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KrrError>;

//! Error types for the analytics engine.
//!
//! Division-by-zero shaped situations (zero variance, zero baseline, zero
//! denominator) are never errors here; each engine substitutes a documented
//! value instead.

use thiserror::Error;

/// Result type alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by insightforge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Raw input could not be parsed as delimited tabular text
    #[error("Structural parse error: {0}")]
    StructuralParse(String),

    /// Required columns are absent from an uploaded dataset
    #[error("Missing columns: {}", .missing.join(", "))]
    SchemaValidation { missing: Vec<String> },

    /// The registry does not know the kind, or the kind does not support the operation
    #[error("Unsupported dataset kind: {0}")]
    UnsupportedKind(String),

    /// Not enough usable data to produce a result
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A caller-supplied parameter is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The clustering backend failed
    #[error("Clustering error: {0}")]
    Clustering(String),

    /// No dataset is stored under the requested name
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chart rendering failed
    #[error("Render error: {0}")]
    Render(String),
}

impl From<polars::prelude::PolarsError> for Error {
    fn from(err: polars::prelude::PolarsError) -> Self {
        Error::StructuralParse(err.to_string())
    }
}

//! Error types for forest-sweep
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// forest-sweep error types
#[derive(Error, Debug)]
pub enum Error {
    /// Dataset is missing columns or has unusable column types
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Storage location could not be parsed or read (Parquet/CSV/S3)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Caller supplied an invalid argument (e.g. zero estimators)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model fitting failed
    #[error("Training error: {0}")]
    Training(String),

    /// Tracking server rejected a request
    #[error("Tracking server error ({status}) {code}: {message}")]
    Tracking {
        /// HTTP status code returned by the server
        status: u16,
        /// MLflow `error_code` (e.g. `RESOURCE_DOES_NOT_EXIST`)
        code: String,
        /// Server-provided message
        message: String,
    },

    /// Configuration could not be resolved
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

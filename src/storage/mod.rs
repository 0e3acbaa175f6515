//! Dataset storage locations (local filesystem and S3)
//!
//! Reads are a passthrough: the whole object is fetched into memory and
//! decoded as Parquet (`.parquet` keys) or as CSV with a header row.
//! Nothing is cached and nothing is written back.

mod s3;

pub use s3::{signing_key, uri_encode, S3Client};

use crate::config::StorageConfig;
use crate::dataset::Dataset;
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a dataset lives.
///
/// ```rust
/// use forest_sweep::storage::StorageLocation;
///
/// let loc: StorageLocation = "s3://data/iris.csv".parse().unwrap();
/// assert_eq!(loc, StorageLocation::S3 { bucket: "data".into(), key: "iris.csv".into() });
/// assert_eq!(loc.to_string(), "s3://data/iris.csv");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Local file (`file://path` or a bare path)
    Local(PathBuf),
    /// Object in an S3-compatible store
    S3 {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },
}

impl StorageLocation {
    /// Whether the object should be decoded as Parquet.
    #[must_use]
    pub fn is_parquet(&self) -> bool {
        let name = match self {
            Self::Local(path) => path.to_string_lossy().into_owned(),
            Self::S3 { key, .. } => key.clone(),
        };
        Path::new(&name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"))
    }

    /// Fetch the raw object bytes.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or the object GET fails
    pub async fn read(&self, config: &StorageConfig) -> Result<Bytes> {
        match self {
            Self::Local(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            Self::S3 { bucket, key } => S3Client::new(config)?.get_object(bucket, key).await,
        }
    }
}

impl FromStr for StorageLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() || key.is_empty() {
                return Err(Error::StorageError(format!(
                    "S3 location '{s}' must look like s3://bucket/key"
                )));
            }
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let path = s.strip_prefix("file://").unwrap_or(s);
        if path.is_empty() {
            return Err(Error::StorageError("empty storage location".to_string()));
        }
        Ok(Self::Local(PathBuf::from(path)))
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

/// Read and decode the dataset at `location`.
///
/// # Errors
/// Returns error if the object cannot be fetched or decoded
pub async fn load_dataset(location: &StorageLocation, config: &StorageConfig) -> Result<Dataset> {
    let bytes = location.read(config).await?;
    let size = bytes.len();
    let dataset = if location.is_parquet() {
        Dataset::from_parquet_bytes(bytes)?
    } else {
        Dataset::from_csv_bytes(&bytes)?
    };
    tracing::info!(
        location = %location,
        bytes = size,
        rows = dataset.num_rows(),
        "loaded dataset"
    );
    Ok(dataset)
}

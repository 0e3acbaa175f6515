//! Runner configuration
//!
//! Uses `figment` for layered configuration: defaults -> environment ->
//! explicit overrides (CLI flags).
//!
//! Environment variables:
//!
//! | Variable                              | Field                      |
//! |---------------------------------------|----------------------------|
//! | `MLFLOW_TRACKING_URI`                 | `tracking_uri`             |
//! | `AWS_ENDPOINT_URL`                    | `storage.endpoint_url`     |
//! | `MLFLOW_S3_ENDPOINT_URL` (wins)       | `storage.endpoint_url`     |
//! | `AWS_ACCESS_KEY_ID`                   | `storage.access_key_id`    |
//! | `AWS_SECRET_ACCESS_KEY`               | `storage.secret_access_key`|
//! | `AWS_DEFAULT_REGION`                  | `storage.region`           |
//! | `FOREST_SWEEP_<FIELD>` (`__` nests)   | any field                  |

use crate::storage::StorageLocation;
use crate::{Error, Result};
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize};

/// Default MLflow endpoint (the compose-network service name).
pub const DEFAULT_TRACKING_URI: &str = "http://mlflow:5000";
/// Default dataset location.
pub const DEFAULT_DATA_LOCATION: &str = "s3://data/iris.csv";
/// Default experiment name prefix.
pub const DEFAULT_EXPERIMENT_PREFIX: &str = "example-experiment";
/// Default S3 region.
pub const DEFAULT_REGION: &str = "us-east-1";
/// Prefix for crate-specific environment variables.
pub const ENV_PREFIX: &str = "FOREST_SWEEP_";

/// S3-compatible object storage access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Endpoint URL (`None` uses AWS: `https://s3.<region>.amazonaws.com`)
    #[serde(default, deserialize_with = "string_like")]
    pub endpoint_url: Option<String>,
    /// Access key; requests are unsigned without one
    #[serde(default, deserialize_with = "string_like")]
    pub access_key_id: Option<String>,
    /// Secret key
    #[serde(default, deserialize_with = "string_like")]
    pub secret_access_key: Option<String>,
    /// Signing region
    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// Everything one sweep invocation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// MLflow server URL
    pub tracking_uri: String,
    /// Experiment name prefix; a timestamp is appended per invocation
    pub experiment_prefix: String,
    /// Dataset location (`s3://bucket/key`, `file://path` or a path)
    pub data_location: String,
    /// Repetitions of every grid point
    pub n_tests: usize,
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    /// Seed for the split and the forests (`None` draws from entropy)
    pub seed: Option<u64>,
    /// Abort the sweep on the first failing trial
    pub fail_fast: bool,
    /// Object storage access
    pub storage: StorageConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            tracking_uri: DEFAULT_TRACKING_URI.to_string(),
            experiment_prefix: DEFAULT_EXPERIMENT_PREFIX.to_string(),
            data_location: DEFAULT_DATA_LOCATION.to_string(),
            n_tests: 1,
            test_size: crate::dataset::DEFAULT_TEST_SIZE,
            seed: None,
            fail_fast: true,
            storage: StorageConfig::default(),
        }
    }
}

fn env_var(name: &'static str, path: &'static str) -> Env {
    Env::raw().only(&[name]).map(move |_| path.into())
}

impl ExperimentConfig {
    /// Defaults layered with the environment.
    ///
    /// Priority (highest to lowest):
    /// 1. `FOREST_SWEEP_*` variables
    /// 2. MLflow and AWS variables
    /// 3. Built-in defaults
    #[must_use]
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(env_var("MLFLOW_TRACKING_URI", "tracking_uri"))
            .merge(env_var("AWS_ENDPOINT_URL", "storage.endpoint_url"))
            .merge(env_var("MLFLOW_S3_ENDPOINT_URL", "storage.endpoint_url"))
            .merge(env_var("AWS_ACCESS_KEY_ID", "storage.access_key_id"))
            .merge(env_var("AWS_SECRET_ACCESS_KEY", "storage.secret_access_key"))
            .merge(env_var("AWS_DEFAULT_REGION", "storage.region"))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from defaults and the environment.
    ///
    /// # Errors
    /// Returns error if a value has the wrong type or fails validation
    pub fn load() -> Result<Self> {
        Self::from_figment(&Self::figment())
    }

    /// Extract and validate from any figment (e.g. with CLI overrides merged).
    ///
    /// # Errors
    /// Returns error if a value has the wrong type or fails validation
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.n_tests == 0 {
            return Err(Error::Config("n_tests must be at least 1".to_string()));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(Error::Config(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        if self.tracking_uri.trim().is_empty() {
            return Err(Error::Config("tracking_uri must not be empty".to_string()));
        }
        if self.experiment_prefix.trim().is_empty() {
            return Err(Error::Config("experiment_prefix must not be empty".to_string()));
        }
        self.data_location
            .parse::<StorageLocation>()
            .map_err(|e| Error::Config(format!("data_location: {e}")))?;
        Ok(())
    }

    /// Parsed dataset location.
    ///
    /// # Errors
    /// Returns error if `data_location` is malformed
    pub fn location(&self) -> Result<StorageLocation> {
        self.data_location.parse()
    }
}

/// Accept strings, numbers and booleans as `Option<String>`.
///
/// Environment values that look numeric (e.g. a numeric secret key) arrive
/// as numbers.
fn string_like<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringLike {
        Str(String),
        Int(i64),
        UInt(u64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<StringLike>::deserialize(deserializer)?.map(|v| match v {
        StringLike::Str(s) => s,
        StringLike::Int(i) => i.to_string(),
        StringLike::UInt(u) => u.to_string(),
        StringLike::Float(f) => f.to_string(),
        StringLike::Bool(b) => b.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.tracking_uri, "http://mlflow:5000");
        assert_eq!(config.data_location, "s3://data/iris.csv");
        assert_eq!(config.n_tests, 1);
        assert!(config.fail_fast);
        assert_eq!(config.storage.region, "us-east-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ExperimentConfig {
            n_tests: 0,
            ..ExperimentConfig::default()
        };
        assert!(config.validate().is_err());
        config.n_tests = 1;
        config.test_size = 1.0;
        assert!(config.validate().is_err());
        config.test_size = 0.3;
        config.data_location = "s3://bucket-only".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_string_like_accepts_numbers() {
        let storage: StorageConfig =
            serde_json::from_str(r#"{"access_key_id": 12345, "region": "eu-west-1"}"#).unwrap();
        assert_eq!(storage.access_key_id.as_deref(), Some("12345"));
        assert!(storage.secret_access_key.is_none());
    }
}

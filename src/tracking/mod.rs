//! Experiment tracking
//!
//! Records, the [`TrackingBackend`] seam and its two implementations:
//! [`MlflowClient`] for a remote MLflow server and [`MemoryTracker`] for
//! in-process use.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├──< ParamRecord (N)  [write-once]
//!                              ├──< MetricRecord (N) [keyed by step]
//!                              ├──< DatasetInput (N)
//!                              └──< ArtifactRecord (N) [CAS]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use forest_sweep::tracking::{MemoryTracker, ParamRecord, RunStatus, TrackingBackend};
//!
//! # async fn example() -> forest_sweep::Result<()> {
//! let tracker = MemoryTracker::new();
//! let experiment = tracker.set_experiment("example-experiment").await?;
//! let run = tracker.create_run(experiment.experiment_id(), Some("trial-0")).await?;
//! tracker
//!     .log_params(run.run_id(), &[ParamRecord::new("n_estimators", 32)])
//!     .await?;
//! tracker.end_run(run.run_id(), RunStatus::Success).await?;
//! # Ok(())
//! # }
//! ```

mod artifact_record;
mod dataset_input;
mod experiment_record;
mod memory;
mod metric_record;
mod mlflow;
mod model_log;
mod param_record;
mod run_record;

pub use artifact_record::{sha256_hex, to_hex, ArtifactRecord};
pub use dataset_input::DatasetInput;
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder};
pub use memory::MemoryTracker;
pub use metric_record::MetricRecord;
pub use mlflow::MlflowClient;
pub use model_log::{
    load_model_json, log_model, model_json, ColumnSpec, ModelInfo, ModelSignature,
    MODEL_ARTIFACT_PATH,
};
pub use param_record::ParamRecord;
pub use run_record::{RunRecord, RunRecordBuilder, RunStatus};

use crate::Result;
use std::future::Future;

/// Tag key holding a run's display name.
pub const RUN_NAME_TAG: &str = "mlflow.runName";

/// Operations the experiment runner needs from a tracking backend.
///
/// Mirrors the subset of the MLflow tracking API used by a sweep: select an
/// experiment, open a run, attach params/metrics/tags/inputs/artifacts, and
/// close the run with a terminal status.
pub trait TrackingBackend: Send + Sync {
    /// Get the experiment named `name`, creating it if absent.
    fn set_experiment(&self, name: &str) -> impl Future<Output = Result<ExperimentRecord>> + Send;

    /// Open a new run (status Running) under `experiment_id`.
    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
    ) -> impl Future<Output = Result<RunRecord>> + Send;

    /// Log write-once params.
    fn log_params(
        &self,
        run_id: &str,
        params: &[ParamRecord],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Log metric data points.
    fn log_metrics(
        &self,
        run_id: &str,
        metrics: &[MetricRecord],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Set (or overwrite) a run tag.
    fn set_tag(&self, run_id: &str, key: &str, value: &str)
        -> impl Future<Output = Result<()>> + Send;

    /// Record a dataset consumed by the run.
    fn log_input(
        &self,
        run_id: &str,
        input: &DatasetInput,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Upload `contents` to `path` under the run's artifact root.
    fn log_artifact(
        &self,
        run: &RunRecord,
        path: &str,
        contents: Vec<u8>,
    ) -> impl Future<Output = Result<ArtifactRecord>> + Send;

    /// Close the run with a terminal status.
    fn end_run(&self, run_id: &str, status: RunStatus) -> impl Future<Output = Result<()>> + Send;

    /// Log a single param.
    fn log_param(
        &self,
        run_id: &str,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        async move { self.log_params(run_id, &[ParamRecord::new(key, value)]).await }
    }

    /// Log a single metric at step 0.
    fn log_metric(
        &self,
        run_id: &str,
        key: &str,
        value: f64,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.log_metrics(run_id, &[MetricRecord::new(run_id, key, 0, value)])
                .await
        }
    }
}

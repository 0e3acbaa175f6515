//! In-memory tracking backend using `DashMap`.
//!
//! Data is lost on process restart. Used by tests and dry runs; every
//! record can be read back through the query methods.

use super::{
    ArtifactRecord, DatasetInput, ExperimentRecord, MetricRecord, ParamRecord, RunRecord,
    RunStatus, TrackingBackend, RUN_NAME_TAG,
};
use crate::{Error, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";
const INVALID_PARAMETER_VALUE: &str = "INVALID_PARAMETER_VALUE";

#[derive(Debug)]
struct RunEntry {
    seq: u64,
    record: RunRecord,
    params: Vec<ParamRecord>,
    metrics: Vec<MetricRecord>,
    tags: BTreeMap<String, String>,
    inputs: Vec<DatasetInput>,
}

#[derive(Debug)]
struct StoredArtifact {
    record: ArtifactRecord,
    contents: Vec<u8>,
}

/// In-process [`TrackingBackend`] backed by concurrent hashmaps.
///
/// Enforces the same rules a tracking server does: unknown runs are
/// `RESOURCE_DOES_NOT_EXIST`, params are write-once and finished runs
/// reject further writes.
///
/// # Example
///
/// ```rust
/// use forest_sweep::tracking::{MemoryTracker, RunStatus, TrackingBackend};
///
/// # async fn example() -> forest_sweep::Result<()> {
/// let tracker = MemoryTracker::new();
/// let exp = tracker.set_experiment("demo").await?;
/// let run = tracker.create_run(exp.experiment_id(), None).await?;
/// tracker.log_metric(run.run_id(), "accuracy_score", 0.97).await?;
/// tracker.end_run(run.run_id(), RunStatus::Success).await?;
///
/// assert_eq!(tracker.runs_for_experiment(exp.experiment_id()).len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryTracker {
    experiments: DashMap<String, ExperimentRecord>,
    runs: DashMap<String, RunEntry>,
    artifacts: DashMap<(String, String), StoredArtifact>,
    next_experiment_id: AtomicU64,
    next_seq: AtomicU64,
}

impl MemoryTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of experiments.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Number of runs across all experiments.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Look up an experiment by name.
    #[must_use]
    pub fn experiment_by_name(&self, name: &str) -> Option<ExperimentRecord> {
        self.experiments
            .iter()
            .find(|e| e.value().name() == name)
            .map(|e| e.value().clone())
    }

    /// Get a run by ID.
    #[must_use]
    pub fn run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.get(run_id).map(|e| e.record.clone())
    }

    /// All runs of an experiment, in creation order.
    #[must_use]
    pub fn runs_for_experiment(&self, experiment_id: &str) -> Vec<RunRecord> {
        let mut runs: Vec<(u64, RunRecord)> = self
            .runs
            .iter()
            .filter(|e| e.record.experiment_id() == experiment_id)
            .map(|e| (e.seq, e.record.clone()))
            .collect();
        runs.sort_by_key(|(seq, _)| *seq);
        runs.into_iter().map(|(_, run)| run).collect()
    }

    /// Params of a run, in logging order.
    #[must_use]
    pub fn params_for_run(&self, run_id: &str) -> Vec<ParamRecord> {
        self.runs
            .get(run_id)
            .map(|e| e.params.clone())
            .unwrap_or_default()
    }

    /// All metric data points of a run, ordered by key then step.
    #[must_use]
    pub fn metrics_for_run(&self, run_id: &str) -> Vec<MetricRecord> {
        let mut metrics = self
            .runs
            .get(run_id)
            .map(|e| e.metrics.clone())
            .unwrap_or_default();
        metrics.sort_by(|a, b| a.key().cmp(b.key()).then(a.step().cmp(&b.step())));
        metrics
    }

    /// History of one metric, ordered by step.
    #[must_use]
    pub fn metric_history(&self, run_id: &str, key: &str) -> Vec<MetricRecord> {
        let mut metrics: Vec<MetricRecord> = self
            .metrics_for_run(run_id)
            .into_iter()
            .filter(|m| m.key() == key)
            .collect();
        metrics.sort_by_key(MetricRecord::step);
        metrics
    }

    /// Latest value of a metric (highest step, last logged on ties).
    #[must_use]
    pub fn latest_metric(&self, run_id: &str, key: &str) -> Option<f64> {
        self.runs.get(run_id).and_then(|e| {
            e.metrics
                .iter()
                .filter(|m| m.key() == key)
                .max_by_key(|m| m.step())
                .map(MetricRecord::value)
        })
    }

    /// Tags of a run.
    #[must_use]
    pub fn tags_for_run(&self, run_id: &str) -> BTreeMap<String, String> {
        self.runs
            .get(run_id)
            .map(|e| e.tags.clone())
            .unwrap_or_default()
    }

    /// Dataset inputs of a run.
    #[must_use]
    pub fn inputs_for_run(&self, run_id: &str) -> Vec<DatasetInput> {
        self.runs
            .get(run_id)
            .map(|e| e.inputs.clone())
            .unwrap_or_default()
    }

    /// Contents of an uploaded artifact.
    #[must_use]
    pub fn artifact(&self, run_id: &str, path: &str) -> Option<Vec<u8>> {
        self.artifacts
            .get(&(run_id.to_string(), path.to_string()))
            .map(|a| a.contents.clone())
    }

    /// Artifact records of a run, sorted by path.
    #[must_use]
    pub fn artifacts_for_run(&self, run_id: &str) -> Vec<ArtifactRecord> {
        let mut records: Vec<ArtifactRecord> = self
            .artifacts
            .iter()
            .filter(|a| a.key().0 == run_id)
            .map(|a| a.record.clone())
            .collect();
        records.sort_by(|a, b| a.path().cmp(b.path()));
        records
    }

    /// Apply `f` to an active run, or fail like a tracking server would.
    fn with_active_run<T>(&self, run_id: &str, f: impl FnOnce(&mut RunEntry) -> Result<T>) -> Result<T> {
        let mut entry = self.runs.get_mut(run_id).ok_or_else(|| missing_run(run_id))?;
        if entry.record.status().is_terminal() {
            return Err(tracking_error(
                400,
                INVALID_PARAMETER_VALUE,
                format!(
                    "The run {run_id} must be in the 'active' state. Current state is {}.",
                    entry.record.status().as_mlflow()
                ),
            ));
        }
        f(&mut entry)
    }
}

fn tracking_error(status: u16, code: &str, message: String) -> Error {
    Error::Tracking {
        status,
        code: code.to_string(),
        message,
    }
}

fn missing_run(run_id: &str) -> Error {
    tracking_error(404, RESOURCE_DOES_NOT_EXIST, format!("Run '{run_id}' not found"))
}

impl TrackingBackend for MemoryTracker {
    async fn set_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        if let Some(existing) = self.experiment_by_name(name) {
            return Ok(existing);
        }
        // MLflow reserves id 0 for the default experiment
        let id = (self.next_experiment_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let record = ExperimentRecord::builder(id.clone(), name)
            .artifact_location(format!("memory:/{id}"))
            .build();
        self.experiments.insert(id, record.clone());
        tracing::debug!(experiment_id = record.experiment_id(), name, "created experiment");
        Ok(record)
    }

    async fn create_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunRecord> {
        if !self.experiments.contains_key(experiment_id) {
            return Err(tracking_error(
                404,
                RESOURCE_DOES_NOT_EXIST,
                format!("No Experiment with id={experiment_id} exists"),
            ));
        }
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let mut builder = RunRecord::builder(run_id.clone(), experiment_id)
            .artifact_uri(format!("memory:/{experiment_id}/{run_id}/artifacts"));
        let mut tags = BTreeMap::new();
        if let Some(name) = run_name {
            builder = builder.run_name(name);
            tags.insert(RUN_NAME_TAG.to_string(), name.to_string());
        }
        let mut record = builder.build();
        record.start();

        let entry = RunEntry {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            record: record.clone(),
            params: Vec::new(),
            metrics: Vec::new(),
            tags,
            inputs: Vec::new(),
        };
        self.runs.insert(run_id, entry);
        Ok(record)
    }

    async fn log_params(&self, run_id: &str, params: &[ParamRecord]) -> Result<()> {
        self.with_active_run(run_id, |entry| {
            for param in params {
                match entry.params.iter().find(|p| p.key() == param.key()) {
                    Some(existing) if existing.value() != param.value() => {
                        return Err(tracking_error(
                            400,
                            INVALID_PARAMETER_VALUE,
                            format!(
                                "Changing param values is not allowed. Param with key='{}' was already logged with value='{}' for run ID='{run_id}'. Attempted logging new value '{}'.",
                                param.key(),
                                existing.value(),
                                param.value()
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => entry.params.push(param.clone()),
                }
            }
            Ok(())
        })
    }

    async fn log_metrics(&self, run_id: &str, metrics: &[MetricRecord]) -> Result<()> {
        self.with_active_run(run_id, |entry| {
            entry.metrics.extend(metrics.iter().map(|m| m.for_run(run_id)));
            Ok(())
        })
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_active_run(run_id, |entry| {
            entry.tags.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn log_input(&self, run_id: &str, input: &DatasetInput) -> Result<()> {
        self.with_active_run(run_id, |entry| {
            entry.inputs.push(input.clone());
            Ok(())
        })
    }

    async fn log_artifact(&self, run: &RunRecord, path: &str, contents: Vec<u8>) -> Result<ArtifactRecord> {
        let run_id = run.run_id();
        self.with_active_run(run_id, |_| Ok(()))?;
        let record = ArtifactRecord::from_contents(run_id, path, &contents);
        self.artifacts.insert(
            (run_id.to_string(), path.to_string()),
            StoredArtifact {
                record: record.clone(),
                contents,
            },
        );
        Ok(record)
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let mut entry = self.runs.get_mut(run_id).ok_or_else(|| missing_run(run_id))?;
        entry.record.complete(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_run(tracker: &MemoryTracker) -> RunRecord {
        let exp = tracker.set_experiment("exp").await.unwrap();
        tracker.create_run(exp.experiment_id(), Some("trial")).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_experiment_is_idempotent() {
        let tracker = MemoryTracker::new();
        let a = tracker.set_experiment("exp").await.unwrap();
        let b = tracker.set_experiment("exp").await.unwrap();
        assert_eq!(a.experiment_id(), b.experiment_id());
        assert_eq!(a.experiment_id(), "1");
        assert_eq!(tracker.experiment_count(), 1);
    }

    #[tokio::test]
    async fn test_create_run_sets_name_tag() {
        let tracker = MemoryTracker::new();
        let run = open_run(&tracker).await;
        assert_eq!(run.status(), RunStatus::Running);
        assert_eq!(run.run_name(), Some("trial"));
        assert_eq!(
            tracker.tags_for_run(run.run_id()).get(RUN_NAME_TAG).map(String::as_str),
            Some("trial")
        );
    }

    #[tokio::test]
    async fn test_create_run_unknown_experiment() {
        let tracker = MemoryTracker::new();
        let err = tracker.create_run("42", None).await.unwrap_err();
        assert!(matches!(err, Error::Tracking { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_params_are_write_once() {
        let tracker = MemoryTracker::new();
        let run = open_run(&tracker).await;
        tracker.log_param(run.run_id(), "criterion", "gini").await.unwrap();
        // Same value is accepted
        tracker.log_param(run.run_id(), "criterion", "gini").await.unwrap();
        let err = tracker
            .log_param(run.run_id(), "criterion", "entropy")
            .await
            .unwrap_err();
        match err {
            Error::Tracking { code, .. } => assert_eq!(code, INVALID_PARAMETER_VALUE),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tracker.params_for_run(run.run_id()).len(), 1);
    }

    #[tokio::test]
    async fn test_finished_run_rejects_writes() {
        let tracker = MemoryTracker::new();
        let run = open_run(&tracker).await;
        tracker.end_run(run.run_id(), RunStatus::Success).await.unwrap();
        assert!(tracker.log_metric(run.run_id(), "x", 1.0).await.is_err());
        assert_eq!(tracker.run(run.run_id()).unwrap().status(), RunStatus::Success);
    }

    #[tokio::test]
    async fn test_metric_history_sorted_by_step() {
        let tracker = MemoryTracker::new();
        let run = open_run(&tracker).await;
        let id = run.run_id();
        tracker
            .log_metrics(
                id,
                &[
                    MetricRecord::new(id, "loss", 2, 0.2),
                    MetricRecord::new(id, "loss", 0, 0.9),
                    MetricRecord::new(id, "loss", 1, 0.5),
                ],
            )
            .await
            .unwrap();
        let steps: Vec<u64> = tracker
            .metric_history(id, "loss")
            .iter()
            .map(MetricRecord::step)
            .collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(tracker.latest_metric(id, "loss"), Some(0.2));
    }

    #[tokio::test]
    async fn test_artifacts_round_trip() {
        let tracker = MemoryTracker::new();
        let run = open_run(&tracker).await;
        let record = tracker
            .log_artifact(&run, "model/model.json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(record.size_bytes(), 2);
        assert_eq!(tracker.artifact(run.run_id(), "model/model.json"), Some(b"{}".to_vec()));
        assert_eq!(tracker.artifacts_for_run(run.run_id()).len(), 1);
    }

    #[tokio::test]
    async fn test_runs_listed_in_creation_order() {
        let tracker = MemoryTracker::new();
        let exp = tracker.set_experiment("exp").await.unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let name = format!("run-{i}");
            ids.push(
                tracker
                    .create_run(exp.experiment_id(), Some(&name))
                    .await
                    .unwrap()
                    .run_id()
                    .to_string(),
            );
        }
        let listed: Vec<String> = tracker
            .runs_for_experiment(exp.experiment_id())
            .iter()
            .map(|r| r.run_id().to_string())
            .collect();
        assert_eq!(listed, ids);
    }
}

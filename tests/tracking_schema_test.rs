//! Tracking Schema Tests
//!
//! Records as they travel between the runner and a tracking backend, plus
//! the lifecycle rules `MemoryTracker` enforces.

use forest_sweep::tracking::{
    sha256_hex, ArtifactRecord, DatasetInput, ExperimentRecord, MemoryTracker, MetricRecord,
    ParamRecord, RunRecord, RunStatus, TrackingBackend, RUN_NAME_TAG,
};
use forest_sweep::Error;

// =============================================================================
// ExperimentRecord Tests
// =============================================================================

#[test]
fn test_experiment_record_creation() {
    let record = ExperimentRecord::new("7", "example-experiment-2024-03-09 07:05:01.000000");

    assert_eq!(record.experiment_id(), "7");
    assert!(record.name().starts_with("example-experiment-"));
    assert!(record.created_at().timestamp() > 0);
    assert!(record.artifact_location().is_none());
}

#[test]
fn test_experiment_record_serialization() {
    let record = ExperimentRecord::builder("3", "Serialization Test")
        .artifact_location("mlflow-artifacts:/3")
        .build();

    let json = serde_json::to_string(&record).expect("serialization failed");
    let deserialized: ExperimentRecord =
        serde_json::from_str(&json).expect("deserialization failed");
    assert_eq!(record, deserialized);
}

// =============================================================================
// RunRecord Tests
// =============================================================================

#[test]
fn test_run_record_lifecycle() {
    let mut run = RunRecord::builder("run-001", "7")
        .run_name("rf-64-entropy-0")
        .build();
    assert_eq!(run.status(), RunStatus::Pending);
    assert!(run.started_at().is_none());

    run.start();
    assert_eq!(run.status(), RunStatus::Running);
    assert!(run.started_at().is_some());
    assert!(run.ended_at().is_none());

    run.complete(RunStatus::Failed);
    assert_eq!(run.status(), RunStatus::Failed);
    assert!(run.ended_at() >= run.started_at());
}

#[test]
fn test_run_status_mlflow_names() {
    let mapping = [
        (RunStatus::Pending, "SCHEDULED", false),
        (RunStatus::Running, "RUNNING", false),
        (RunStatus::Success, "FINISHED", true),
        (RunStatus::Failed, "FAILED", true),
        (RunStatus::Cancelled, "KILLED", true),
    ];
    for (status, name, terminal) in mapping {
        assert_eq!(status.as_mlflow(), name);
        assert_eq!(status.is_terminal(), terminal);
    }
}

// =============================================================================
// Metric, Param and Artifact Tests
// =============================================================================

#[test]
fn test_metric_record_millis_timestamp() {
    let metric = MetricRecord::new("run-001", "accuracy_score", 0, 0.95);
    assert_eq!(metric.timestamp_millis(), metric.timestamp().timestamp_millis());
    assert_eq!(metric.step(), 0);
}

#[test]
fn test_param_values_use_display_form() {
    assert_eq!(ParamRecord::new("n_estimators", 128).value(), "128");
    assert_eq!(ParamRecord::new("test_size", 0.3).value(), "0.3");
}

#[test]
fn test_artifact_record_cas_hash_format() {
    let record = ArtifactRecord::from_contents("run-001", "confusion_matrix.json", b"[[15]]");
    assert_eq!(record.cas_hash(), format!("sha256:{}", sha256_hex(b"[[15]]")));
    assert_eq!(record.cas_hash().len(), "sha256:".len() + 64);
    assert_eq!(record.size_bytes(), 6);
}

// =============================================================================
// MemoryTracker Lifecycle Tests
// =============================================================================

async fn open_run(tracker: &MemoryTracker, name: &str) -> RunRecord {
    let exp = tracker.set_experiment("schema").await.unwrap();
    tracker.create_run(exp.experiment_id(), Some(name)).await.unwrap()
}

#[tokio::test]
async fn test_full_run_lifecycle() {
    let tracker = MemoryTracker::new();
    let run = open_run(&tracker, "rf-32-gini-0").await;

    tracker
        .log_params(
            run.run_id(),
            &[
                ParamRecord::new("n_estimators", 32),
                ParamRecord::new("criterion", "gini"),
            ],
        )
        .await
        .unwrap();
    tracker
        .log_metrics(
            run.run_id(),
            &[
                MetricRecord::new(run.run_id(), "accuracy_score", 0, 0.91),
                MetricRecord::new(run.run_id(), "log_loss", 0, 0.22),
            ],
        )
        .await
        .unwrap();
    tracker
        .log_artifact(&run, "model/MLmodel", b"artifact_path: model\n".to_vec())
        .await
        .unwrap();
    tracker.end_run(run.run_id(), RunStatus::Success).await.unwrap();

    let stored = tracker.run(run.run_id()).unwrap();
    assert_eq!(stored.status(), RunStatus::Success);
    assert_eq!(tracker.params_for_run(run.run_id()).len(), 2);
    assert_eq!(tracker.metrics_for_run(run.run_id()).len(), 2);
    assert_eq!(
        tracker.tags_for_run(run.run_id()).get(RUN_NAME_TAG).map(String::as_str),
        Some("rf-32-gini-0")
    );
    let artifacts = tracker.artifacts_for_run(run.run_id());
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].path(), "model/MLmodel");
}

#[tokio::test]
async fn test_metric_history_ordered_by_step() {
    let tracker = MemoryTracker::new();
    let run = open_run(&tracker, "history").await;

    let points: Vec<MetricRecord> = [(2, 0.8), (0, 0.5), (1, 0.7)]
        .iter()
        .map(|&(step, value)| MetricRecord::new(run.run_id(), "accuracy_score", step, value))
        .collect();
    tracker.log_metrics(run.run_id(), &points).await.unwrap();

    let steps: Vec<u64> = tracker
        .metric_history(run.run_id(), "accuracy_score")
        .iter()
        .map(MetricRecord::step)
        .collect();
    assert_eq!(steps, vec![0, 1, 2]);
    assert_eq!(tracker.latest_metric(run.run_id(), "accuracy_score"), Some(0.8));
}

#[tokio::test]
async fn test_changing_a_param_is_rejected() {
    let tracker = MemoryTracker::new();
    let run = open_run(&tracker, "params").await;

    tracker.log_param(run.run_id(), "criterion", "gini").await.unwrap();
    // Same value again is accepted
    tracker.log_param(run.run_id(), "criterion", "gini").await.unwrap();
    let err = tracker
        .log_param(run.run_id(), "criterion", "entropy")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Tracking { status: 400, ref code, .. } if code == "INVALID_PARAMETER_VALUE"));
}

#[tokio::test]
async fn test_finished_run_rejects_writes() {
    let tracker = MemoryTracker::new();
    let run = open_run(&tracker, "closed").await;
    tracker.end_run(run.run_id(), RunStatus::Failed).await.unwrap();

    assert!(tracker.log_metric(run.run_id(), "accuracy_score", 1.0).await.is_err());
    assert!(tracker.set_tag(run.run_id(), "k", "v").await.is_err());
    assert!(tracker.log_artifact(&run, "x.json", b"{}".to_vec()).await.is_err());
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let tracker = MemoryTracker::new();
    let input = DatasetInput {
        name: "dataset".to_string(),
        digest: "abcd1234".to_string(),
        source_type: "local".to_string(),
        source: r#"{"uri":"data/iris.csv"}"#.to_string(),
        schema: None,
        profile: None,
        context: "eval".to_string(),
    };
    let err = tracker.log_input("missing", &input).await.unwrap_err();
    assert!(matches!(err, Error::Tracking { status: 404, .. }));
    let err = tracker.end_run("missing", RunStatus::Success).await.unwrap_err();
    assert!(matches!(err, Error::Tracking { status: 404, .. }));
}

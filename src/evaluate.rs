//! Classifier evaluation
//!
//! Scores a fitted forest on a held-out [`EvaluationDataset`] and logs the
//! result to the run: the dataset as an `eval` input, the scores as
//! metrics, and the confusion matrix as `confusion_matrix.json`.
//!
//! Averaged scores are weighted by true-label support; labels that appear
//! only in the predictions contribute zero weight.

use crate::dataset::{Features, Target};
use crate::model::RandomForestClassifier;
use crate::tracking::{
    load_model_json, model_json, sha256_hex, DatasetInput, MetricRecord, ModelInfo, RunRecord,
    TrackingBackend,
};
use crate::{Error, Result};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Probabilities are clipped to `[EPS, 1 - EPS]` before taking logs.
const LOG_LOSS_EPS: f64 = 1e-15;

/// Artifact holding the confusion matrix.
pub const CONFUSION_MATRIX_ARTIFACT: &str = "confusion_matrix.json";

/// Context under which the evaluation dataset is logged.
pub const EVAL_CONTEXT: &str = "eval";

/// Test features plus their labels, fingerprinted for tracking.
///
/// Built once per sweep and shared read-only by every trial, so all trials
/// report the same digest.
#[derive(Debug, Clone)]
pub struct EvaluationDataset {
    features: Features,
    target: Target,
    batch: RecordBatch,
    name: String,
    digest: String,
    source_uri: String,
}

impl EvaluationDataset {
    /// Combine the test partition with its target column.
    ///
    /// # Errors
    /// Returns error if the features and target differ in length or the
    /// target name clashes with a feature column
    pub fn from_split(x_test: Features, y_test: Target, source_uri: impl Into<String>) -> Result<Self> {
        if x_test.num_rows() != y_test.len() {
            return Err(Error::InvalidInput(format!(
                "evaluation features have {} rows but target has {}",
                x_test.num_rows(),
                y_test.len()
            )));
        }
        if x_test.names().iter().any(|n| n == y_test.name()) {
            return Err(Error::InvalidInput(format!(
                "target '{}' is also a feature column",
                y_test.name()
            )));
        }

        let mut fields: Vec<Field> = x_test
            .batch()
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(Field::new(y_test.name(), arrow::datatypes::DataType::Int64, false));
        let mut columns = x_test.batch().columns().to_vec();
        columns.push(y_test.array());
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        let csv = crate::dataset::batch_to_csv(&batch)?;
        let digest = sha256_hex(&csv)[..8].to_string();

        Ok(Self {
            features: x_test,
            target: y_test,
            batch,
            name: "dataset".to_string(),
            digest,
            source_uri: source_uri.into(),
        })
    }

    /// Override the logged dataset name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Feature columns.
    #[must_use]
    pub const fn features(&self) -> &Features {
        &self.features
    }

    /// Target labels.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Features and target as one batch.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of examples.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Short content digest (8 hex chars of SHA-256 over the CSV form).
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Where the rows originally came from.
    #[must_use]
    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    /// Describe the dataset as a run input used in `context`.
    #[must_use]
    pub fn to_input(&self, context: &str) -> DatasetInput {
        let source_type = if self.source_uri.starts_with("s3://") {
            "s3"
        } else {
            "local"
        };
        let mut colspec: Vec<serde_json::Value> = self
            .features
            .names()
            .iter()
            .map(|n| json!({ "type": "double", "name": n, "required": true }))
            .collect();
        colspec.push(json!({ "type": "long", "name": self.target.name(), "required": true }));

        DatasetInput {
            name: self.name.clone(),
            digest: self.digest.clone(),
            source_type: source_type.to_string(),
            source: json!({ "uri": self.source_uri }).to_string(),
            schema: Some(json!({ "mlflow_colspec": colspec }).to_string()),
            profile: Some(
                json!({
                    "num_rows": self.num_rows(),
                    "num_elements": self.num_rows() * self.batch.num_columns(),
                })
                .to_string(),
            ),
            context: context.to_string(),
        }
    }
}

/// Classification scores for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierMetrics {
    /// Number of examples scored
    pub example_count: usize,
    /// Fraction predicted correctly
    pub accuracy_score: f64,
    /// Support-weighted precision
    pub precision_score: f64,
    /// Support-weighted recall
    pub recall_score: f64,
    /// Support-weighted F1
    pub f1_score: f64,
    /// Mean negative log-likelihood of the true class
    pub log_loss: f64,
    /// Row/column labels of `confusion_matrix`, sorted
    pub labels: Vec<i64>,
    /// `confusion_matrix[i][j]`: true `labels[i]` predicted as `labels[j]`
    pub confusion_matrix: Vec<Vec<u64>>,
}

impl ClassifierMetrics {
    /// Score predictions against ground truth.
    ///
    /// `proba[i][k]` is the probability of `classes[k]` for example `i`.
    ///
    /// # Errors
    /// Returns error if inputs are empty or have mismatched lengths
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(
        y_true: &[i64],
        y_pred: &[i64],
        proba: &[Vec<f64>],
        classes: &[i64],
    ) -> Result<Self> {
        let n = y_true.len();
        if n == 0 {
            return Err(Error::InvalidInput("cannot evaluate on zero examples".to_string()));
        }
        if y_pred.len() != n || proba.len() != n {
            return Err(Error::InvalidInput(format!(
                "{n} labels but {} predictions and {} probability rows",
                y_pred.len(),
                proba.len()
            )));
        }

        let mut labels: Vec<i64> = y_true.iter().chain(y_pred).copied().collect();
        labels.sort_unstable();
        labels.dedup();
        let index = |label: i64| labels.binary_search(&label).unwrap_or_default();

        let k = labels.len();
        let mut confusion = vec![vec![0u64; k]; k];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            confusion[index(t)][index(p)] += 1;
        }

        let correct: u64 = (0..k).map(|i| confusion[i][i]).sum();
        let mut precision = 0.0;
        let mut recall = 0.0;
        let mut f1 = 0.0;
        for i in 0..k {
            let tp = confusion[i][i] as f64;
            let support: u64 = confusion[i].iter().sum();
            let predicted: u64 = confusion.iter().map(|row| row[i]).sum();
            let p = ratio(tp, predicted as f64);
            let r = ratio(tp, support as f64);
            let f = ratio(2.0 * p * r, p + r);
            let w = support as f64;
            precision += w * p;
            recall += w * r;
            f1 += w * f;
        }
        let total = n as f64;

        let log_loss = y_true
            .iter()
            .zip(proba)
            .map(|(t, row)| {
                let p = classes
                    .iter()
                    .position(|c| c == t)
                    .and_then(|k| row.get(k).copied())
                    .unwrap_or(0.0)
                    .clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
                -p.ln()
            })
            .sum::<f64>()
            / total;

        Ok(Self {
            example_count: n,
            accuracy_score: correct as f64 / total,
            precision_score: precision / total,
            recall_score: recall / total,
            f1_score: f1 / total,
            log_loss,
            labels,
            confusion_matrix: confusion,
        })
    }

    /// Scores as metric records at step 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_records(&self, run_id: &str) -> Vec<MetricRecord> {
        [
            ("example_count", self.example_count as f64),
            ("accuracy_score", self.accuracy_score),
            ("precision_score", self.precision_score),
            ("recall_score", self.recall_score),
            ("f1_score", self.f1_score),
            ("log_loss", self.log_loss),
        ]
        .into_iter()
        .map(|(key, value)| MetricRecord::new(run_id, key, 0, value))
        .collect()
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Evaluate a logged model on `dataset` and record the outcome in `run`.
///
/// Scores the forest rebuilt from its `model/model.json` form, so the
/// numbers describe what a consumer of `model_info.model_uri` loads.
///
/// # Errors
/// Returns error if the model does not round-trip, prediction fails, or the
/// tracking backend rejects a write
pub async fn evaluate(
    tracker: &impl TrackingBackend,
    run: &RunRecord,
    model_info: &ModelInfo,
    model: &RandomForestClassifier,
    dataset: &EvaluationDataset,
) -> Result<ClassifierMetrics> {
    let model = load_model_json(&model_json(model)?)?;
    let x = dataset.features().to_matrix()?;
    let proba = model.predict_proba(&x)?;
    let y_pred = model.predict(&x)?;
    let metrics = ClassifierMetrics::compute(&dataset.target().labels(), &y_pred, &proba, model.classes())?;

    tracker
        .log_input(run.run_id(), &dataset.to_input(EVAL_CONTEXT))
        .await?;
    tracker
        .log_metrics(run.run_id(), &metrics.to_records(run.run_id()))
        .await?;
    let confusion = json!({
        "model_uri": model_info.model_uri,
        "labels": metrics.labels,
        "matrix": metrics.confusion_matrix,
    });
    tracker
        .log_artifact(run, CONFUSION_MATRIX_ARTIFACT, serde_json::to_vec_pretty(&confusion)?)
        .await?;

    tracing::debug!(
        run_id = run.run_id(),
        accuracy = metrics.accuracy_score,
        log_loss = metrics.log_loss,
        "evaluated model"
    );
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn one_hot(labels: &[i64], classes: &[i64]) -> Vec<Vec<f64>> {
        labels
            .iter()
            .map(|l| classes.iter().map(|c| if c == l { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    #[test]
    fn test_perfect_predictions() {
        let y = [0, 1, 2, 1];
        let m = ClassifierMetrics::compute(&y, &y, &one_hot(&y, &[0, 1, 2]), &[0, 1, 2]).unwrap();
        assert_eq!(m.example_count, 4);
        assert!(close(m.accuracy_score, 1.0));
        assert!(close(m.precision_score, 1.0));
        assert!(close(m.recall_score, 1.0));
        assert!(close(m.f1_score, 1.0));
        assert!(m.log_loss < 1e-12);
    }

    #[test]
    fn test_weighted_scores() {
        // true: 0 0 0 1 ; pred: 0 0 1 1
        let y_true = [0, 0, 0, 1];
        let y_pred = [0, 0, 1, 1];
        let m = ClassifierMetrics::compute(&y_true, &y_pred, &one_hot(&y_pred, &[0, 1]), &[0, 1]).unwrap();
        assert!(close(m.accuracy_score, 0.75));
        // class 0: p=1, r=2/3, support 3 ; class 1: p=1/2, r=1, support 1
        assert!(close(m.precision_score, (3.0 * 1.0 + 0.5) / 4.0));
        assert!(close(m.recall_score, 0.75));
        let f0 = 2.0 * (2.0 / 3.0) / (1.0 + 2.0 / 3.0);
        let f1 = 2.0 * 0.5 / 1.5;
        assert!(close(m.f1_score, (3.0 * f0 + f1) / 4.0));
        assert_eq!(m.confusion_matrix, vec![vec![2, 1], vec![0, 1]]);
    }

    #[test]
    fn test_log_loss_clips_zero_probability() {
        let m = ClassifierMetrics::compute(&[0], &[1], &[vec![0.0, 1.0]], &[0, 1]).unwrap();
        assert!(close(m.log_loss, -(1e-15f64).ln()));
    }

    #[test]
    fn test_label_only_in_predictions() {
        let m = ClassifierMetrics::compute(&[0, 0], &[0, 5], &[vec![1.0], vec![1.0]], &[0]).unwrap();
        assert_eq!(m.labels, vec![0, 5]);
        assert!(close(m.recall_score, 0.5));
        assert!(close(m.precision_score, 1.0));
    }

    #[test]
    fn test_empty_and_mismatched_inputs() {
        assert!(ClassifierMetrics::compute(&[], &[], &[], &[]).is_err());
        assert!(ClassifierMetrics::compute(&[0, 1], &[0], &[vec![1.0]], &[0]).is_err());
    }

    #[test]
    fn test_metric_records() {
        let y = [1, 1];
        let m = ClassifierMetrics::compute(&y, &y, &one_hot(&y, &[1]), &[1]).unwrap();
        let keys: Vec<String> = m.to_records("r").iter().map(|r| r.key().to_string()).collect();
        assert_eq!(
            keys,
            vec!["example_count", "accuracy_score", "precision_score", "recall_score", "f1_score", "log_loss"]
        );
    }

    #[test]
    fn test_evaluation_dataset_digest_is_stable() {
        let x = Features::new(
            RecordBatch::try_new(
                Arc::new(Schema::new(vec![Field::new("a", arrow::datatypes::DataType::Float64, false)])),
                vec![Arc::new(arrow::array::Float64Array::from(vec![1.0, 2.0]))],
            )
            .unwrap(),
        )
        .unwrap();
        let y = Target::from_labels("target", vec![0, 1]);
        let a = EvaluationDataset::from_split(x.clone(), y.clone(), "s3://data/iris.csv").unwrap();
        let b = EvaluationDataset::from_split(x, y, "s3://data/iris.csv").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 8);

        let input = a.to_input(EVAL_CONTEXT);
        assert_eq!(input.source_type, "s3");
        assert_eq!(input.context, "eval");
        assert!(input.schema.unwrap().contains("\"target\""));
    }

    #[test]
    fn test_evaluation_dataset_rejects_mismatch() {
        let x = Features::new(
            RecordBatch::try_new(
                Arc::new(Schema::new(vec![Field::new("a", arrow::datatypes::DataType::Float64, false)])),
                vec![Arc::new(arrow::array::Float64Array::from(vec![1.0]))],
            )
            .unwrap(),
        )
        .unwrap();
        let y = Target::from_labels("target", vec![0, 1]);
        assert!(EvaluationDataset::from_split(x, y, "data.csv").is_err());
    }

    #[tokio::test]
    async fn test_evaluate_scores_the_logged_model() {
        use crate::dataset::{iris, SPECIES_COLUMN, TARGET_COLUMN};
        use crate::model::RandomForestParams;
        use crate::tracking::{log_model, MemoryTracker};

        let (x, y) = iris::load_iris()
            .unwrap()
            .features_and_target(TARGET_COLUMN, &[SPECIES_COLUMN])
            .unwrap();
        let model = RandomForestParams::new(8)
            .random_state(3)
            .fit(&x.to_matrix().unwrap(), &y.labels())
            .unwrap();

        let tracker = MemoryTracker::new();
        let exp = tracker.set_experiment("eval").await.unwrap();
        let run = tracker.create_run(exp.experiment_id(), None).await.unwrap();
        let info = log_model(&tracker, &run, &model, &x, &y).await.unwrap();
        let dataset = EvaluationDataset::from_split(x.clone(), y.clone(), "data/iris.csv").unwrap();
        let metrics = evaluate(&tracker, &run, &info, &model, &dataset).await.unwrap();

        let stored = tracker.artifact(run.run_id(), "model/model.json").unwrap();
        let loaded = load_model_json(&stored).unwrap();
        let y_pred = loaded.predict(&x.to_matrix().unwrap()).unwrap();
        let hits = y_pred.iter().zip(y.labels()).filter(|(p, t)| **p == *t).count();
        #[allow(clippy::cast_precision_loss)]
        let expected = hits as f64 / y_pred.len() as f64;
        assert!(close(metrics.accuracy_score, expected));

        let confusion = tracker.artifact(run.run_id(), CONFUSION_MATRIX_ARTIFACT).unwrap();
        let confusion: serde_json::Value = serde_json::from_slice(&confusion).unwrap();
        assert_eq!(confusion["model_uri"], info.model_uri.as_str());
    }
}

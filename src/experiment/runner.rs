//! Sweep execution

use super::{ParamGrid, SweepReport, TrialOutcome, TrialParams};
use crate::config::ExperimentConfig;
use crate::dataset::{train_test_split, Dataset, TrainTestSplit, SPECIES_COLUMN, TARGET_COLUMN};
use crate::evaluate::{evaluate, ClassifierMetrics, EvaluationDataset};
use crate::model::Matrix;
use crate::storage::load_dataset;
use crate::tracking::{log_model, ExperimentRecord, RunRecord, RunStatus, TrackingBackend};
use crate::{Error, Result};
use chrono::{DateTime, Local, Timelike};
use std::sync::Arc;

/// `<prefix>-<local time>`, with a `.ffffff` microsecond suffix only when
/// the microsecond part is non-zero.
#[must_use]
pub fn experiment_name(prefix: &str, at: DateTime<Local>) -> String {
    let pattern = if at.nanosecond() / 1_000 == 0 {
        "%Y-%m-%d %H:%M:%S"
    } else {
        "%Y-%m-%d %H:%M:%S%.6f"
    };
    format!("{prefix}-{}", at.format(pattern))
}

/// Split data shared read-only by every trial of a sweep.
#[derive(Debug, Clone)]
pub struct PreparedData {
    split: TrainTestSplit,
    x_train: Arc<Matrix>,
    y_train: Arc<Vec<i64>>,
    eval: EvaluationDataset,
}

impl PreparedData {
    /// Split `dataset` once and build the evaluation dataset from the test
    /// partition.
    ///
    /// Features are every column except `target` and `species`.
    ///
    /// # Errors
    /// Returns error if the columns are unusable or the split is degenerate
    pub fn new(dataset: &Dataset, test_size: f64, seed: Option<u64>, source_uri: &str) -> Result<Self> {
        let (features, target) = dataset.features_and_target(TARGET_COLUMN, &[SPECIES_COLUMN])?;
        let split = train_test_split(&features, &target, test_size, seed)?;
        let x_train = Arc::new(split.x_train.to_matrix()?);
        let y_train = Arc::new(split.y_train.labels());
        let eval = EvaluationDataset::from_split(split.x_test.clone(), split.y_test.clone(), source_uri)?;
        Ok(Self {
            split,
            x_train,
            y_train,
            eval,
        })
    }

    /// The train/test partition.
    #[must_use]
    pub const fn split(&self) -> &TrainTestSplit {
        &self.split
    }

    /// The evaluation dataset (test features plus `target`).
    #[must_use]
    pub const fn eval(&self) -> &EvaluationDataset {
        &self.eval
    }
}

/// Run the whole sweep described by `config`.
///
/// Selects the experiment `<prefix>-<now>`, loads the dataset from
/// `config.data_location`, splits it once and runs every grid trial in
/// order.
///
/// # Errors
/// Returns error if the config is invalid, the experiment cannot be
/// selected, the dataset cannot be loaded, or (with `fail_fast`) a trial
/// fails
pub async fn run_experiment(config: &ExperimentConfig, tracker: &impl TrackingBackend) -> Result<SweepReport> {
    config.validate()?;
    let name = experiment_name(&config.experiment_prefix, Local::now());
    let experiment = tracker.set_experiment(&name).await?;
    tracing::info!(
        experiment_id = experiment.experiment_id(),
        name = experiment.name(),
        tracking_uri = %config.tracking_uri,
        "selected experiment"
    );

    let location = config.location()?;
    let dataset = load_dataset(&location, &config.storage).await?;
    let data = PreparedData::new(&dataset, config.test_size, config.seed, &location.to_string())?;

    run_sweep(tracker, &experiment, &data, &ParamGrid::new(config.n_tests), config).await
}

/// Run every trial of `grid` against prepared data.
///
/// # Errors
/// With `config.fail_fast`, returns the first trial error; otherwise
/// failures are collected in the report
pub async fn run_sweep(
    tracker: &impl TrackingBackend,
    experiment: &ExperimentRecord,
    data: &PreparedData,
    grid: &ParamGrid,
    config: &ExperimentConfig,
) -> Result<SweepReport> {
    let mut outcomes = Vec::with_capacity(grid.len());
    for trial in grid.iter() {
        tracing::info!(
            trial = trial.index + 1,
            of = grid.len(),
            n_estimators = trial.n_estimators,
            criterion = %trial.criterion,
            "starting trial"
        );
        let (run_id, result) = execute_trial(tracker, experiment, &trial, data, config.seed).await;
        match result {
            Ok(metrics) => outcomes.push(TrialOutcome {
                params: trial,
                run_id,
                result: Ok(metrics),
            }),
            Err(err) if config.fail_fast => return Err(err),
            Err(err) => {
                tracing::warn!(run_name = %trial.run_name(), error = %err, "trial failed; continuing");
                outcomes.push(TrialOutcome {
                    params: trial,
                    run_id,
                    result: Err(err.to_string()),
                });
            }
        }
    }

    let report = SweepReport {
        experiment: experiment.clone(),
        dataset_digest: data.eval.digest().to_string(),
        outcomes,
    };
    tracing::info!(
        trials = report.outcomes.len(),
        failed = report.failures().len(),
        "sweep finished"
    );
    Ok(report)
}

/// Open a run, do the trial, and always close the run.
///
/// The run ends `FINISHED` on success and `FAILED` otherwise. A trial error
/// takes precedence over an error while closing the run.
async fn execute_trial(
    tracker: &impl TrackingBackend,
    experiment: &ExperimentRecord,
    trial: &TrialParams,
    data: &PreparedData,
    seed: Option<u64>,
) -> (Option<String>, Result<ClassifierMetrics>) {
    let run = match tracker
        .create_run(experiment.experiment_id(), Some(&trial.run_name()))
        .await
    {
        Ok(run) => run,
        Err(err) => return (None, Err(err)),
    };

    let result = trial_body(tracker, &run, trial, data, seed).await;
    let status = if result.is_ok() {
        RunStatus::Success
    } else {
        RunStatus::Failed
    };
    let finalized = tracker.end_run(run.run_id(), status).await;

    let result = match (result, finalized) {
        (Ok(metrics), Ok(())) => Ok(metrics),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(run_id = run.run_id(), error = %close_err, "could not mark run FAILED");
            Err(err)
        }
    };
    (Some(run.run_id().to_string()), result)
}

async fn trial_body(
    tracker: &impl TrackingBackend,
    run: &RunRecord,
    trial: &TrialParams,
    data: &PreparedData,
    seed: Option<u64>,
) -> Result<ClassifierMetrics> {
    tracker.log_params(run.run_id(), &trial.to_params()).await?;

    let params = trial.forest_params(seed);
    let x = Arc::clone(&data.x_train);
    let y = Arc::clone(&data.y_train);
    let model = tokio::task::spawn_blocking(move || params.fit(&x, &y))
        .await
        .map_err(|e| Error::Training(format!("fit task failed: {e}")))??;

    let info = log_model(tracker, run, &model, &data.split.x_train, &data.split.y_train).await?;
    let metrics = evaluate(tracker, run, &info, &model, &data.eval).await?;
    tracing::info!(
        run_id = run.run_id(),
        accuracy = metrics.accuracy_score,
        f1 = metrics.f1_score,
        "trial complete"
    );
    Ok(metrics)
}

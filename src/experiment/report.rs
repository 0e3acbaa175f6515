//! Sweep outcome summary

use super::TrialParams;
use crate::evaluate::ClassifierMetrics;
use crate::tracking::ExperimentRecord;
use serde::{Deserialize, Serialize};

/// Result of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    /// Grid point
    pub params: TrialParams,
    /// Tracking run, if one was opened
    pub run_id: Option<String>,
    /// Scores, or the error text of a failed trial
    pub result: std::result::Result<ClassifierMetrics, String>,
}

impl TrialOutcome {
    /// Whether the trial completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Scores of a completed trial.
    #[must_use]
    pub fn metrics(&self) -> Option<&ClassifierMetrics> {
        self.result.as_ref().ok()
    }
}

/// Everything a sweep produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Experiment the runs were filed under
    pub experiment: ExperimentRecord,
    /// Digest of the shared evaluation dataset
    pub dataset_digest: String,
    /// One entry per trial, in sweep order
    pub outcomes: Vec<TrialOutcome>,
}

impl SweepReport {
    /// Trials that failed.
    #[must_use]
    pub fn failures(&self) -> Vec<&TrialOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    /// Trials that completed.
    #[must_use]
    pub fn successes(&self) -> Vec<&TrialOutcome> {
        self.outcomes.iter().filter(|o| o.is_success()).collect()
    }

    /// Whether every trial completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TrialOutcome::is_success)
    }

    /// Completed trial with the highest accuracy (earliest on ties).
    #[must_use]
    pub fn best_by_accuracy(&self) -> Option<&TrialOutcome> {
        self.outcomes
            .iter()
            .filter_map(|o| o.metrics().map(|m| (o, m.accuracy_score)))
            .fold(None, |best: Option<(&TrialOutcome, f64)>, (o, acc)| match best {
                Some((_, best_acc)) if best_acc >= acc => best,
                _ => Some((o, acc)),
            })
            .map(|(o, _)| o)
    }
}

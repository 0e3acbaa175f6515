//! Scores logged against a run
//!
//! One record is one point of an MLflow metric series, keyed by
//! `(key, step)`. Evaluation scores are single points at step 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A metric value observed at `step`, stamped with the time it was taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    run_id: String,
    key: String,
    step: u64,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Point taken now.
    #[must_use]
    pub fn new(run_id: impl Into<String>, key: impl Into<String>, step: u64, value: f64) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            step,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Same point with an explicit observation time.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Copy of this point filed under `run_id`.
    ///
    /// Backends use this so the stored run id is the one addressed by the
    /// write, whatever the caller put in the record.
    #[must_use]
    pub fn for_run(&self, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..self.clone()
        }
    }

    /// Owning run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Metric name, e.g. `accuracy_score`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Series position.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Observed value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Observation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Unix milliseconds, as `runs/log-batch` expects.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_record_new() {
        let metric = MetricRecord::new("run-1", "accuracy_score", 0, 0.95);
        assert_eq!(metric.run_id(), "run-1");
        assert_eq!(metric.key(), "accuracy_score");
        assert_eq!(metric.step(), 0);
        assert!((metric.value() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metric_timestamp_millis() {
        let ts = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let metric = MetricRecord::new("run-1", "log_loss", 0, 0.1).at(ts);
        assert_eq!(metric.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn test_for_run_keeps_point() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let metric = MetricRecord::new("caller", "f1_score", 3, 0.5).at(ts);
        let filed = metric.for_run("run-9");
        assert_eq!(filed.run_id(), "run-9");
        assert_eq!(filed.key(), "f1_score");
        assert_eq!(filed.step(), 3);
        assert_eq!(filed.timestamp(), ts);
    }
}

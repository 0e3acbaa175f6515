//! Param Record - immutable hyperparameters of a run

use serde::{Deserialize, Serialize};

/// A single run parameter.
///
/// Parameters are write-once: logging the same key twice with a different
/// value is rejected by the tracking backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamRecord {
    key: String,
    value: String,
}

impl ParamRecord {
    /// Create a param record; the value is stored in its display form.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// Get the parameter key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the parameter value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_record_stringifies_value() {
        let p = ParamRecord::new("n_estimators", 64);
        assert_eq!(p.key(), "n_estimators");
        assert_eq!(p.value(), "64");
    }
}

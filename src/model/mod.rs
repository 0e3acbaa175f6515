//! RandomForest classifier
//!
//! CART trees grown on bootstrap samples, split on a random feature subset
//! at every node, averaged at prediction time. Defaults follow the common
//! library conventions: unlimited depth, `min_samples_split = 2`,
//! `min_samples_leaf = 1`, `max_features = sqrt(n_features)`.
//!
//! Trees are fitted in parallel on the rayon pool. Per-tree seeds are drawn
//! up front from the forest seed, so a pinned `random_state` gives the same
//! forest regardless of pool size.

mod forest;
mod tree;

pub use forest::{MaxFeatures, RandomForestClassifier, RandomForestParams};
pub use tree::{DecisionTree, Node};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Split-quality criterion.
///
/// `Entropy` and `LogLoss` both measure Shannon information gain; they are
/// distinct values only so the tracked parameter keeps the caller's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Gini impurity
    #[default]
    Gini,
    /// Shannon entropy
    Entropy,
    /// Log loss (same impurity as entropy)
    LogLoss,
}

impl Criterion {
    /// Every criterion, in sweep order.
    pub const ALL: [Self; 3] = [Self::Gini, Self::Entropy, Self::LogLoss];

    /// Parameter value as logged to the tracking backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gini => "gini",
            Self::Entropy => "entropy",
            Self::LogLoss => "log_loss",
        }
    }

    /// Node impurity for per-class sample counts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn impurity(self, counts: &[usize], total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let total = total as f64;
        match self {
            Self::Gini => {
                1.0 - counts
                    .iter()
                    .map(|&c| {
                        let p = c as f64 / total;
                        p * p
                    })
                    .sum::<f64>()
            }
            Self::Entropy | Self::LogLoss => -counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / total;
                    p * p.log2()
                })
                .sum::<f64>(),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criterion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gini" => Ok(Self::Gini),
            "entropy" => Ok(Self::Entropy),
            "log_loss" => Ok(Self::LogLoss),
            other => Err(Error::InvalidInput(format!(
                "unknown criterion '{other}' (expected gini, entropy or log_loss)"
            ))),
        }
    }
}

/// Dense row-major matrix of `f64` features.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    n_rows: usize,
    n_cols: usize,
}

impl Matrix {
    /// Build from row-major data.
    ///
    /// # Errors
    /// Returns error if `data.len() != n_rows * n_cols` or the matrix has no
    /// columns
    pub fn new(data: Vec<f64>, n_rows: usize, n_cols: usize) -> Result<Self> {
        if n_cols == 0 {
            return Err(Error::InvalidInput("matrix must have at least one column".to_string()));
        }
        if data.len() != n_rows * n_cols {
            return Err(Error::InvalidInput(format!(
                "matrix data has {} values, expected {n_rows}x{n_cols}",
                data.len()
            )));
        }
        Ok(Self { data, n_rows, n_cols })
    }

    /// Build from equally sized rows.
    ///
    /// # Errors
    /// Returns error if rows differ in length or there are no rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err(Error::InvalidInput("rows have different lengths".to_string()));
        }
        Self::new(rows.concat(), rows.len(), n_cols)
    }

    /// Number of rows.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Row `i` as a slice.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    /// Element at (`row`, `col`).
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols + col]
    }
}

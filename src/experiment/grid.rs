//! Hyperparameter grid

use crate::model::{Criterion, RandomForestParams};
use crate::tracking::ParamRecord;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Forest sizes swept by default (2^5..2^7).
pub const N_ESTIMATORS: [usize; 3] = [32, 64, 128];

/// One grid point at one repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialParams {
    /// Position in the sweep (0-based)
    pub index: usize,
    /// Number of trees
    pub n_estimators: usize,
    /// Split criterion
    pub criterion: Criterion,
    /// Repetition of this grid point (0-based)
    pub repetition: usize,
}

impl TrialParams {
    /// Display name of the tracking run.
    #[must_use]
    pub fn run_name(&self) -> String {
        format!(
            "rf-{}-{}-{}",
            self.n_estimators, self.criterion, self.repetition
        )
    }

    /// The params logged to the run: exactly `n_estimators` and `criterion`.
    #[must_use]
    pub fn to_params(&self) -> Vec<ParamRecord> {
        vec![
            ParamRecord::new("n_estimators", self.n_estimators),
            ParamRecord::new("criterion", self.criterion),
        ]
    }

    /// Forest hyperparameters; everything not swept stays at its default.
    ///
    /// A pinned sweep seed is offset by the trial index so repetitions
    /// still differ.
    #[must_use]
    pub fn forest_params(&self, seed: Option<u64>) -> RandomForestParams {
        let params = RandomForestParams::new(self.n_estimators).criterion(self.criterion);
        match seed {
            Some(seed) => params.random_state(seed.wrapping_add(self.index as u64)),
            None => params,
        }
    }
}

/// Cartesian product of forest sizes and criteria, each repeated `n_tests`
/// times.
///
/// Iteration order: `n_estimators` outermost, then criterion, repetitions
/// innermost.
///
/// ```rust
/// use forest_sweep::experiment::ParamGrid;
///
/// let grid = ParamGrid::new(2);
/// assert_eq!(grid.len(), 18);
/// let first = grid.iter().next().unwrap();
/// assert_eq!(first.run_name(), "rf-32-gini-0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamGrid {
    n_estimators: Vec<usize>,
    criteria: Vec<Criterion>,
    n_tests: usize,
}

impl ParamGrid {
    /// The default sweep: {32, 64, 128} x {gini, entropy, log_loss}.
    #[must_use]
    pub fn new(n_tests: usize) -> Self {
        Self {
            n_estimators: N_ESTIMATORS.to_vec(),
            criteria: Criterion::ALL.to_vec(),
            n_tests,
        }
    }

    /// A custom sweep.
    ///
    /// # Errors
    /// Returns error if any axis is empty or a forest size is zero
    pub fn with_values(n_estimators: Vec<usize>, criteria: Vec<Criterion>, n_tests: usize) -> Result<Self> {
        if n_estimators.is_empty() || criteria.is_empty() || n_tests == 0 {
            return Err(Error::InvalidInput(
                "grid axes and n_tests must be non-empty".to_string(),
            ));
        }
        if n_estimators.contains(&0) {
            return Err(Error::InvalidInput("n_estimators values must be positive".to_string()));
        }
        Ok(Self {
            n_estimators,
            criteria,
            n_tests,
        })
    }

    /// Repetitions per grid point.
    #[must_use]
    pub const fn n_tests(&self) -> usize {
        self.n_tests
    }

    /// Total number of trials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n_estimators.len() * self.criteria.len() * self.n_tests
    }

    /// Whether the grid yields no trials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Trials in sweep order.
    pub fn iter(&self) -> impl Iterator<Item = TrialParams> + '_ {
        self.n_estimators
            .iter()
            .flat_map(move |&n| {
                self.criteria
                    .iter()
                    .flat_map(move |&c| (0..self.n_tests).map(move |rep| (n, c, rep)))
            })
            .enumerate()
            .map(|(index, (n_estimators, criterion, repetition))| TrialParams {
                index,
                n_estimators,
                criterion,
                repetition,
            })
    }
}

//! RandomForest ensemble

use super::tree::{DecisionTree, TreeParams};
use super::{Criterion, Matrix};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `floor(sqrt(n_features))`
    #[default]
    Sqrt,
    /// `floor(log2(n_features))`
    Log2,
    /// Every feature
    All,
    /// A fixed count (clamped to `n_features`)
    Count(usize),
}

impl MaxFeatures {
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            Self::Sqrt => (n_features as f64).sqrt().floor() as usize,
            Self::Log2 => (n_features as f64).log2().floor() as usize,
            Self::All => n_features,
            Self::Count(k) => k.min(n_features),
        };
        n.max(1)
    }
}

/// Hyperparameters of a [`RandomForestClassifier`].
///
/// ```rust
/// use forest_sweep::model::{Criterion, RandomForestParams};
///
/// let params = RandomForestParams::new(64)
///     .criterion(Criterion::Entropy)
///     .random_state(42);
/// assert_eq!(params.n_estimators, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Split-quality criterion
    pub criterion: Criterion,
    /// Maximum tree depth (`None` grows until leaves are pure)
    pub max_depth: Option<usize>,
    /// Minimum samples required to split a node
    pub min_samples_split: usize,
    /// Minimum samples required in each leaf
    pub min_samples_leaf: usize,
    /// Features considered per split
    pub max_features: MaxFeatures,
    /// Fit each tree on a bootstrap sample
    pub bootstrap: bool,
    /// Seed for bootstrap and feature sampling (`None` draws from entropy)
    pub random_state: Option<u64>,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            random_state: None,
        }
    }
}

impl RandomForestParams {
    /// Defaults with the given number of trees.
    #[must_use]
    pub fn new(n_estimators: usize) -> Self {
        Self {
            n_estimators,
            ..Self::default()
        }
    }

    /// Set the split criterion.
    #[must_use]
    pub const fn criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Limit tree depth.
    #[must_use]
    pub const fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the per-split feature budget.
    #[must_use]
    pub const fn max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Pin the random seed.
    #[must_use]
    pub const fn random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Fit a forest on `x` (rows) and integer labels `y`.
    ///
    /// # Errors
    /// Returns error if the data is empty, `x` and `y` differ in length, or
    /// a hyperparameter is out of range
    pub fn fit(&self, x: &Matrix, y: &[i64]) -> Result<RandomForestClassifier> {
        self.validate()?;
        let n = x.n_rows();
        if n == 0 {
            return Err(Error::InvalidInput("cannot fit on an empty dataset".to_string()));
        }
        if y.len() != n {
            return Err(Error::InvalidInput(format!(
                "x has {n} rows but y has {} labels",
                y.len()
            )));
        }

        let mut classes = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        let y_idx: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();

        let tree_params = TreeParams {
            criterion: self.criterion,
            max_features: self.max_features.resolve(x.n_cols()),
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        };

        let mut rng = self
            .random_state
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let seeds: Vec<u64> = (0..self.n_estimators).map(|_| rng.gen()).collect();

        let n_classes = classes.len();
        let bootstrap = self.bootstrap;
        let trees: Vec<DecisionTree> = seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut samples: Vec<usize> = if bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                DecisionTree::fit(x, &y_idx, &mut samples, n_classes, tree_params, &mut rng)
            })
            .collect();

        tracing::debug!(
            n_estimators = self.n_estimators,
            criterion = %self.criterion,
            n_samples = n,
            n_classes,
            "fitted random forest"
        );

        Ok(RandomForestClassifier {
            params: self.clone(),
            classes,
            n_features: x.n_cols(),
            trees,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(Error::InvalidInput("n_estimators must be at least 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(Error::InvalidInput("min_samples_split must be at least 2".to_string()));
        }
        if self.min_samples_leaf == 0 {
            return Err(Error::InvalidInput("min_samples_leaf must be at least 1".to_string()));
        }
        if self.max_features == MaxFeatures::Count(0) {
            return Err(Error::InvalidInput("max_features must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A fitted RandomForest classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    params: RandomForestParams,
    classes: Vec<i64>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForestClassifier {
    /// Hyperparameters used for fitting.
    #[must_use]
    pub const fn params(&self) -> &RandomForestParams {
        &self.params
    }

    /// Sorted class labels seen during fitting.
    #[must_use]
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    /// Number of input features.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    fn check_width(&self, x: &Matrix) -> Result<()> {
        if x.n_cols() == self.n_features {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "model expects {} features, got {}",
                self.n_features,
                x.n_cols()
            )))
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn proba_row(&self, row: &[f64]) -> Vec<f64> {
        let mut acc = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (a, p) in acc.iter_mut().zip(tree.predict_proba_row(row)) {
                *a += p;
            }
        }
        let n = self.trees.len() as f64;
        acc.iter_mut().for_each(|a| *a /= n);
        acc
    }

    /// Class probabilities per row (columns follow [`Self::classes`]).
    ///
    /// # Errors
    /// Returns error if `x` has the wrong number of features
    pub fn predict_proba(&self, x: &Matrix) -> Result<Vec<Vec<f64>>> {
        self.check_width(x)?;
        Ok((0..x.n_rows())
            .into_par_iter()
            .map(|i| self.proba_row(x.row(i)))
            .collect())
    }

    /// Most probable class per row.
    ///
    /// # Errors
    /// Returns error if `x` has the wrong number of features
    pub fn predict(&self, x: &Matrix) -> Result<Vec<i64>> {
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|p| self.classes[argmax(p)])
            .collect())
    }
}

/// Index of the largest value; ties go to the lowest index.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

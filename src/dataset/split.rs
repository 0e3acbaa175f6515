//! Random train/test partitioning
//!
//! The test partition takes `ceil(test_size * N)` rows and the train
//! partition takes the rest, so the two are disjoint and cover every row.
//! Row assignment comes from a shuffled permutation; pass a seed to make
//! it reproducible.

use super::{Features, Target};
use crate::{Error, Result};
use arrow::array::UInt32Array;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Default fraction of rows held out for evaluation.
pub const DEFAULT_TEST_SIZE: f64 = 0.3;

/// Train and test partitions of one dataset.
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    /// Training features
    pub x_train: Features,
    /// Held-out features
    pub x_test: Features,
    /// Training labels
    pub y_train: Target,
    /// Held-out labels
    pub y_test: Target,
    /// Source row index of every training row
    pub train_indices: Vec<u32>,
    /// Source row index of every test row
    pub test_indices: Vec<u32>,
}

/// Compute `(train, test)` partition sizes for `n` rows.
///
/// # Errors
/// Returns error if `test_size` is not in `(0, 1)` or either partition
/// would be empty
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn split_sizes(n: usize, test_size: f64) -> Result<(usize, usize)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(Error::InvalidInput(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    let n_test = (test_size * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(Error::InvalidInput(format!(
            "with n_samples={n} and test_size={test_size}, one partition would be empty"
        )));
    }
    Ok((n_train, n_test))
}

/// Shuffle rows and split them into train/test partitions.
///
/// # Errors
/// Returns error if `x` and `y` differ in length, the sizes are invalid,
/// or the row count does not fit in a `u32` index
pub fn train_test_split(
    x: &Features,
    y: &Target,
    test_size: f64,
    seed: Option<u64>,
) -> Result<TrainTestSplit> {
    let n = x.num_rows();
    if n != y.len() {
        return Err(Error::InvalidInput(format!(
            "features have {n} rows but target has {} labels",
            y.len()
        )));
    }
    let (n_train, n_test) = split_sizes(n, test_size)?;
    let n = u32::try_from(n)
        .map_err(|_| Error::InvalidInput(format!("too many rows to split: {n}")))?;

    let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let mut permutation: Vec<u32> = (0..n).collect();
    permutation.shuffle(&mut rng);

    let test_indices = permutation[..n_test].to_vec();
    let train_indices = permutation[n_test..n_test + n_train].to_vec();

    let test_idx = UInt32Array::from(test_indices.clone());
    let train_idx = UInt32Array::from(train_indices.clone());

    tracing::debug!(n_train, n_test, seeded = seed.is_some(), "split dataset");

    Ok(TrainTestSplit {
        x_train: x.take(&train_idx)?,
        x_test: x.take(&test_idx)?,
        y_train: y.take(&train_idx)?,
        y_test: y.take(&test_idx)?,
        train_indices,
        test_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::iris::load_iris;
    use crate::dataset::{SPECIES_COLUMN, TARGET_COLUMN};
    use std::collections::HashSet;

    fn iris_xy() -> (Features, Target) {
        load_iris()
            .unwrap()
            .features_and_target(TARGET_COLUMN, &[SPECIES_COLUMN])
            .unwrap()
    }

    #[test]
    fn test_split_sizes_iris() {
        assert_eq!(split_sizes(150, 0.3).unwrap(), (105, 45));
    }

    #[test]
    fn test_split_sizes_rounds_test_up() {
        assert_eq!(split_sizes(10, 0.25).unwrap(), (7, 3));
    }

    #[test]
    fn test_split_sizes_rejects_bad_ratio() {
        assert!(split_sizes(10, 0.0).is_err());
        assert!(split_sizes(10, 1.0).is_err());
        assert!(split_sizes(10, f64::NAN).is_err());
    }

    #[test]
    fn test_split_sizes_rejects_empty_partition() {
        assert!(split_sizes(1, 0.3).is_err());
        assert!(split_sizes(0, 0.3).is_err());
    }

    #[test]
    fn test_split_is_disjoint_and_complete() {
        let (x, y) = iris_xy();
        let split = train_test_split(&x, &y, 0.3, None).unwrap();

        assert_eq!(split.x_test.num_rows(), 45);
        assert_eq!(split.x_train.num_rows(), 105);
        assert_eq!(split.y_test.len(), 45);

        let train: HashSet<u32> = split.train_indices.iter().copied().collect();
        let test: HashSet<u32> = split.test_indices.iter().copied().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), 150);
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let (x, y) = iris_xy();
        let a = train_test_split(&x, &y, 0.3, Some(7)).unwrap();
        let b = train_test_split(&x, &y, 0.3, Some(7)).unwrap();
        assert_eq!(a.test_indices, b.test_indices);
        assert_eq!(a.y_test.labels(), b.y_test.labels());
    }

    #[test]
    fn test_rows_follow_their_labels() {
        let (x, y) = iris_xy();
        let split = train_test_split(&x, &y, 0.3, Some(1)).unwrap();
        let labels = y.labels();
        for (pos, &src) in split.test_indices.iter().enumerate() {
            assert_eq!(split.y_test.labels()[pos], labels[src as usize]);
            assert_eq!(split.x_test.row(pos), x.row(src as usize));
        }
    }

    #[test]
    fn test_length_mismatch() {
        let (x, _) = iris_xy();
        let y = Target::from_labels("target", vec![0, 1]);
        assert!(train_test_split(&x, &y, 0.3, None).is_err());
    }
}

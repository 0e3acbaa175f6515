//! CART decision tree (classification)

use super::{Criterion, Matrix};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Values closer than this are treated as equal when placing thresholds.
const FEATURE_THRESHOLD: f64 = 1e-7;

/// A tree node; children are indices into the tree's node vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Internal node: rows with `x[feature] <= threshold` go left.
    Split {
        /// Feature index
        feature: usize,
        /// Split threshold
        threshold: f64,
        /// Left child
        left: usize,
        /// Right child
        right: usize,
    },
    /// Terminal node with the class distribution of its training samples.
    Leaf {
        /// Class probabilities, indexed like the forest's classes
        distribution: Vec<f64>,
    },
}

/// Growth limits shared by every tree of a forest.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub criterion: Criterion,
    pub max_features: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

/// A fitted classification tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_classes: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct GrowContext<'a> {
    x: &'a Matrix,
    y: &'a [usize],
    params: TreeParams,
}

impl DecisionTree {
    /// Grow a tree on `samples` (row indices into `x`, repeats allowed).
    ///
    /// `y` holds class indices in `0..n_classes`.
    pub(crate) fn fit(
        x: &Matrix,
        y: &[usize],
        samples: &mut [usize],
        n_classes: usize,
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            n_classes,
        };
        let ctx = GrowContext { x, y, params };
        tree.grow(&ctx, samples, 0, rng);
        tree
    }

    fn grow(&mut self, ctx: &GrowContext<'_>, samples: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let counts = class_counts(ctx.y, samples, self.n_classes);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: normalize(&counts),
        });

        let n = samples.len();
        let params = ctx.params;
        let depth_left = params.max_depth.map_or(true, |max| depth < max);
        let impurity = params.criterion.impurity(&counts, n);
        if !depth_left
            || n < params.min_samples_split
            || n < 2 * params.min_samples_leaf
            || impurity <= f64::EPSILON
        {
            return id;
        }

        let Some(best) = best_split(ctx, samples, self.n_classes, rng) else {
            return id;
        };

        let mid = partition(samples, |s| ctx.x.get(s, best.feature) <= best.threshold);
        let (left_samples, right_samples) = samples.split_at_mut(mid);
        let left = self.grow(ctx, left_samples, depth + 1, rng);
        let right = self.grow(ctx, right_samples, depth + 1, rng);

        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    /// Class distribution of the leaf `row` falls into.
    #[must_use]
    pub fn predict_proba_row(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { distribution } => return distribution,
            }
        }
    }

    /// All nodes, root first.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Length of the longest root-to-leaf path.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                Node::Leaf { .. } => 0,
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

fn class_counts(y: &[usize], samples: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0; n_classes];
    for &s in samples {
        counts[y[s]] += 1;
    }
    counts
}

#[allow(clippy::cast_precision_loss)]
fn normalize(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

/// Move every sample matching `pred` to the front; returns how many matched.
fn partition(samples: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut boundary = 0;
    for i in 0..samples.len() {
        if pred(samples[i]) {
            samples.swap(boundary, i);
            boundary += 1;
        }
    }
    boundary
}

/// Best threshold over a random subset of features.
///
/// Features are visited in random order; constant features do not count
/// toward `max_features`, so a split is found whenever one exists among
/// the first `max_features` non-constant features.
#[allow(clippy::cast_precision_loss)]
fn best_split(
    ctx: &GrowContext<'_>,
    samples: &[usize],
    n_classes: usize,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let n = samples.len();
    let params = ctx.params;
    let mut features: Vec<usize> = (0..ctx.x.n_cols()).collect();
    features.shuffle(rng);

    let parent_counts = class_counts(ctx.y, samples, n_classes);
    let mut order = samples.to_vec();
    let mut best: Option<BestSplit> = None;
    let mut visited = 0;

    for feature in features {
        if visited >= params.max_features {
            break;
        }
        order.sort_by(|&a, &b| ctx.x.get(a, feature).total_cmp(&ctx.x.get(b, feature)));
        let lo = ctx.x.get(order[0], feature);
        let hi = ctx.x.get(order[n - 1], feature);
        if hi <= lo + FEATURE_THRESHOLD {
            continue;
        }
        visited += 1;

        let mut left = vec![0usize; n_classes];
        let mut right = parent_counts.clone();
        for i in 0..n - 1 {
            let class = ctx.y[order[i]];
            left[class] += 1;
            right[class] -= 1;

            let n_left = i + 1;
            let n_right = n - n_left;
            if n_left < params.min_samples_leaf || n_right < params.min_samples_leaf {
                continue;
            }
            let v = ctx.x.get(order[i], feature);
            let v_next = ctx.x.get(order[i + 1], feature);
            if v_next <= v + FEATURE_THRESHOLD {
                continue;
            }

            let score = (n_left as f64 * params.criterion.impurity(&left, n_left)
                + n_right as f64 * params.criterion.impurity(&right, n_right))
                / n as f64;
            if best.as_ref().map_or(true, |b| score < b.score) {
                let mut threshold = v / 2.0 + v_next / 2.0;
                if threshold >= v_next {
                    threshold = v;
                }
                best = Some(BestSplit {
                    feature,
                    threshold,
                    score,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(criterion: Criterion) -> TreeParams {
        TreeParams {
            criterion,
            max_features: 2,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }

    fn fit(x: &Matrix, y: &[usize], n_classes: usize, p: TreeParams) -> DecisionTree {
        let mut samples: Vec<usize> = (0..x.n_rows()).collect();
        let mut rng = StdRng::seed_from_u64(0);
        DecisionTree::fit(x, y, &mut samples, n_classes, p, &mut rng)
    }

    #[test]
    fn test_pure_node_is_single_leaf() {
        let x = Matrix::from_rows(&[vec![1.0, 0.0], vec![2.0, 1.0]]).unwrap();
        let tree = fit(&x, &[1, 1], 2, params(Criterion::Gini));
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict_proba_row(&[0.0, 0.0]), &[0.0, 1.0]);
    }

    #[test]
    fn test_separable_data_fits_exactly() {
        let x = Matrix::from_rows(&[
            vec![1.0, 5.0],
            vec![2.0, 5.0],
            vec![8.0, 5.0],
            vec![9.0, 5.0],
        ])
        .unwrap();
        let y = [0, 0, 1, 1];
        for criterion in Criterion::ALL {
            let tree = fit(&x, &y, 2, params(criterion));
            assert_eq!(tree.depth(), 1);
            assert_eq!(tree.n_leaves(), 2);
            assert_eq!(tree.predict_proba_row(&[1.5, 5.0]), &[1.0, 0.0]);
            assert_eq!(tree.predict_proba_row(&[8.5, 5.0]), &[0.0, 1.0]);
        }
    }

    #[test]
    fn test_threshold_is_midpoint() {
        let x = Matrix::from_rows(&[vec![1.0], vec![3.0]]).unwrap();
        let tree = fit(&x, &[0, 1], 2, params(Criterion::Gini));
        match &tree.nodes()[0] {
            Node::Split { threshold, .. } => assert!((threshold - 2.0).abs() < 1e-12),
            Node::Leaf { .. } => panic!("expected a split"),
        }
    }

    #[test]
    fn test_constant_features_yield_leaf() {
        let x = Matrix::from_rows(&[vec![1.0], vec![1.0], vec![1.0]]).unwrap();
        let tree = fit(&x, &[0, 1, 0], 2, params(Criterion::Entropy));
        assert_eq!(tree.n_leaves(), 1);
        let p = tree.predict_proba_row(&[1.0]);
        assert!((p[0] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x = Matrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0], vec![4.0]]).unwrap();
        let mut p = params(Criterion::Gini);
        p.max_depth = Some(1);
        let tree = fit(&x, &[0, 1, 0, 1], 2, p);
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn test_partition_moves_matches_to_front() {
        let mut s = vec![5, 2, 8, 1, 9];
        let mid = partition(&mut s, |v| v < 5);
        assert_eq!(mid, 2);
        assert!(s[..mid].iter().all(|&v| v < 5));
        assert!(s[mid..].iter().all(|&v| v >= 5));
    }
}

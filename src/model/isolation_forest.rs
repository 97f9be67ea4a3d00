//! Isolation forest outlier scorer.
//!
//! Random-partition ensemble: each tree recursively splits a random subsample
//! on a random feature at a random cut until points are isolated or the
//! height limit `ceil(log2(psi))` is hit. Anomalies isolate in few cuts, so
//! the anomaly score is `2^(-E[h(x)] / c(psi))` where `h` is the path length
//! and `c` the average unsuccessful-search length of a binary search tree.
//!
//! The decision threshold is the `(1 - contamination)` quantile of the
//! training scores, so roughly `contamination` of the training data would be
//! labelled anomalous.
//!
//! A point lying outside a tree's training hull on a feature the tree cuts
//! is isolated at that cut (path ends at `depth + 1`). Training points never
//! trigger this, and it keeps far-out points from inheriting the path of the
//! most extreme training point.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{validate_matrix, AnomalyModel, ModelError, ModelTrainer};
use crate::config::ModelConfig;
use crate::types::FeatureVector;

/// Euler–Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search among `n` points.
#[allow(clippy::cast_precision_loss)]
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

// ============================================================================
// Trainer
// ============================================================================

/// Fits [`IsolationForest`] models from a [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct IsolationForestTrainer {
    config: ModelConfig,
}

impl IsolationForestTrainer {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl ModelTrainer for IsolationForestTrainer {
    type Model = IsolationForest;

    fn fit(&self, vectors: &[FeatureVector]) -> Result<IsolationForest, ModelError> {
        let cfg = &self.config;
        if cfg.n_estimators == 0 {
            return Err(ModelError::InvalidConfig("n_estimators must be > 0".into()));
        }
        if !(cfg.contamination > 0.0 && cfg.contamination <= 0.5) {
            return Err(ModelError::InvalidConfig(format!(
                "contamination {} outside (0, 0.5]",
                cfg.contamination
            )));
        }
        if vectors.len() < 2 {
            return Err(ModelError::InsufficientData {
                have: vectors.len(),
                need: 2,
            });
        }
        let dims = validate_matrix(vectors, None)?;

        let sample_size = cfg.max_samples.clamp(2, vectors.len());
        let height_limit = height_limit(sample_size);
        let mut rng = self.rng();

        let trees: Vec<IsolationTree> = (0..cfg.n_estimators)
            .map(|_| {
                let indices = rand::seq::index::sample(&mut rng, vectors.len(), sample_size).into_vec();
                IsolationTree::grow(vectors, indices, dims, height_limit, &mut rng)
            })
            .collect();

        let mut forest = IsolationForest {
            trees,
            sample_size,
            dims,
            threshold: f64::INFINITY,
        };

        let mut scores: Vec<f64> = vectors.iter().map(|v| forest.score_one(v)).collect();
        scores.sort_by(f64::total_cmp);
        forest.threshold = quantile(&scores, 1.0 - cfg.contamination);

        debug!(
            trees = forest.tree_count(),
            sample_size,
            dims,
            threshold = forest.threshold,
            "Isolation forest fitted on {} vectors",
            vectors.len()
        );

        Ok(forest)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn height_limit(sample_size: usize) -> usize {
    (sample_size as f64).log2().ceil().max(1.0) as usize
}

/// Linear-interpolated quantile of an ascending slice.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::INFINITY;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

// ============================================================================
// Model
// ============================================================================

/// A fitted isolation forest.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    dims: usize,
    threshold: f64,
}

impl IsolationForest {
    /// Anomaly scores in `(0, 1]`; higher is more anomalous.
    pub fn score_samples(&self, vectors: &[FeatureVector]) -> Result<Vec<f64>, ModelError> {
        validate_matrix(vectors, Some(self.dims))?;
        Ok(vectors.iter().map(|v| self.score_one(v)).collect())
    }

    /// Scores strictly above this are labelled anomalous.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn score_one(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        let mean = total / self.trees.len() as f64;
        2f64.powf(-mean / average_path_length(self.sample_size))
    }
}

impl AnomalyModel for IsolationForest {
    fn predict(&self, vectors: &[FeatureVector]) -> Result<Vec<bool>, ModelError> {
        let scores = self.score_samples(vectors)?;
        Ok(scores.into_iter().map(|s| s > self.threshold).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "isolation_forest"
    }
}

// ============================================================================
// Tree
// ============================================================================

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        cut: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
    hull_lo: Vec<f64>,
    hull_hi: Vec<f64>,
}

impl IsolationTree {
    fn grow(
        data: &[FeatureVector],
        indices: Vec<usize>,
        dims: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let (hull_lo, hull_hi) = bounds(data, &indices, dims);
        let mut tree = Self {
            nodes: Vec::new(),
            hull_lo,
            hull_hi,
        };
        tree.grow_node(data, indices, 0, height_limit, rng);
        tree
    }

    fn grow_node(
        &mut self,
        data: &[FeatureVector],
        indices: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        let size = indices.len();
        if size <= 1 || depth >= height_limit {
            self.nodes.push(Node::Leaf { size });
            return id;
        }

        let (lo, hi) = bounds(data, &indices, self.hull_lo.len());
        let splittable: Vec<usize> = (0..lo.len()).filter(|&f| hi[f] > lo[f]).collect();
        if splittable.is_empty() {
            // All remaining points are identical
            self.nodes.push(Node::Leaf { size });
            return id;
        }

        let feature = splittable[rng.gen_range(0..splittable.len())];
        let cut = rng.gen_range(lo[feature]..hi[feature]);
        // cut in [lo, hi): the minimum goes left, the maximum goes right
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| data[i][feature] <= cut);

        self.nodes.push(Node::Leaf { size });
        let left = self.grow_node(data, left_idx, depth + 1, height_limit, rng);
        let right = self.grow_node(data, right_idx, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            cut,
            left,
            right,
        };
        id
    }

    #[allow(clippy::cast_precision_loss)]
    fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0usize;
        loop {
            match self.nodes[node] {
                Node::Leaf { size } => {
                    if self.outside_hull(x) {
                        return (depth + 1) as f64;
                    }
                    return depth as f64 + average_path_length(size);
                }
                Node::Split {
                    feature,
                    cut,
                    left,
                    right,
                } => {
                    let v = x[feature];
                    if v < self.hull_lo[feature] || v > self.hull_hi[feature] {
                        return (depth + 1) as f64;
                    }
                    node = if v <= cut { left } else { right };
                    depth += 1;
                }
            }
        }
    }

    fn outside_hull(&self, x: &[f64]) -> bool {
        x.iter()
            .zip(self.hull_lo.iter().zip(&self.hull_hi))
            .any(|(v, (lo, hi))| v < lo || v > hi)
    }
}

/// Per-feature min/max over the selected rows.
fn bounds(data: &[FeatureVector], indices: &[usize], dims: usize) -> (Vec<f64>, Vec<f64>) {
    let mut lo = vec![f64::INFINITY; dims];
    let mut hi = vec![f64::NEG_INFINITY; dims];
    for &i in indices {
        for (f, &v) in data[i].iter().enumerate() {
            lo[f] = lo[f].min(v);
            hi[f] = hi[f].max(v);
        }
    }
    (lo, hi)
}

// ============================================================================
// Tests
// ============================================================================

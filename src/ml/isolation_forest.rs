//! Isolation forest over normalized feature vectors.
//!
//! Anomalies are isolated by fewer random axis-aligned splits than normal
//! points, so their average path length across trees is shorter. Construction
//! takes an explicit random source so tests can fix it.

use rand::Rng;
use tracing::debug;

use crate::config::ForestConfig;
use crate::detect::DetectError;
use crate::telemetry::{FeatureVector, NUM_FEATURES};

const EULER_MASCHERONI: f64 = 0.577_215_664_9;

/// Expected path length of an unsuccessful BST search over `n` points,
/// used both for leaf corrections and for score normalisation.
pub fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
}

#[derive(Debug, Clone)]
enum IsolationNode {
    Internal {
        feature: usize,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
pub struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    /// Build a tree over `rows`, drawn from `data` by index.
    fn build<R: Rng>(data: &[FeatureVector], rows: &mut [usize], max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: build_node(data, rows, 0, max_depth, rng),
        }
    }

    pub fn path_length(&self, x: &FeatureVector) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Internal {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    node = if x[*feature] < *split { left } else { right };
                    depth += 1;
                }
                IsolationNode::Leaf { size } => {
                    return depth as f64 + average_path_length(*size);
                }
            }
        }
    }
}

fn build_node<R: Rng>(
    data: &[FeatureVector],
    rows: &mut [usize],
    depth: usize,
    max_depth: usize,
    rng: &mut R,
) -> IsolationNode {
    if depth >= max_depth || rows.len() <= 1 {
        return IsolationNode::Leaf { size: rows.len() };
    }

    let feature = rng.gen_range(0..NUM_FEATURES);
    let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
        let v = data[r][feature];
        (lo.min(v), hi.max(v))
    });
    if max <= min {
        return IsolationNode::Leaf { size: rows.len() };
    }
    let split = rng.gen_range(min..max);

    // in-place partition: [< split | >= split]
    let mut boundary = 0;
    for i in 0..rows.len() {
        if data[rows[i]][feature] < split {
            rows.swap(i, boundary);
            boundary += 1;
        }
    }
    if boundary == 0 || boundary == rows.len() {
        debug!(feature, depth, "degenerate split, emitting leaf");
        return IsolationNode::Leaf { size: rows.len() };
    }

    let (left_rows, right_rows) = rows.split_at_mut(boundary);
    IsolationNode::Internal {
        feature,
        split,
        left: Box::new(build_node(data, left_rows, depth + 1, max_depth, rng)),
        right: Box::new(build_node(data, right_rows, depth + 1, max_depth, rng)),
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    num_trees: usize,
    subsample_size: usize,
    /// `average_path_length(subsample_size)`.
    normalizer: f64,
}

impl IsolationForest {
    pub fn new(config: &ForestConfig) -> Self {
        Self {
            trees: Vec::new(),
            num_trees: config.num_trees,
            subsample_size: config.subsample_size,
            normalizer: average_path_length(config.subsample_size),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        (self.subsample_size as f64).log2().ceil() as usize
    }

    /// Build `num_trees` trees, each over `min(subsample_size, n)` rows
    /// sampled with replacement.
    pub fn fit<R: Rng>(&mut self, vectors: &[FeatureVector], rng: &mut R) -> Result<(), DetectError> {
        if vectors.is_empty() {
            return Err(DetectError::InsufficientData { needed: 1, have: 0 });
        }

        let sample = self.subsample_size.min(vectors.len());
        let max_depth = self.max_depth();
        let mut rows = vec![0usize; sample];

        self.trees = (0..self.num_trees)
            .map(|_| {
                rows.iter_mut().for_each(|r| *r = rng.gen_range(0..vectors.len()));
                IsolationTree::build(vectors, &mut rows, max_depth, rng)
            })
            .collect();

        debug!(trees = self.trees.len(), sample, max_depth, "isolation forest built");
        Ok(())
    }

    pub fn average_path(&self, x: &FeatureVector) -> Result<f64, DetectError> {
        if self.trees.is_empty() {
            return Err(DetectError::ModelNotReady);
        }
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        Ok(total / self.trees.len() as f64)
    }

    /// `2^(-E[h(x)] / c)`: near 1 is easily isolated, near 0 is normal.
    pub fn score(&self, x: &FeatureVector) -> Result<f64, DetectError> {
        let avg = self.average_path(x)?;
        if self.normalizer <= 0.0 {
            // subsample of one point: nothing separates anything
            return Ok(0.5);
        }
        Ok(2f64.powf(-avg / self.normalizer))
    }
}

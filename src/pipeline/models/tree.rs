//! Variance-reduction regression trees and the two ensembles built on them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::Regressor;
use crate::pipeline::error::AnalysisError;

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

/// CART regression tree minimizing squared error.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    root: Option<Node>,
    /// Total squared-error decrease per feature, normalized to sum to 1.
    importances: Vec<f64>,
}

impl RegressionTree {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            root: None,
            importances: Vec::new(),
        }
    }

    /// Fit on the rows named by `indices` (repeats allowed, as in a bootstrap sample).
    pub fn fit_indices(&mut self, x: &[Vec<f64>], y: &[f64], indices: &[usize]) {
        let n_features = x.first().map_or(0, Vec::len);
        let mut decrease = vec![0.0; n_features];
        let root = self.grow(x, y, indices.to_vec(), 0, &mut decrease);
        let total: f64 = decrease.iter().sum();
        if total > 0.0 {
            decrease.iter_mut().for_each(|d| *d /= total);
        }
        self.importances = decrease;
        self.root = Some(root);
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = match &self.root {
            Some(root) => root,
            None => return 0.0,
        };
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn grow(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        indices: Vec<usize>,
        depth: usize,
        decrease: &mut [f64],
    ) -> Node {
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len().max(1) as f64;
        if depth >= self.max_depth || indices.len() < self.min_samples_split {
            return Node::Leaf(mean);
        }
        let Some(split) = self.best_split(x, y, &indices) else {
            return Node::Leaf(mean);
        };
        decrease[split.feature] += split.decrease;

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[i][split.feature] <= split.threshold);
        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(x, y, left, depth + 1, decrease)),
            right: Box::new(self.grow(x, y, right, depth + 1, decrease)),
        }
    }

    fn best_split(&self, x: &[Vec<f64>], y: &[f64], indices: &[usize]) -> Option<SplitCandidate> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let parent_sse = total_sq - total_sum * total_sum / n as f64;
        if parent_sse <= 1e-12 {
            return None;
        }

        let n_features = x.first().map_or(0, Vec::len);
        let mut best: Option<SplitCandidate> = None;
        let mut order = indices.to_vec();

        for feature in 0..n_features {
            order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let yi = y[order[pos]];
                left_sum += yi;
                left_sq += yi * yi;
                let n_left = pos + 1;
                let n_right = n - n_left;
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }
                let here = x[order[pos]][feature];
                let next = x[order[pos + 1]][feature];
                if next <= here {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / n_left as f64)
                    + (right_sq - right_sum * right_sum / n_right as f64);
                let gain = parent_sse - sse;
                if best.as_ref().map_or(gain > 1e-12, |b| gain > b.decrease + 1e-12) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (here + next) / 2.0,
                        decrease: gain,
                    });
                }
            }
        }
        best
    }
}

fn check_training_set(name: &str, x: &[Vec<f64>], y: &[f64]) -> Result<(), AnalysisError> {
    if x.is_empty() || x.len() != y.len() {
        return Err(AnalysisError::insufficient(format!(
            "{} training rows for {} targets",
            x.len(),
            y.len()
        )));
    }
    if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
        return Err(AnalysisError::degenerate(name, "non-finite training values"));
    }
    Ok(())
}

/// Bagged ensemble of depth-limited trees, each fit on a bootstrap sample.
#[derive(Debug, Clone)]
pub struct RandomForest {
    pub n_trees: usize,
    pub max_depth: usize,
    pub seed: u64,
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(n_trees: usize, max_depth: usize, seed: u64) -> Self {
        Self {
            n_trees,
            max_depth,
            seed,
            trees: Vec::new(),
            importances: Vec::new(),
        }
    }
}

impl Regressor for RandomForest {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), AnalysisError> {
        check_training_set(self.name(), x, y)?;
        let n = x.len();
        let max_depth = self.max_depth;
        let seed = self.seed;

        self.trees = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut tree = RegressionTree::new(max_depth);
                tree.fit_indices(x, y, &sample);
                tree
            })
            .collect();

        let n_features = x[0].len();
        let mut importances = vec![0.0; n_features];
        for tree in &self.trees {
            for (acc, v) in importances.iter_mut().zip(tree.importances()) {
                *acc += v;
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        self.importances = importances;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        let n_trees = self.trees.len().max(1) as f64;
        x.iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect()
    }

    fn impurity_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}

/// Least-squares gradient boosting of shallow trees.
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    pub n_stages: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    init: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn new(n_stages: usize, learning_rate: f64, max_depth: usize) -> Self {
        Self {
            n_stages,
            learning_rate,
            max_depth,
            init: 0.0,
            trees: Vec::new(),
        }
    }
}

impl Regressor for GradientBoosting {
    fn name(&self) -> &'static str {
        "gradient_boosting"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), AnalysisError> {
        check_training_set(self.name(), x, y)?;
        let all: Vec<usize> = (0..x.len()).collect();
        self.init = y.iter().sum::<f64>() / y.len() as f64;
        let mut prediction = vec![self.init; y.len()];
        self.trees.clear();

        for _ in 0..self.n_stages {
            let residual: Vec<f64> = y.iter().zip(&prediction).map(|(t, p)| t - p).collect();
            let mut tree = RegressionTree::new(self.max_depth);
            tree.fit_indices(x, &residual, &all);
            for (p, row) in prediction.iter_mut().zip(x) {
                *p += self.learning_rate * tree.predict_row(row);
            }
            self.trees.push(tree);
        }
        if prediction.iter().any(|p| !p.is_finite()) {
            return Err(AnalysisError::degenerate(self.name(), "boosting diverged"));
        }
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                self.init
                    + self
                        .trees
                        .iter()
                        .map(|t| self.learning_rate * t.predict_row(row))
                        .sum::<f64>()
            })
            .collect()
    }
}

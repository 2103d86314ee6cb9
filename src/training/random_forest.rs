//! Random Forest implementation
//!
//! One forest type covers both flavours used by the forecasting hosts:
//!
//! - [`LeafAggregation::Classification`]: uniform bootstrap, full feature
//!   search, majority vote over per-tree arg-max classes.
//! - [`LeafAggregation::RecencyWeightedRegression`]: bootstrap weighted by
//!   `exp(2·i/n)` toward recent rows, per-node feature subsampling, and a
//!   mean of per-tree predictions with optional multiplicative jitter.
//!
//! Feature importance is permutation based and recomputed on every fit.

use crate::error::{EconcastError, Result};
use crate::utils::{check_feature_vector, valid_rows, CancellationToken};
use super::config::ForestConfig;
use super::decision_tree::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Relative variance changes below this are treated as no signal
const IMPORTANCE_EPS: f64 = 1e-9;

/// Bootstrap weighting and aggregation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafAggregation {
    Classification,
    RecencyWeightedRegression,
}

/// Multiplicative per-tree weights drawn from `[low, high)` on every
/// regression prediction.
///
/// The forest returns the normalized weighted mean `Σ wₖ·pₖ / Σ wₖ`, not
/// `mean(wₖ·pₖ)`, so a jittered prediction stays within the range of the
/// tree predictions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    pub low: f64,
    pub high: f64,
    /// Seed for the jitter stream; entropy when `None`
    pub seed: Option<u64>,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self { low: 1.0, high: 1.2, seed: None }
    }
}

impl JitterConfig {
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed), ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.low.is_finite() && self.high.is_finite() && self.low > 0.0 && self.low < self.high) {
            return Err(EconcastError::invalid_parameter(
                "jitter",
                format!("[{}, {})", self.low, self.high),
                "bounds must be finite with 0 < low < high",
            ));
        }
        Ok(())
    }

    fn rng(&self) -> Xoshiro256PlusPlus {
        match self.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        }
    }
}

/// Random Forest model
#[derive(Debug)]
pub struct RandomForest {
    /// Individual trees
    trees: Vec<DecisionTree>,
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: usize,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Fitting fails below this many valid rows
    pub min_valid_rows: usize,
    /// Bootstrap and aggregation policy
    pub aggregation: LeafAggregation,
    /// Prediction jitter (regression only)
    pub jitter: Option<JitterConfig>,
    /// Random state
    pub random_state: Option<u64>,
    n_features: usize,
    /// Sorted classes seen at fit time (classification)
    classes: Vec<f64>,
    feature_importances: Option<Array1<f64>>,
    jitter_rng: Mutex<Xoshiro256PlusPlus>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new_regressor(100)
    }
}

impl RandomForest {
    fn with_aggregation(n_estimators: usize, aggregation: LeafAggregation) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: 10,
            min_samples_split: 2,
            min_valid_rows: 10,
            aggregation,
            jitter: None,
            random_state: None,
            n_features: 0,
            classes: Vec::new(),
            feature_importances: None,
            jitter_rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(0)),
        }
    }

    /// Create a new classifier forest
    pub fn new_classifier(n_estimators: usize) -> Self {
        Self::with_aggregation(n_estimators, LeafAggregation::Classification)
    }

    /// Create a new recency-weighted regressor forest
    pub fn new_regressor(n_estimators: usize) -> Self {
        Self::with_aggregation(n_estimators, LeafAggregation::RecencyWeightedRegression)
    }

    pub fn from_config(config: &ForestConfig) -> Self {
        let mut forest = Self::with_aggregation(config.n_estimators, config.aggregation)
            .with_max_depth(config.max_depth)
            .with_min_samples_split(config.min_samples_split)
            .with_min_valid_rows(config.min_valid_rows);
        forest.jitter = config.jitter;
        forest.random_state = config.random_state;
        forest
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    /// Set the minimum number of valid rows required to fit
    pub fn with_min_valid_rows(mut self, min_rows: usize) -> Self {
        self.min_valid_rows = min_rows;
        self
    }

    /// Set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Enable multiplicative prediction jitter (regression only)
    pub fn with_jitter(mut self, jitter: JitterConfig) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Fit the forest to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        self.fit_inner(x, y, None)
    }

    /// Fit, checking `token` before growing each tree
    pub fn fit_with_cancel(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        token: &CancellationToken,
    ) -> Result<&mut Self> {
        self.fit_inner(x, y, Some(token))
    }

    fn fit_inner(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        token: Option<&CancellationToken>,
    ) -> Result<&mut Self> {
        self.reset();
        if self.n_estimators == 0 {
            return Err(EconcastError::invalid_parameter(
                "n_estimators",
                self.n_estimators,
                "must be at least 1",
            ));
        }
        if let Some(j) = &self.jitter {
            j.validate()?;
        }

        let (x, y) = valid_rows(x, y)?;
        let n_samples = x.nrows();
        let required = self.min_valid_rows.max(1);
        if n_samples < required {
            return Err(EconcastError::insufficient(required, n_samples));
        }

        let n_features = x.ncols();
        let classes = match self.aggregation {
            LeafAggregation::Classification => {
                let mut classes = y.to_vec();
                classes.sort_by(|a, b| a.total_cmp(b));
                classes.dedup();
                classes
            }
            LeafAggregation::RecencyWeightedRegression => Vec::new(),
        };

        let base_seed = self.random_state.unwrap_or_else(|| rand::thread_rng().gen());
        let recency_cdf = match self.aggregation {
            LeafAggregation::RecencyWeightedRegression => Some(recency_cdf(n_samples)),
            LeafAggregation::Classification => None,
        };

        let trees: Vec<DecisionTree> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                if token.map_or(false, |t| t.is_cancelled()) {
                    return Err(EconcastError::Cancelled);
                }
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));

                let mut sample_indices: Vec<usize> = match &recency_cdf {
                    Some(cdf) => (0..n_samples)
                        .map(|_| {
                            let u: f64 = rng.gen();
                            cdf.partition_point(|&c| c <= u).min(n_samples - 1)
                        })
                        .collect(),
                    None => (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect(),
                };
                // Keep the resample in arrival order for the recency-weighted leaves
                sample_indices.sort_unstable();

                let x_boot = x.select(Axis(0), &sample_indices);
                let y_boot: Array1<f64> = sample_indices.iter().map(|&i| y[i]).collect();

                let mut tree = match self.aggregation {
                    LeafAggregation::Classification => DecisionTree::new_classifier(),
                    LeafAggregation::RecencyWeightedRegression => {
                        DecisionTree::new_regressor().with_feature_subsampling(true)
                    }
                }
                .with_max_depth(self.max_depth)
                .with_min_samples_split(self.min_samples_split);

                tree.fit(&x_boot, &y_boot, &mut rng)?;
                Ok(tree)
            })
            .collect::<Result<Vec<DecisionTree>>>()?;

        self.trees = trees;
        self.n_features = n_features;
        self.classes = classes;
        if let Some(j) = &self.jitter {
            *self.jitter_rng.lock() = j.rng();
        }

        let importances = match self.permutation_importance(&x, base_seed) {
            Ok(importances) => importances,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        debug!(
            n_trees = self.trees.len(),
            n_rows = n_samples,
            dropped_rows = y.len().saturating_sub(n_samples),
            aggregation = ?self.aggregation,
            "random forest fitted"
        );
        self.feature_importances = Some(importances);

        Ok(self)
    }

    /// Drop everything learned by a previous fit
    fn reset(&mut self) {
        self.trees.clear();
        self.n_features = 0;
        self.classes.clear();
        self.feature_importances = None;
    }

    /// Permutation importance over the training rows: the relative drop in
    /// prediction variance after shuffling each column, L1-normalized.
    fn permutation_importance(&self, x: &Array2<f64>, seed: u64) -> Result<Array1<f64>> {
        let n_features = x.ncols();
        let baseline = self.predict_matrix(x)?;
        let original_var = variance(&baseline);

        if !(original_var > 0.0) {
            return Ok(Array1::zeros(n_features));
        }

        let raw: Vec<f64> = (0..n_features)
            .into_par_iter()
            .map(|feature_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed ^ (0x9E37_79B9_7F4A_7C15u64.wrapping_mul(feature_idx as u64 + 1)));
                let mut column: Vec<f64> = x.column(feature_idx).to_vec();
                column.shuffle(&mut rng);

                let mut permuted = x.clone();
                for (i, v) in column.into_iter().enumerate() {
                    permuted[[i, feature_idx]] = v;
                }

                let permuted_var = variance(&self.predict_matrix(&permuted)?);
                let importance = (original_var - permuted_var) / original_var;
                Ok(if importance > IMPORTANCE_EPS { importance } else { 0.0 })
            })
            .collect::<Result<Vec<f64>>>()?;

        if raw.iter().any(|v| !v.is_finite()) {
            return Err(EconcastError::NumericFailure(
                "non-finite permutation importance".to_string(),
            ));
        }

        let mut importances = Array1::from_vec(raw);
        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }
        Ok(importances)
    }

    /// Jitter-free aggregate for every row of `x`
    fn predict_matrix(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        x.rows()
            .into_iter()
            .map(|row| self.aggregate(&row.to_vec(), false))
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from_vec)
    }

    fn aggregate(&self, sample: &[f64], with_jitter: bool) -> Result<f64> {
        match self.aggregation {
            LeafAggregation::Classification => {
                // Tally in first-seen order so ties go to the earliest class
                let mut votes: Vec<(f64, usize)> = Vec::new();
                for tree in &self.trees {
                    let class = tree.predict_row(sample)?;
                    match votes.iter_mut().find(|(c, _)| *c == class) {
                        Some((_, count)) => *count += 1,
                        None => votes.push((class, 1)),
                    }
                }
                let mut best: Option<(f64, usize)> = None;
                for (class, count) in votes {
                    if best.map_or(true, |(_, c)| count > c) {
                        best = Some((class, count));
                    }
                }
                Ok(best.map(|(class, _)| class).unwrap_or(0.0))
            }
            LeafAggregation::RecencyWeightedRegression => {
                let predictions = self
                    .trees
                    .iter()
                    .map(|tree| tree.predict_row(sample))
                    .collect::<Result<Vec<f64>>>()?;

                let weights: Vec<f64> = match (&self.jitter, with_jitter) {
                    (Some(j), true) => {
                        let dist = Uniform::new(j.low, j.high);
                        let mut rng = self.jitter_rng.lock();
                        predictions.iter().map(|_| dist.sample(&mut *rng)).collect()
                    }
                    _ => vec![1.0; predictions.len()],
                };

                let weight_sum: f64 = weights.iter().sum();
                let value = predictions
                    .iter()
                    .zip(&weights)
                    .map(|(p, w)| p * w)
                    .sum::<f64>()
                    / weight_sum;
                Ok(value)
            }
        }
    }

    fn check_fitted(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(EconcastError::ModelNotFitted);
        }
        Ok(())
    }

    /// Predict one row.
    ///
    /// Classification returns the majority-vote class; regression returns the
    /// (optionally jittered) mean of the tree predictions.
    pub fn predict_row(&self, sample: &[f64]) -> Result<f64> {
        self.check_fitted()?;
        check_feature_vector(sample, self.n_features)?;

        let value = self.aggregate(sample, true)?;
        if !value.is_finite() {
            return Err(EconcastError::NumericFailure(format!(
                "forest prediction is not finite ({})",
                value
            )));
        }
        Ok(value)
    }

    /// Make predictions for every row
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_row(&row.to_vec()))
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from_vec)
    }

    /// Class probabilities for one row, aligned to [`classes`](Self::classes).
    ///
    /// The mean of the per-tree leaf distributions.
    pub fn predict_proba_row(&self, sample: &[f64]) -> Result<Vec<f64>> {
        self.check_fitted()?;
        if self.aggregation != LeafAggregation::Classification {
            return Err(EconcastError::InvalidInput(
                "predict_proba is only available for classification".to_string(),
            ));
        }
        check_feature_vector(sample, self.n_features)?;

        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let tree_proba = tree.predict_proba_row(sample)?;
            for (class, p) in tree.classes().iter().zip(tree_proba) {
                if let Some(k) = self.classes.iter().position(|c| c == class) {
                    proba[k] += p;
                }
            }
        }
        let n_trees = self.trees.len() as f64;
        for p in &mut proba {
            *p /= n_trees;
        }
        Ok(proba)
    }

    /// Get feature importances, aligned to the input feature order
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    /// Sorted classes seen at fit time (classification)
    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Get number of trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}

/// Normalized cumulative distribution of the weights `exp(2·i/n)`.
fn recency_cdf(n: usize) -> Vec<f64> {
    let weights: Vec<f64> = (0..n).map(|i| (2.0 * i as f64 / n as f64).exp()).collect();
    let total: f64 = weights.iter().sum();
    let mut acc = 0.0;
    weights
        .iter()
        .map(|w| {
            acc += w / total;
            acc
        })
        .collect()
}

/// Population variance
fn variance(values: &Array1<f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mean = values.sum() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

//! Decision tree implementation
//!
//! A binary tree grown by greedy threshold search. The classification
//! variant scores splits by Gini reduction and stores class distributions in
//! its leaves; the regression variant scores by variance reduction and
//! stores a recency-weighted mean, optionally restricting each node to a
//! random subset of the features not yet used on its root path.

use crate::error::{EconcastError, Result};
use crate::utils::{is_valid, valid_rows};
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// What a tree predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeTask {
    Classification,
    Regression,
}

/// Value held by a leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafValue {
    /// Recency-weighted mean target (regression)
    Scalar(f64),
    /// Class fractions aligned to [`DecisionTree::classes`] (classification)
    Distribution(Vec<f64>),
}

/// Decision tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf {
        value: LeafValue,
        n_samples: usize,
    },
    /// Internal node; rows with `x[feature_idx] <= threshold` go left
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        gain: f64,
    },
}

impl TreeNode {
    pub fn n_samples(&self) -> usize {
        match self {
            TreeNode::Leaf { n_samples, .. } | TreeNode::Split { n_samples, .. } => *n_samples,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }
}

/// Decision tree model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    /// A node at this depth always becomes a leaf
    pub max_depth: usize,
    /// Minimum rows to split a node, and minimum rows in each child
    pub min_samples_split: usize,
    /// Restrict each node to `floor(sqrt(|available|))` random features
    pub feature_subsampling: bool,
    task: TreeTask,
    n_features: usize,
    /// Sorted distinct classes seen at fit time
    classes: Vec<f64>,
    /// Returned by the regression variant for malformed rows
    fallback: f64,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new_classifier()
    }
}

/// Borrowed training data shared by the recursive builder
struct GrowContext<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    /// Class index per row (classification only)
    labels: &'a [usize],
}

/// Best split found for one node
#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

impl DecisionTree {
    /// Create a new classifier tree
    pub fn new_classifier() -> Self {
        Self::with_task(TreeTask::Classification)
    }

    /// Create a new regressor tree
    pub fn new_regressor() -> Self {
        Self::with_task(TreeTask::Regression)
    }

    fn with_task(task: TreeTask) -> Self {
        Self {
            root: None,
            max_depth: 10,
            min_samples_split: 2,
            feature_subsampling: false,
            task,
            n_features: 0,
            classes: Vec::new(),
            fallback: 0.0,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set minimum samples to split
    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(1);
        self
    }

    /// Enable per-node feature subsampling (regression forests)
    pub fn with_feature_subsampling(mut self, enabled: bool) -> Self {
        self.feature_subsampling = enabled;
        self
    }

    pub fn task(&self) -> TreeTask {
        self.task
    }

    /// Sorted distinct classes observed during fit (classification)
    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.root.is_some()
    }

    /// Fit the tree to training data.
    ///
    /// Rows containing a non-finite value are dropped first. `rng` drives
    /// the per-node feature subsampling.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rng: &mut R,
    ) -> Result<&mut Self> {
        self.root = None;
        let (x, y) = valid_rows(x, y)?;
        let n_samples = x.nrows();
        if n_samples == 0 {
            return Err(EconcastError::insufficient(1, 0));
        }

        self.n_features = x.ncols();
        self.fallback = recency_weighted_mean(&y.to_vec());

        let labels = match self.task {
            TreeTask::Classification => {
                let mut classes: Vec<f64> = y.to_vec();
                classes.sort_by(|a, b| a.total_cmp(b));
                classes.dedup();
                let labels = y
                    .iter()
                    .map(|v| classes.partition_point(|c| c < v))
                    .collect();
                self.classes = classes;
                labels
            }
            TreeTask::Regression => {
                self.classes.clear();
                Vec::new()
            }
        };

        let ctx = GrowContext { x: &x, y: &y, labels: &labels };
        let indices: Vec<usize> = (0..n_samples).collect();
        let available: Vec<usize> = (0..self.n_features).collect();
        self.root = Some(self.build_tree(&ctx, &indices, 0, &available, rng));

        Ok(self)
    }

    fn build_tree<R: Rng + ?Sized>(
        &self,
        ctx: &GrowContext<'_>,
        indices: &[usize],
        depth: usize,
        available: &[usize],
        rng: &mut R,
    ) -> TreeNode {
        let n_samples = indices.len();

        let should_stop = depth >= self.max_depth
            || n_samples < self.min_samples_split
            || self.is_pure(ctx, indices)
            || (self.feature_subsampling && available.is_empty());

        if should_stop {
            return self.make_leaf(ctx, indices);
        }

        let (candidates, child_available): (Vec<usize>, Vec<usize>) = if self.feature_subsampling {
            let k = ((available.len() as f64).sqrt().floor() as usize).max(1);
            let chosen: Vec<usize> = available.choose_multiple(rng, k).copied().collect();
            let rest = available
                .iter()
                .copied()
                .filter(|f| !chosen.contains(f))
                .collect();
            (chosen, rest)
        } else {
            ((0..self.n_features).collect(), available.to_vec())
        };

        let best = match self.find_best_split(ctx, indices, &candidates) {
            Some(best) => best,
            None => return self.make_leaf(ctx, indices),
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| ctx.x[[i, best.feature_idx]] <= best.threshold);

        let left = Box::new(self.build_tree(ctx, &left_indices, depth + 1, &child_available, rng));
        let right = Box::new(self.build_tree(ctx, &right_indices, depth + 1, &child_available, rng));

        TreeNode::Split {
            feature_idx: best.feature_idx,
            threshold: best.threshold,
            left,
            right,
            n_samples,
            gain: best.gain,
        }
    }

    fn find_best_split(
        &self,
        ctx: &GrowContext<'_>,
        indices: &[usize],
        candidates: &[usize],
    ) -> Option<SplitCandidate> {
        // Each feature is scanned independently; collect keeps candidate order
        let per_feature: Vec<Option<SplitCandidate>> = candidates
            .par_iter()
            .map(|&feature_idx| self.best_split_for_feature(ctx, indices, feature_idx))
            .collect();

        per_feature.into_iter().flatten().fold(None, |best, cand| match best {
            Some(b) if b.gain >= cand.gain => Some(b),
            _ => Some(cand),
        })
    }

    /// Scan the midpoints between consecutive distinct values of one feature
    /// with running sufficient statistics.
    fn best_split_for_feature(
        &self,
        ctx: &GrowContext<'_>,
        indices: &[usize],
        feature_idx: usize,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        if n < 2 {
            return None;
        }
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| ctx.x[[a, feature_idx]].total_cmp(&ctx.x[[b, feature_idx]]));

        // Targets are centred on the node mean so the running sums stay
        // small for large-magnitude levels
        let center = order.iter().map(|&i| ctx.y[i]).sum::<f64>() / n as f64;

        let n_classes = self.classes.len();
        let mut total = NodeStats::new(n_classes);
        for &i in &order {
            total.push(ctx.y[i] - center, ctx.labels.get(i).copied());
        }
        let parent_impurity = total.impurity(self.task);

        let mut left = NodeStats::new(n_classes);
        let mut best: Option<SplitCandidate> = None;

        for pos in 0..n - 1 {
            let i = order[pos];
            left.push(ctx.y[i] - center, ctx.labels.get(i).copied());

            let value = ctx.x[[i, feature_idx]];
            let next = ctx.x[[order[pos + 1], feature_idx]];
            if next <= value {
                continue;
            }

            let left_count = pos + 1;
            let right_count = n - left_count;
            if left_count < self.min_samples_split || right_count < self.min_samples_split {
                continue;
            }

            let right = total.minus(&left);
            let weighted = (left_count as f64 * left.impurity(self.task)
                + right_count as f64 * right.impurity(self.task))
                / n as f64;
            let gain = parent_impurity - weighted;

            if gain > 0.0 && best.map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature_idx,
                    threshold: (value + next) / 2.0,
                    gain,
                });
            }
        }

        best
    }

    fn is_pure(&self, ctx: &GrowContext<'_>, indices: &[usize]) -> bool {
        match indices.first() {
            None => true,
            Some(&first) => {
                let v = ctx.y[first];
                indices.iter().all(|&i| ctx.y[i] == v)
            }
        }
    }

    fn make_leaf(&self, ctx: &GrowContext<'_>, indices: &[usize]) -> TreeNode {
        let n_samples = indices.len();
        let value = match self.task {
            TreeTask::Regression => {
                let ys: Vec<f64> = indices.iter().map(|&i| ctx.y[i]).collect();
                LeafValue::Scalar(recency_weighted_mean(&ys))
            }
            TreeTask::Classification => {
                let mut counts = vec![0.0; self.classes.len()];
                for &i in indices {
                    counts[ctx.labels[i]] += 1.0;
                }
                if n_samples > 0 {
                    for c in &mut counts {
                        *c /= n_samples as f64;
                    }
                }
                LeafValue::Distribution(counts)
            }
        };
        TreeNode::Leaf { value, n_samples }
    }

    fn leaf_for<'a>(&'a self, mut node: &'a TreeNode, sample: &[f64]) -> &'a LeafValue {
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return value,
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if sample[*feature_idx] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }

    fn accepts(&self, sample: &[f64]) -> bool {
        sample.len() == self.n_features && sample.iter().all(|&v| is_valid(v))
    }

    /// Predict one row.
    ///
    /// Regression returns the leaf value; classification returns the most
    /// probable class. A malformed row (wrong length or non-finite value)
    /// yields the default instead of an error: class `0.0`, or the
    /// recency-weighted mean of the training targets.
    pub fn predict_row(&self, sample: &[f64]) -> Result<f64> {
        let root = self.root.as_ref().ok_or(EconcastError::ModelNotFitted)?;
        if !self.accepts(sample) {
            return Ok(match self.task {
                TreeTask::Classification => 0.0,
                TreeTask::Regression => self.fallback,
            });
        }

        Ok(match self.leaf_for(root, sample) {
            LeafValue::Scalar(v) => *v,
            LeafValue::Distribution(p) => argmax(p).map(|k| self.classes[k]).unwrap_or(0.0),
        })
    }

    /// Class probabilities for one row, aligned to [`classes`](Self::classes).
    ///
    /// A malformed row yields an all-zero vector.
    pub fn predict_proba_row(&self, sample: &[f64]) -> Result<Vec<f64>> {
        let root = self.root.as_ref().ok_or(EconcastError::ModelNotFitted)?;
        if self.task != TreeTask::Classification {
            return Err(EconcastError::InvalidInput(
                "predict_proba is only available for classification".to_string(),
            ));
        }
        if !self.accepts(sample) {
            return Ok(vec![0.0; self.classes.len()]);
        }

        Ok(match self.leaf_for(root, sample) {
            LeafValue::Distribution(p) => p.clone(),
            LeafValue::Scalar(_) => vec![0.0; self.classes.len()],
        })
    }

    /// Make predictions for every row
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_row(&row.to_vec()))
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from_vec)
    }

    /// Get tree depth (a lone leaf has depth 0)
    pub fn depth(&self) -> usize {
        fn node_depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + node_depth(left).max(node_depth(right)),
            }
        }
        self.root.as_ref().map_or(0, node_depth)
    }

    /// Get number of leaves
    pub fn n_leaves(&self) -> usize {
        fn count(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => count(left) + count(right),
            }
        }
        self.root.as_ref().map_or(0, count)
    }
}

/// Running sums for variance and class counts of one side of a split
#[derive(Debug, Clone)]
struct NodeStats {
    count: usize,
    sum: f64,
    sq_sum: f64,
    class_counts: Vec<usize>,
}

impl NodeStats {
    fn new(n_classes: usize) -> Self {
        Self { count: 0, sum: 0.0, sq_sum: 0.0, class_counts: vec![0; n_classes] }
    }

    fn push(&mut self, y: f64, label: Option<usize>) {
        self.count += 1;
        self.sum += y;
        self.sq_sum += y * y;
        if let Some(k) = label {
            self.class_counts[k] += 1;
        }
    }

    fn minus(&self, other: &NodeStats) -> NodeStats {
        NodeStats {
            count: self.count - other.count,
            sum: self.sum - other.sum,
            sq_sum: self.sq_sum - other.sq_sum,
            class_counts: self
                .class_counts
                .iter()
                .zip(&other.class_counts)
                .map(|(a, b)| a - b)
                .collect(),
        }
    }

    fn impurity(&self, task: TreeTask) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        match task {
            TreeTask::Classification => {
                1.0 - self
                    .class_counts
                    .iter()
                    .map(|&c| (c as f64 / n).powi(2))
                    .sum::<f64>()
            }
            // Var = E[X²] - E[X]²
            TreeTask::Regression => (self.sq_sum / n - (self.sum / n).powi(2)).max(0.0),
        }
    }
}

/// Mean with weight `exp(i/n)` on the i-th of n values in arrival order.
pub fn recency_weighted_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let (weighted, total) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(acc, wsum), (i, &v)| {
            let w = (i as f64 / n).exp();
            (acc + w * v, wsum + w)
        });
    weighted / total
}

/// Index of the first maximal entry
pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

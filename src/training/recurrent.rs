//! Recurrent cell chain (experimental)
//!
//! A fixed chain of `lookback` single-layer LSTM cells. Cell `k` consumes
//! the `k`-th lagged value (oldest first) together with the previous cell's
//! state; the forecast is the mean of the last cell's hidden vector.
//!
//! Training uses a local update: every cell receives the same clipped
//! output gradient instead of a gradient propagated back through time. The
//! update rule sits behind [`TrainStep`] so a full BPTT step can replace
//! [`LocalGradientStep`] without touching the chain.

use crate::error::{EconcastError, Result};
use crate::linalg::{add, hadamard, map, matvec, outer, random_uniform, zeros};
use crate::timeseries::{lag_windows, Normalization};
use crate::utils::{finite_series, CancellationToken};
use super::config::RecurrentConfig;
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

/// Element-wise gradient bound
pub const GRADIENT_CLIP: f64 = 5.0;

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

/// Weights and bias of one gate; also used to hold its gradients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    /// `hidden × (1 + hidden)`, acting on `[x, h_prev]`
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Gate {
    fn zeros(hidden_size: usize) -> Self {
        Self {
            weights: zeros(hidden_size, hidden_size + 1),
            bias: Array1::zeros(hidden_size),
        }
    }

    fn pre_activation(&self, z: &Array1<f64>) -> Result<Array1<f64>> {
        add(&matvec(&self.weights, z)?, &self.bias)
    }

    fn accumulate(&mut self, other: &Gate) -> Result<()> {
        self.weights = add(&self.weights, &other.weights)?;
        self.bias = add(&self.bias, &other.bias)?;
        Ok(())
    }

    fn scale(&mut self, factor: f64) {
        self.weights.mapv_inplace(|g| g * factor);
        self.bias.mapv_inplace(|g| g * factor);
    }

    fn descend(&mut self, grad: &Gate, learning_rate: f64) -> Result<()> {
        let dw = map(&grad.weights, |g| -learning_rate * clip(g));
        let db = map(&grad.bias, |g| -learning_rate * clip(g));
        self.weights = add(&self.weights, &dw)?;
        self.bias = add(&self.bias, &db)?;
        Ok(())
    }
}

/// Recurrence state passed from one cell to the next
#[derive(Debug, Clone, PartialEq)]
pub struct CellState {
    pub hidden: Array1<f64>,
    pub cell: Array1<f64>,
}

impl CellState {
    pub fn zeros(hidden_size: usize) -> Self {
        Self {
            hidden: Array1::zeros(hidden_size),
            cell: Array1::zeros(hidden_size),
        }
    }
}

/// Forward-pass intermediates needed by the backward update
#[derive(Debug, Clone)]
pub struct CellCache {
    /// `[x, h_prev]`
    pub z: Array1<f64>,
    pub forget: Array1<f64>,
    pub input: Array1<f64>,
    pub candidate: Array1<f64>,
    pub output: Array1<f64>,
    pub cell_prev: Array1<f64>,
    pub cell: Array1<f64>,
}

/// Parameter gradients for one cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellGradients {
    pub forget: Gate,
    pub input: Gate,
    pub candidate: Gate,
    pub output: Gate,
}

impl CellGradients {
    pub fn zeros(hidden_size: usize) -> Self {
        Self {
            forget: Gate::zeros(hidden_size),
            input: Gate::zeros(hidden_size),
            candidate: Gate::zeros(hidden_size),
            output: Gate::zeros(hidden_size),
        }
    }

    fn accumulate(&mut self, other: &CellGradients) -> Result<()> {
        self.forget.accumulate(&other.forget)?;
        self.input.accumulate(&other.input)?;
        self.candidate.accumulate(&other.candidate)?;
        self.output.accumulate(&other.output)
    }

    fn scale(&mut self, factor: f64) {
        self.forget.scale(factor);
        self.input.scale(factor);
        self.candidate.scale(factor);
        self.output.scale(factor);
    }
}

/// Single LSTM cell with a scalar input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmCell {
    hidden_size: usize,
    forget: Gate,
    input: Gate,
    candidate: Gate,
    output: Gate,
}

impl LstmCell {
    /// Uniform init in `±1/√hidden`; forget bias starts at 1
    pub fn new(hidden_size: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let mut gate = |bias: f64| Gate {
            weights: random_uniform(hidden_size, hidden_size + 1, -limit, limit, &mut *rng),
            bias: Array1::from_elem(hidden_size, bias),
        };
        Self {
            hidden_size,
            forget: gate(1.0),
            input: gate(0.0),
            candidate: gate(0.0),
            output: gate(0.0),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn forward(&self, x: f64, state: &CellState) -> Result<(CellState, CellCache)> {
        let mut z = Array1::zeros(self.hidden_size + 1);
        z[0] = x;
        z.slice_mut(ndarray::s![1..]).assign(&state.hidden);

        let forget = map(&self.forget.pre_activation(&z)?, sigmoid);
        let input = map(&self.input.pre_activation(&z)?, sigmoid);
        let candidate = map(&self.candidate.pre_activation(&z)?, f64::tanh);
        let output = map(&self.output.pre_activation(&z)?, sigmoid);

        let cell = add(&hadamard(&forget, &state.cell)?, &hadamard(&input, &candidate)?)?;
        let hidden = hadamard(&output, &map(&cell, f64::tanh))?;

        let cache = CellCache {
            z,
            forget,
            input,
            candidate,
            output,
            cell_prev: state.cell.clone(),
            cell: cell.clone(),
        };
        Ok((CellState { hidden, cell }, cache))
    }

    /// Gradients of this cell's parameters given `d_hidden = ∂L/∂h`.
    pub fn local_gradients(&self, cache: &CellCache, d_hidden: &Array1<f64>) -> Result<CellGradients> {
        let tanh_c = map(&cache.cell, f64::tanh);
        let d_output = hadamard(d_hidden, &tanh_c)?;
        let d_cell = hadamard(
            &hadamard(d_hidden, &cache.output)?,
            &map(&tanh_c, |t| 1.0 - t * t),
        )?;
        let d_forget = hadamard(&d_cell, &cache.cell_prev)?;
        let d_input = hadamard(&d_cell, &cache.candidate)?;
        let d_candidate = hadamard(&d_cell, &cache.input)?;

        let sigmoid_grad = |a: &Array1<f64>| map(a, |s| s * (1.0 - s));
        let da_forget = hadamard(&d_forget, &sigmoid_grad(&cache.forget))?;
        let da_input = hadamard(&d_input, &sigmoid_grad(&cache.input))?;
        let da_output = hadamard(&d_output, &sigmoid_grad(&cache.output))?;
        let da_candidate = hadamard(&d_candidate, &map(&cache.candidate, |g| 1.0 - g * g))?;

        let gate = |da: Array1<f64>| Gate {
            weights: outer(&da, &cache.z),
            bias: da,
        };
        Ok(CellGradients {
            forget: gate(da_forget),
            input: gate(da_input),
            candidate: gate(da_candidate),
            output: gate(da_output),
        })
    }

    /// Clipped gradient-descent update
    pub fn apply(&mut self, grads: &CellGradients, learning_rate: f64) -> Result<()> {
        self.forget.descend(&grads.forget, learning_rate)?;
        self.input.descend(&grads.input, learning_rate)?;
        self.candidate.descend(&grads.candidate, learning_rate)?;
        self.output.descend(&grads.output, learning_rate)
    }
}

/// Turns the output gradient of one forward pass into per-cell gradients.
pub trait TrainStep: Debug + Send + Sync {
    fn cell_gradients(
        &self,
        cells: &[LstmCell],
        caches: &[CellCache],
        d_output: &Array1<f64>,
    ) -> Result<Vec<CellGradients>>;
}

/// Hands every cell the same output gradient; no gradient flows between cells
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGradientStep;

impl TrainStep for LocalGradientStep {
    fn cell_gradients(
        &self,
        cells: &[LstmCell],
        caches: &[CellCache],
        d_output: &Array1<f64>,
    ) -> Result<Vec<CellGradients>> {
        cells
            .iter()
            .zip(caches)
            .map(|(cell, cache)| cell.local_gradients(cache, d_output))
            .collect()
    }
}

/// LSTM chain forecaster
#[derive(Debug)]
pub struct RecurrentCellChain {
    pub config: RecurrentConfig,
    cells: Vec<LstmCell>,
    normalization: Option<Normalization>,
    step: Box<dyn TrainStep>,
    /// Mean squared error (normalized scale) per completed epoch
    pub loss_history: Vec<f64>,
}

impl Default for RecurrentCellChain {
    fn default() -> Self {
        Self::from_config(&RecurrentConfig::default())
    }
}

impl RecurrentCellChain {
    pub fn new(lookback: usize, hidden_size: usize) -> Self {
        Self::from_config(&RecurrentConfig::new(lookback, hidden_size))
    }

    pub fn from_config(config: &RecurrentConfig) -> Self {
        Self {
            config: config.clone(),
            cells: Vec::new(),
            normalization: None,
            step: Box::new(LocalGradientStep),
            loss_history: Vec::new(),
        }
    }

    /// Replace the update rule
    pub fn with_train_step<S: TrainStep + 'static>(mut self, step: S) -> Self {
        self.step = Box::new(step);
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.config.epochs = epochs;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.config.random_state = Some(seed);
        self
    }

    pub fn cells(&self) -> &[LstmCell] {
        &self.cells
    }

    /// Statistics captured by the last fit
    pub fn normalization(&self) -> Option<&Normalization> {
        self.normalization.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.normalization.is_some() && !self.cells.is_empty()
    }

    /// Run normalized `inputs` through `cells` from a zero state.
    fn forward_chain(cells: &[LstmCell], inputs: &[f64]) -> Result<(f64, Vec<CellCache>)> {
        let hidden_size = cells.first().map_or(0, |c| c.hidden_size());
        let mut state = CellState::zeros(hidden_size);
        let mut caches = Vec::with_capacity(cells.len());
        for (cell, &x) in cells.iter().zip(inputs) {
            let (next, cache) = cell.forward(x, &state)?;
            state = next;
            caches.push(cache);
        }
        let output = state.hidden.mean().unwrap_or(0.0);
        Ok((output, caches))
    }

    pub fn fit(&mut self, series: &[f64]) -> Result<&mut Self> {
        self.fit_inner(series, None)
    }

    /// Fit, checking `token` before every epoch
    pub fn fit_with_cancel(&mut self, series: &[f64], token: &CancellationToken) -> Result<&mut Self> {
        self.fit_inner(series, Some(token))
    }

    fn fit_inner(&mut self, series: &[f64], token: Option<&CancellationToken>) -> Result<&mut Self> {
        self.cells.clear();
        self.normalization = None;
        self.loss_history.clear();

        self.config.validate()?;
        let lookback = self.config.lookback;
        let hidden_size = self.config.hidden_size;
        let required = lookback
            .checked_add(1)
            .ok_or_else(|| EconcastError::invalid_parameter("lookback", lookback, "too large"))?;

        let clean = finite_series(series);
        if clean.len() < required {
            return Err(EconcastError::insufficient(required, clean.len()));
        }

        let normalization = Normalization::fit(&clean)?;
        let windows = lag_windows(&normalization.transform_all(&clean), lookback)?;
        let n_windows = windows.nrows();

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let mut cells: Vec<LstmCell> = (0..lookback).map(|_| LstmCell::new(hidden_size, &mut rng)).collect();
        let mut loss_history = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            if token.map_or(false, |t| t.is_cancelled()) {
                return Err(EconcastError::Cancelled);
            }

            let mut indices: Vec<usize> = (0..n_windows).collect();
            indices.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in indices.chunks(self.config.batch_size) {
                let mut batch_grads: Vec<CellGradients> =
                    (0..lookback).map(|_| CellGradients::zeros(hidden_size)).collect();

                for &idx in batch {
                    let window = windows.row(idx);
                    let inputs: Vec<f64> = window.iter().take(lookback).copied().collect();
                    let target = window[lookback];

                    let (output, caches) = Self::forward_chain(&cells, &inputs)?;
                    let err = output - target;
                    epoch_loss += err * err;

                    // d(mean(h) - t)² / dh_j
                    let d_output = Array1::from_elem(hidden_size, clip(2.0 * err / hidden_size as f64));
                    let grads = self.step.cell_gradients(&cells, &caches, &d_output)?;
                    for (acc, g) in batch_grads.iter_mut().zip(&grads) {
                        acc.accumulate(g)?;
                    }
                }

                for (cell, grads) in cells.iter_mut().zip(batch_grads.iter_mut()) {
                    grads.scale(1.0 / batch.len() as f64);
                    cell.apply(grads, self.config.learning_rate)?;
                }
            }

            let mse = epoch_loss / n_windows as f64;
            if !mse.is_finite() {
                return Err(EconcastError::NumericFailure(format!(
                    "recurrent training loss diverged at epoch {}",
                    epoch
                )));
            }
            loss_history.push(mse);
        }

        debug!(
            lookback,
            hidden_size,
            n_windows,
            epochs = self.config.epochs,
            final_loss = loss_history.last().copied().unwrap_or(f64::NAN),
            "recurrent cell chain fitted"
        );

        self.cells = cells;
        self.normalization = Some(normalization);
        self.loss_history = loss_history;
        Ok(self)
    }

    /// Forecast the value after the last `lookback` finite points.
    pub fn predict(&self, series: &[f64]) -> Result<f64> {
        let normalization = match (&self.normalization, self.cells.is_empty()) {
            (Some(n), false) => n,
            _ => return Err(EconcastError::ModelNotFitted),
        };
        let lookback = self.config.lookback;
        let clean = finite_series(series);
        if clean.len() < lookback {
            return Err(EconcastError::insufficient(lookback, clean.len()));
        }

        let inputs = normalization.transform_all(&clean[clean.len() - lookback..]);
        let (output, _) = Self::forward_chain(&self.cells, &inputs)?;
        let value = normalization.inverse(output);
        if !value.is_finite() {
            return Err(EconcastError::NumericFailure(format!(
                "recurrent prediction is not finite ({})",
                value
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(n: usize) -> Vec<f64> {
        (0..n).map(|i| 10.0 + (i as f64 * 0.5).sin()).collect()
    }

    #[test]
    fn test_zero_cell_forward() {
        let cell = LstmCell {
            hidden_size: 2,
            forget: Gate::zeros(2),
            input: Gate::zeros(2),
            candidate: Gate::zeros(2),
            output: Gate::zeros(2),
        };
        let (state, cache) = cell.forward(0.7, &CellState::zeros(2)).unwrap();
        assert_eq!(state, CellState::zeros(2));
        assert!(cache.forget.iter().all(|&f| (f - 0.5).abs() < 1e-12));
        assert_eq!(cache.z[0], 0.7);
    }

    #[test]
    fn test_update_is_clipped() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let cell = LstmCell::new(3, &mut rng);
        let state = CellState {
            hidden: Array1::from_elem(3, 0.8),
            cell: Array1::from_elem(3, 2.0),
        };
        let (_, cache) = cell.forward(3.0, &state).unwrap();
        let grads = cell.local_gradients(&cache, &Array1::from_elem(3, 1e6)).unwrap();

        let gates = |c: &LstmCell| [c.forget.clone(), c.input.clone(), c.candidate.clone(), c.output.clone()];
        let raw_max = [&grads.forget, &grads.input, &grads.candidate, &grads.output]
            .iter()
            .flat_map(|g| g.weights.iter().chain(g.bias.iter()))
            .fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(raw_max > GRADIENT_CLIP, "raw gradient {}", raw_max);

        let learning_rate = 0.1;
        let mut updated = cell.clone();
        updated.apply(&grads, learning_rate).unwrap();

        let bound = learning_rate * GRADIENT_CLIP + 1e-12;
        let mut max_step = 0.0f64;
        for (before, after) in gates(&cell).iter().zip(gates(&updated).iter()) {
            let weights = before.weights.iter().zip(after.weights.iter());
            let bias = before.bias.iter().zip(after.bias.iter());
            for (b, a) in weights.chain(bias) {
                let step = (a - b).abs();
                assert!(step <= bound, "step {} exceeds {}", step, bound);
                max_step = max_step.max(step);
            }
        }
        assert!((max_step - learning_rate * GRADIENT_CLIP).abs() < 1e-9);
    }

    #[test]
    fn test_single_cell_step_reduces_loss() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut cell = LstmCell::new(3, &mut rng);
        let (x, target) = (0.5, 0.9);

        let loss = |cell: &LstmCell| {
            let (state, _) = cell.forward(x, &CellState::zeros(3)).unwrap();
            (state.hidden.mean().unwrap() - target).powi(2)
        };
        let before = loss(&cell);

        let (state, cache) = cell.forward(x, &CellState::zeros(3)).unwrap();
        let err = state.hidden.mean().unwrap() - target;
        let d_hidden = Array1::from_elem(3, 2.0 * err / 3.0);
        let grads = LocalGradientStep
            .cell_gradients(std::slice::from_ref(&cell), &[cache], &d_hidden)
            .unwrap();
        cell.apply(&grads[0], 0.01).unwrap();

        assert!(loss(&cell) < before);
    }

    #[test]
    fn test_fit_predict_finite() {
        let series = wave(40);
        let mut model = RecurrentCellChain::new(4, 3).with_epochs(20);
        model.fit(&series).unwrap();

        assert_eq!(model.cells().len(), 4);
        assert_eq!(model.loss_history.len(), 20);
        let pred = model.predict(&series).unwrap();
        assert!(pred.is_finite());
        // Output is tanh-bounded on the normalized scale
        let norm = model.normalization().unwrap();
        assert!((pred - norm.mean).abs() <= norm.std + 1e-9);
    }

    #[test]
    fn test_predict_has_no_carried_state() {
        let series = wave(30);
        let mut model = RecurrentCellChain::new(3, 2).with_epochs(5);
        model.fit(&series).unwrap();

        let first = model.predict(&series).unwrap();
        let second = model.predict(&series).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let series = wave(30);
        let mut a = RecurrentCellChain::new(3, 2).with_epochs(5).with_random_state(9);
        let mut b = RecurrentCellChain::new(3, 2).with_epochs(5).with_random_state(9);
        a.fit(&series).unwrap();
        b.fit(&series).unwrap();

        assert_eq!(a.cells(), b.cells());
        assert_eq!(a.predict(&series).unwrap(), b.predict(&series).unwrap());
    }

    #[test]
    fn test_predict_uses_fit_statistics() {
        let series = wave(30);
        let mut model = RecurrentCellChain::new(3, 2).with_epochs(3);
        model.fit(&series).unwrap();
        let stored = *model.normalization().unwrap();

        model.predict(&[100.0, 200.0, 300.0]).unwrap();
        assert_eq!(model.normalization(), Some(&stored));
    }

    #[test]
    fn test_errors() {
        let model = RecurrentCellChain::new(3, 2);
        assert!(matches!(model.predict(&[1.0, 2.0, 3.0]), Err(EconcastError::ModelNotFitted)));

        let mut model = RecurrentCellChain::new(3, 2).with_epochs(2);
        assert!(matches!(
            model.fit(&[1.0, 2.0, 3.0]),
            Err(EconcastError::InsufficientData { required: 4, actual: 3 })
        ));

        model.fit(&wave(10)).unwrap();
        assert!(matches!(
            model.predict(&[1.0, f64::NAN]),
            Err(EconcastError::InsufficientData { required: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_cancelled_fit() {
        let token = CancellationToken::new();
        token.cancel();
        let mut model = RecurrentCellChain::new(3, 2).with_epochs(2).with_random_state(1);
        model.fit(&wave(20)).unwrap();
        assert!(model.is_fitted());

        assert!(matches!(
            model.fit_with_cancel(&wave(20), &token),
            Err(EconcastError::Cancelled)
        ));
        assert!(!model.is_fitted());
        assert!(model.loss_history.is_empty());
        assert!(matches!(model.predict(&wave(20)), Err(EconcastError::ModelNotFitted)));
    }
}

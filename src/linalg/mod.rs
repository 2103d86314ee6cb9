//! Dense linear algebra kernel
//!
//! Small, shape-checked wrappers around `ndarray` plus a Gaussian
//! elimination solver with partial pivoting. Used by the autoregressive
//! model (normal equations) and the LSTM cell (gate arithmetic).

use crate::error::{EconcastError, Result};
use ndarray::{Array, Array1, Array2, Dimension, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

/// Pivots smaller than this are treated as a singular system.
const PIVOT_EPS: f64 = 1e-12;

/// Zero matrix of the given shape
pub fn zeros(rows: usize, cols: usize) -> Array2<f64> {
    Array2::zeros((rows, cols))
}

/// Matrix with entries drawn uniformly from `[low, high)`.
pub fn random_uniform<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    low: f64,
    high: f64,
    rng: &mut R,
) -> Array2<f64> {
    let dist = Uniform::new(low, high);
    Array2::from_shape_simple_fn((rows, cols), || dist.sample(rng))
}

/// Matrix product `a · b`
pub fn matmul(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    if a.ncols() != b.nrows() {
        return Err(EconcastError::ShapeError {
            expected: format!("rhs with {} rows", a.ncols()),
            actual: format!("{} rows", b.nrows()),
        });
    }
    Ok(a.dot(b))
}

/// Matrix-vector product `a · v`
pub fn matvec(a: &Array2<f64>, v: &Array1<f64>) -> Result<Array1<f64>> {
    if a.ncols() != v.len() {
        return Err(EconcastError::ShapeError {
            expected: format!("vector of length {}", a.ncols()),
            actual: format!("length {}", v.len()),
        });
    }
    Ok(a.dot(v))
}

fn check_same_shape<D: Dimension>(a: &Array<f64, D>, b: &Array<f64, D>) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(EconcastError::ShapeError {
            expected: format!("{:?}", a.shape()),
            actual: format!("{:?}", b.shape()),
        });
    }
    Ok(())
}

/// Element-wise sum
pub fn add<D: Dimension>(a: &Array<f64, D>, b: &Array<f64, D>) -> Result<Array<f64, D>> {
    check_same_shape(a, b)?;
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| x + y))
}

/// Element-wise (Hadamard) product
pub fn hadamard<D: Dimension>(a: &Array<f64, D>, b: &Array<f64, D>) -> Result<Array<f64, D>> {
    check_same_shape(a, b)?;
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| x * y))
}

/// Apply `f` to every element
pub fn map<D: Dimension, F: Fn(f64) -> f64>(a: &Array<f64, D>, f: F) -> Array<f64, D> {
    a.mapv(f)
}

/// Outer product `u vᵗ`
pub fn outer(u: &Array1<f64>, v: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((u.len(), v.len()), |(i, j)| u[i] * v[j])
}

/// Solve `A x = b` by Gaussian elimination with partial pivoting over the
/// augmented matrix `[A | b]`, followed by back substitution.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(EconcastError::ShapeError {
            expected: format!("square system of size {}", b.len()),
            actual: format!("{}x{} matrix", a.nrows(), a.ncols()),
        });
    }

    let mut aug = Array2::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        // Find pivot
        let mut max_row = col;
        for row in col + 1..n {
            if aug[[row, col]].abs() > aug[[max_row, col]].abs() {
                max_row = row;
            }
        }

        if max_row != col {
            for j in 0..=n {
                aug.swap([col, j], [max_row, j]);
            }
        }

        let pivot = aug[[col, col]];
        if !pivot.is_finite() || pivot.abs() < PIVOT_EPS {
            return Err(EconcastError::NumericFailure(format!(
                "singular system: pivot {:e} in column {}",
                pivot, col
            )));
        }

        // Eliminate below the pivot
        for row in col + 1..n {
            let factor = aug[[row, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in col..=n {
                aug[[row, j]] -= factor * aug[[col, j]];
            }
        }
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = aug[[i, n]];
        for j in (i + 1)..n {
            sum -= aug[[i, j]] * x[j];
        }
        x[i] = sum / aug[[i, i]];
    }

    Ok(x)
}

/// Build the ridge normal equations `(XᵗX + λI, Xᵗy)`.
pub fn ridge_normal_equations(
    x: &Array2<f64>,
    y: &Array1<f64>,
    lambda: f64,
) -> Result<(Array2<f64>, Array1<f64>)> {
    if x.nrows() != y.len() {
        return Err(EconcastError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    let mut xtx = x.t().dot(x);
    for i in 0..xtx.nrows() {
        xtx[[i, i]] += lambda;
    }
    let xty = x.t().dot(y);
    Ok((xtx, xty))
}

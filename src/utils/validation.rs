//! Numeric validation and row filtering
//!
//! Every model funnels its input through these helpers before doing any
//! arithmetic. Corrupted rows are dropped, never imputed.

use crate::error::{EconcastError, Result};
use ndarray::{Array1, Array2, ArrayView1};

/// True when `x` is a usable number (finite, not NaN).
#[inline]
pub fn is_valid(x: f64) -> bool {
    x.is_finite()
}

/// True when every component of the row is valid.
#[inline]
pub fn is_valid_row(row: ArrayView1<f64>) -> bool {
    row.iter().all(|&v| is_valid(v))
}

/// Drop non-finite points from a series, keeping chronological order.
pub fn finite_series(series: &[f64]) -> Vec<f64> {
    series.iter().copied().filter(|&v| is_valid(v)).collect()
}

/// Drop every row whose features or target contain a non-finite value.
///
/// Row order is preserved, which matters for the recency-weighted forest.
pub fn valid_rows(x: &Array2<f64>, y: &Array1<f64>) -> Result<(Array2<f64>, Array1<f64>)> {
    if x.nrows() != y.len() {
        return Err(EconcastError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }

    let keep: Vec<usize> = (0..x.nrows())
        .filter(|&i| is_valid(y[i]) && is_valid_row(x.row(i)))
        .collect();

    let x_valid = x.select(ndarray::Axis(0), &keep);
    let y_valid: Array1<f64> = keep.iter().map(|&i| y[i]).collect();
    Ok((x_valid, y_valid))
}

/// Validate a feature vector supplied at predict time.
pub fn check_feature_vector(x: &[f64], n_features: usize) -> Result<()> {
    if x.len() != n_features {
        return Err(EconcastError::InvalidInput(format!(
            "expected {} features, got {}",
            n_features,
            x.len()
        )));
    }
    if let Some(pos) = x.iter().position(|&v| !is_valid(v)) {
        return Err(EconcastError::InvalidInput(format!(
            "feature {} is not finite ({})",
            pos, x[pos]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_is_valid() {
        assert!(is_valid(0.0));
        assert!(is_valid(-1e300));
        assert!(!is_valid(f64::NAN));
        assert!(!is_valid(f64::INFINITY));
        assert!(!is_valid(f64::NEG_INFINITY));
    }

    #[test]
    fn test_finite_series_keeps_order() {
        let s = finite_series(&[3.0, f64::NAN, 1.0, f64::INFINITY, 2.0]);
        assert_eq!(s, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_valid_rows_drops_corrupted() {
        let x = array![[1.0, 2.0], [f64::NAN, 1.0], [3.0, 4.0], [5.0, 6.0]];
        let y = array![1.0, 2.0, f64::INFINITY, 4.0];

        let (xv, yv) = valid_rows(&x, &y).unwrap();
        assert_eq!(xv.nrows(), 2);
        assert_eq!(yv, array![1.0, 4.0]);
        assert_eq!(xv.row(1).to_vec(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_valid_rows_shape_mismatch() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0];
        assert!(matches!(valid_rows(&x, &y), Err(EconcastError::ShapeError { .. })));
    }

    #[test]
    fn test_check_feature_vector() {
        assert!(check_feature_vector(&[1.0, 2.0], 2).is_ok());
        assert!(check_feature_vector(&[1.0], 2).is_err());
        assert!(check_feature_vector(&[1.0, f64::NAN], 2).is_err());
    }
}
